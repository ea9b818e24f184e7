use std::process::Stdio;
use tokio::process::Command;

use crate::config::AdapterConfig;

/// Builds the process that runs the handler. The adapter writes the event JSON
/// to the child's stdin and closes it.
pub trait HandlerLauncher: Send + Sync {
    fn command(&self) -> Command;
}

/// Runs `node -e <bootstrap>`, importing the handler module and calling its default export.
#[derive(Debug, Clone)]
pub struct NodeLauncher {
    node_binary: String,
    handler_module: String,
}

impl NodeLauncher {
    pub fn new(node_binary: impl Into<String>, handler_module: impl Into<String>) -> Self {
        Self {
            node_binary: node_binary.into(),
            handler_module: handler_module.into(),
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(&config.node_binary, &config.handler_module)
    }

    /// Inline script handed to `node -e`. Reads the event from stdin and decodes it with `JSON.parse`.
    pub fn bootstrap_script(&self) -> String {
        // a JSON string literal is also a JS string literal
        let module = serde_json::Value::String(self.handler_module.clone()).to_string();
        format!(
            r#"
const report = (error) => {{
    console.log("RUNPOD_ERROR:" + JSON.stringify({{
        error: error && error.message,
        stack: error && error.stack
    }}));
}};
const readEvent = () => new Promise((resolve, reject) => {{
    const chunks = [];
    process.stdin.on("data", chunk => chunks.push(chunk));
    process.stdin.on("end", () => resolve(Buffer.concat(chunks).toString("utf8")));
    process.stdin.on("error", reject);
}});
Promise.all([import({module}), readEvent()]).then(([module, raw]) => {{
    const handler = module.default;
    const event = JSON.parse(raw);
    return Promise.resolve()
        .then(() => handler(event))
        .then(result => {{
            console.log("RUNPOD_RESULT:" + JSON.stringify(result === undefined ? null : result));
        }}, report);
}}).catch(report);
"#
        )
    }
}

impl HandlerLauncher for NodeLauncher {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.node_binary);
        command
            .arg("-e")
            .arg(self.bootstrap_script())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}
