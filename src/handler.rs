use serde_json::{json, Value};
use std::io::ErrorKind;
use std::process::{ExitStatus, Output};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;

use crate::config::{describe_duration, AdapterConfig};
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::AdapterError;
use crate::launcher::{HandlerLauncher, NodeLauncher};
use crate::protocol::{self, TaggedLine};

pub const NO_STRUCTURED_OUTPUT: &str = "No structured output from Node.js handler";

/// Outcome of one invocation, before it is flattened into the platform response.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success(Value),
    HandlerFailed {
        error: Value,
        details: Value,
    },
    NoStructuredOutput {
        stdout: String,
        stderr: String,
        returncode: Option<i32>,
    },
    Timeout(Duration),
    Orchestration {
        message: String,
        kind: &'static str,
    },
}

impl InvocationResult {
    pub fn into_value(self) -> Value {
        match self {
            InvocationResult::Success(value) => value,
            InvocationResult::HandlerFailed { error, details } => json!({
                "error": error,
                "details": details,
            }),
            InvocationResult::NoStructuredOutput {
                stdout,
                stderr,
                returncode,
            } => json!({
                "error": NO_STRUCTURED_OUTPUT,
                "stdout": stdout,
                "stderr": stderr,
                "returncode": returncode,
            }),
            InvocationResult::Timeout(timeout) => json!({
                "error": format!("Handler timeout ({} exceeded)", describe_duration(timeout)),
            }),
            InvocationResult::Orchestration { message, kind } => json!({
                "error": format!("Python wrapper error: {}", message),
                "type": kind,
            }),
        }
    }
}

impl From<AdapterError> for InvocationResult {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Timeout(timeout) => InvocationResult::Timeout(timeout),
            other => InvocationResult::Orchestration {
                message: other.to_string(),
                kind: other.kind(),
            },
        }
    }
}

/// Forwards events to the external handler process and recovers its result.
pub struct Adapter {
    timeout: Duration,
    launcher: Box<dyn HandlerLauncher>,
    sink: Arc<dyn DiagnosticSink>,
}

impl Adapter {
    pub fn new(
        timeout: Duration,
        launcher: Box<dyn HandlerLauncher>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            timeout,
            launcher,
            sink,
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(
            config.timeout,
            Box::new(NodeLauncher::from_config(config)),
            Arc::new(TracingSink),
        )
    }

    /// Handle one platform event. Never fails: every error is folded into the returned value.
    pub async fn handle(&self, event: Value) -> Value {
        self.invoke(&event).await.into_value()
    }

    pub async fn invoke(&self, event: &Value) -> InvocationResult {
        match self.try_invoke(event).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(kind = err.kind(), "Invocation failed: {}", err);
                err.into()
            }
        }
    }

    async fn try_invoke(&self, event: &Value) -> Result<InvocationResult, AdapterError> {
        let pretty = serde_json::to_string_pretty(event).map_err(AdapterError::EventSerialization)?;
        self.sink.record(&format!("Adapter received event: {}", pretty));

        let event_json = serde_json::to_string(event).map_err(AdapterError::EventSerialization)?;
        let output = self.run_handler(&event_json).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        self.sink.record(&format!("Node.js stdout: {}", stdout));
        if !stderr.is_empty() {
            self.sink.record(&format!("Node.js stderr: {}", stderr));
        }

        match protocol::find_tagged_line(&stdout) {
            Some(TaggedLine::Result(payload)) => {
                Ok(InvocationResult::Success(protocol::parse_result(payload)?))
            }
            Some(TaggedLine::Error(payload)) => {
                let failure = protocol::parse_failure(payload)?;
                Ok(InvocationResult::HandlerFailed {
                    error: failure.message(),
                    details: failure.details(),
                })
            }
            None => Ok(InvocationResult::NoStructuredOutput {
                stdout,
                stderr,
                returncode: exit_code(output.status),
            }),
        }
    }

    async fn run_handler(&self, event_json: &str) -> Result<Output, AdapterError> {
        let mut child = self
            .launcher
            .command()
            .spawn()
            .map_err(AdapterError::Launch)?;
        let feed = feed_stdin(child.stdin.take(), event_json.as_bytes());

        // stdin is written while stdout/stderr drain, so a chatty child cannot stall the write.
        // Dropping the pending future on timeout kills the child (kill_on_drop).
        let exchange = async move { tokio::join!(feed, child.wait_with_output()) };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok((fed, output)) => {
                fed?;
                output.map_err(AdapterError::Output)
            }
            Err(_) => Err(AdapterError::Timeout(self.timeout)),
        }
    }
}

/// Write the event and close the pipe so the child sees EOF.
async fn feed_stdin(stdin: Option<ChildStdin>, payload: &[u8]) -> Result<(), AdapterError> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(payload).await {
        Ok(()) => Ok(()),
        // the child exited or closed stdin without reading it all
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(AdapterError::Input(e)),
    }
}

/// Exit code, or the negated signal number when the child was killed by a signal.
fn exit_code(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|sig| -sig))
    }

    #[cfg(not(unix))]
    {
        status.code()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use std::process::Stdio;
    use tokio::process::Command;

    /// Ignores the event and runs a fixed shell script in place of Node.js.
    struct ShellLauncher(&'static str);

    impl HandlerLauncher for ShellLauncher {
        fn command(&self) -> Command {
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg(self.0)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            command
        }
    }

    /// Echoes the event JSON read from stdin, prefixed as a result.
    struct EchoLauncher;

    impl HandlerLauncher for EchoLauncher {
        fn command(&self) -> Command {
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg("printf 'RUNPOD_RESULT:'; cat")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            command
        }
    }

    fn adapter(script: &'static str) -> (Adapter, Arc<MemorySink>) {
        adapter_with_timeout(script, Duration::from_secs(10))
    }

    fn adapter_with_timeout(script: &'static str, timeout: Duration) -> (Adapter, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let adapter = Adapter::new(timeout, Box::new(ShellLauncher(script)), sink.clone());
        (adapter, sink)
    }

    fn health_event() -> Value {
        json!({"input": {"action": "health"}})
    }

    #[tokio::test]
    async fn test_result_line_is_passed_through() {
        let (adapter, _) = adapter(r#"echo 'warming up'; echo 'RUNPOD_RESULT:{"status": "ok"}'"#);
        let result = adapter.handle(health_event()).await;
        assert_eq!(result, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_event_round_trips_through_process() {
        let sink = Arc::new(MemorySink::default());
        let adapter = Adapter::new(Duration::from_secs(10), Box::new(EchoLauncher), sink);
        let event = json!({"input": {"prompt": "a \"quoted\" cat", "steps": 30, "seed": null}});
        assert_eq!(adapter.handle(event.clone()).await, event);
    }

    #[tokio::test]
    async fn test_large_event_goes_over_stdin() {
        let sink = Arc::new(MemorySink::default());
        let adapter = Adapter::new(Duration::from_secs(10), Box::new(EchoLauncher), sink);
        let event = json!({"input": {"video": "x".repeat(300_000)}});
        assert_eq!(adapter.handle(event.clone()).await, event);
    }

    #[tokio::test]
    async fn test_child_ignoring_stdin_still_reports() {
        let (adapter, _) = adapter(r#"exec 0<&-; echo 'RUNPOD_RESULT:"done"'"#);
        let event = json!({"input": {"blob": "y".repeat(300_000)}});
        assert_eq!(adapter.handle(event).await, json!("done"));
    }

    #[tokio::test]
    async fn test_error_line_maps_to_error_and_details() {
        let (adapter, _) = adapter(
            r#"printf '%s\n' 'RUNPOD_ERROR:{"error":"model not loaded","stack":"Error: model not loaded\n    at handler"}'"#,
        );
        let result = adapter.handle(health_event()).await;
        assert_eq!(
            result,
            json!({
                "error": "model not loaded",
                "details": "Error: model not loaded\n    at handler",
            })
        );
    }

    #[tokio::test]
    async fn test_error_line_without_fields_uses_defaults() {
        let (adapter, _) = adapter("echo 'RUNPOD_ERROR:{}'");
        let result = adapter.handle(health_event()).await;
        assert_eq!(
            result,
            json!({"error": "Unknown error", "details": "No stack trace"})
        );
    }

    #[tokio::test]
    async fn test_first_tagged_line_wins() {
        let (adapter, _) = adapter(
            r#"echo 'RUNPOD_ERROR:{"error":"first"}'; echo 'RUNPOD_RESULT:{"status":"ok"}'"#,
        );
        let result = adapter.handle(health_event()).await;
        assert_eq!(
            result,
            json!({"error": "first", "details": "No stack trace"})
        );
    }

    #[tokio::test]
    async fn test_missing_sentinel_returns_raw_output() {
        let (adapter, _) = adapter("echo 'just logs'; echo 'oops' >&2; exit 3");
        let result = adapter.handle(health_event()).await;
        assert_eq!(
            result,
            json!({
                "error": NO_STRUCTURED_OUTPUT,
                "stdout": "just logs\n",
                "stderr": "oops\n",
                "returncode": 3,
            })
        );
    }

    #[tokio::test]
    async fn test_signal_reports_negative_returncode() {
        let (adapter, _) = adapter("kill -9 $$");
        let result = adapter.handle(health_event()).await;
        assert_eq!(result["returncode"], json!(-9));
    }

    #[tokio::test]
    async fn test_timeout_returns_only_error() {
        let (adapter, _) = adapter_with_timeout(
            "echo 'RUNPOD_RESULT:{}'; sleep 5",
            Duration::from_millis(200),
        );
        let result = adapter.handle(health_event()).await;
        assert_eq!(result, json!({"error": "Handler timeout (200 ms exceeded)"}));
        assert_eq!(result.as_object().map(|o| o.len()), Some(1));
    }

    #[test]
    fn test_default_timeout_message() {
        let value = InvocationResult::Timeout(Duration::from_secs(300)).into_value();
        assert_eq!(value, json!({"error": "Handler timeout (5 minutes exceeded)"}));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_orchestration_error() {
        let (adapter, _) = adapter("echo 'RUNPOD_RESULT:undefined'");
        let result = adapter.handle(health_event()).await;
        assert_eq!(result["type"], json!("MalformedPayload"));
        let message = result["error"].as_str().unwrap_or_default();
        assert!(message.starts_with("Python wrapper error: malformed RUNPOD_RESULT payload"));
    }

    #[tokio::test]
    async fn test_launch_failure_is_orchestration_error() {
        let config = AdapterConfig {
            node_binary: "/nonexistent/bin/node".to_string(),
            ..AdapterConfig::default()
        };
        let sink = Arc::new(MemorySink::default());
        let adapter = Adapter::new(
            config.timeout,
            Box::new(NodeLauncher::from_config(&config)),
            sink,
        );
        let result = adapter.handle(health_event()).await;
        assert_eq!(result["type"], json!("Launch"));
        assert_eq!(result.as_object().map(|o| o.len()), Some(2));
    }

    #[tokio::test]
    async fn test_diagnostics_record_event_and_streams() {
        let (adapter, sink) = adapter(r#"echo 'RUNPOD_RESULT:1'; echo 'deprecation warning' >&2"#);
        adapter.handle(health_event()).await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Adapter received event: {"));
        assert!(lines[0].contains("\"action\": \"health\""));
        assert_eq!(lines[1], "Node.js stdout: RUNPOD_RESULT:1\n");
        assert_eq!(lines[2], "Node.js stderr: deprecation warning\n");
    }

    #[tokio::test]
    async fn test_empty_stderr_is_not_recorded() {
        let (adapter, sink) = adapter("echo 'RUNPOD_RESULT:true'");
        assert_eq!(adapter.handle(health_event()).await, json!(true));
        assert_eq!(sink.lines().len(), 2);
    }
}
