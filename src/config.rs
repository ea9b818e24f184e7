use std::env;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_NODE_BINARY: &str = "node";
pub const DEFAULT_HANDLER_MODULE: &str = "./handler.js";

/// Settings for one adapter instance, read once at cold start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub timeout: Duration,
    pub node_binary: String,
    pub handler_module: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            node_binary: DEFAULT_NODE_BINARY.to_string(),
            handler_module: DEFAULT_HANDLER_MODULE.to_string(),
        }
    }
}

impl AdapterConfig {
    // HANDLER_TIMEOUT_SECS, NODE_BINARY, HANDLER_MODULE; unset or invalid values keep the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let timeout = lookup("HANDLER_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let node_binary = lookup("NODE_BINARY")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.node_binary);

        let handler_module = lookup("HANDLER_MODULE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.handler_module);

        Self {
            timeout,
            node_binary,
            handler_module,
        }
    }
}

/// Human-readable rendering of a timeout, e.g. "5 minutes" or "2 seconds".
pub fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };

    if secs == 0 {
        format!("{} ms", duration.as_millis())
    } else if secs % 60 == 0 {
        plural(secs / 60, "minute")
    } else {
        plural(secs, "second")
    }
}
