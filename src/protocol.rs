//! Line-prefix protocol between the adapter and the Node.js bootstrap.
//!
//! The bootstrap prints exactly one tagged line to stdout. Anything else the
//! handler logs is ignored, but a log line that happens to start with a
//! sentinel prefix is indistinguishable from the real one; the first tagged
//! line wins.

use serde::Deserialize;
use serde_json::Value;

use crate::error::AdapterError;

pub const RESULT_PREFIX: &str = "RUNPOD_RESULT:";
pub const ERROR_PREFIX: &str = "RUNPOD_ERROR:";

pub const UNKNOWN_ERROR: &str = "Unknown error";
pub const NO_STACK_TRACE: &str = "No stack trace";

/// A sentinel line with the raw JSON text that followed the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggedLine<'a> {
    Result(&'a str),
    Error(&'a str),
}

/// Payload of a `RUNPOD_ERROR:` line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HandlerFailure {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub stack: Option<Value>,
}

impl HandlerFailure {
    /// Message for the caller; missing or null falls back to "Unknown error".
    pub fn message(&self) -> Value {
        self.error
            .clone()
            .unwrap_or_else(|| Value::String(UNKNOWN_ERROR.to_string()))
    }

    /// Trace for the caller; missing or null falls back to "No stack trace".
    pub fn details(&self) -> Value {
        self.stack
            .clone()
            .unwrap_or_else(|| Value::String(NO_STACK_TRACE.to_string()))
    }
}

/// Scan stdout top to bottom and return the first tagged line, if any.
pub fn find_tagged_line(stdout: &str) -> Option<TaggedLine<'_>> {
    stdout.split('\n').find_map(|line| {
        if let Some(payload) = line.strip_prefix(RESULT_PREFIX) {
            Some(TaggedLine::Result(payload))
        } else {
            line.strip_prefix(ERROR_PREFIX).map(TaggedLine::Error)
        }
    })
}

pub fn parse_result(payload: &str) -> Result<Value, AdapterError> {
    serde_json::from_str(payload).map_err(|source| AdapterError::MalformedPayload {
        tag: "RUNPOD_RESULT",
        source,
    })
}

pub fn parse_failure(payload: &str) -> Result<HandlerFailure, AdapterError> {
    // `null` fields deserialize as None, so they take the defaults too
    serde_json::from_str(payload).map_err(|source| AdapterError::MalformedPayload {
        tag: "RUNPOD_ERROR",
        source,
    })
}
