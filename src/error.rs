//! Errors raised while orchestrating one handler invocation.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to serialize event: {0}")]
    EventSerialization(#[source] serde_json::Error),

    #[error("failed to launch handler process: {0}")]
    Launch(#[source] std::io::Error),

    #[error("failed to send event to handler process: {0}")]
    Input(#[source] std::io::Error),

    #[error("failed to collect handler output: {0}")]
    Output(#[source] std::io::Error),

    #[error("malformed {tag} payload: {source}")]
    MalformedPayload {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler did not finish within {0:?}")]
    Timeout(Duration),
}

impl AdapterError {
    /// Stable name reported in the `type` field of orchestration errors.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::EventSerialization(_) => "EventSerialization",
            AdapterError::Launch(_) => "Launch",
            AdapterError::Input(_) => "Input",
            AdapterError::Output(_) => "Output",
            AdapterError::MalformedPayload { .. } => "MalformedPayload",
            AdapterError::Timeout(_) => "Timeout",
        }
    }
}
