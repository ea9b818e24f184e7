/// Receives the adapter's observational log lines. Never read back by the adapter.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, line: &str);
}

/// Default sink: every line becomes a `tracing` info event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, line: &str) {
        tracing::info!("{}", line);
    }
}

/// Keeps recorded lines in memory, for inspecting diagnostics in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl DiagnosticSink for MemorySink {
    fn record(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
