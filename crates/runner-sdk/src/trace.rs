/// Diagnostic sink used by the process invoker and the lifecycle controller.
///
/// Implementations decide where a line goes; `runner-common` provides one that
/// masks secrets and forwards to the `tracing` crate.
pub trait TraceWriter: Send + Sync {
    /// Progress worth seeing at the default log level.
    fn info(&self, message: &str);

    /// Detail for debugging, hidden by default.
    fn verbose(&self, message: &str);

    /// Something unexpected that did not stop the operation.
    fn warning(&self, message: &str) {
        self.info(&format!("##[warning]{message}"));
    }

    /// A failure the caller is about to report.
    fn error(&self, message: &str) {
        self.info(&format!("##[error]{message}"));
    }
}

/// Discards everything.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct NullTraceWriter;

#[cfg(test)]
impl TraceWriter for NullTraceWriter {
    fn info(&self, _message: &str) {}
    fn verbose(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Level a [`CollectingTraceWriter`] line was recorded at.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLevel {
    Info,
    Verbose,
    Warning,
    Error,
}

/// Keeps every line in memory so tests can assert on what was traced.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct CollectingTraceWriter {
    messages: parking_lot::Mutex<Vec<(TraceLevel, String)>>,
}

#[cfg(test)]
impl CollectingTraceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded line, oldest first.
    pub fn messages(&self) -> Vec<(TraceLevel, String)> {
        self.messages.lock().clone()
    }

    /// Number of lines recorded at `level`.
    pub fn count(&self, level: TraceLevel) -> usize {
        self.messages.lock().iter().filter(|(l, _)| *l == level).count()
    }

    fn push(&self, level: TraceLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

#[cfg(test)]
impl TraceWriter for CollectingTraceWriter {
    fn info(&self, message: &str) {
        self.push(TraceLevel::Info, message);
    }

    fn verbose(&self, message: &str) {
        self.push(TraceLevel::Verbose, message);
    }

    fn warning(&self, message: &str) {
        self.push(TraceLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(TraceLevel::Error, message);
    }
}
