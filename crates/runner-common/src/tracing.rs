// Named trace sources that mask secrets before handing lines to `tracing`.

use crate::secret_masker::SecretMasker;
use runner_sdk::TraceWriter;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceEventType {
    Verbose,
    Information,
    Warning,
    Error,
}

/// A per-component trace source. All sources from one [`TraceManager`] share
/// its `SecretMasker`, so a token registered anywhere is masked everywhere.
#[derive(Clone)]
pub struct Tracing {
    name: String,
    secret_masker: Arc<SecretMasker>,
}

impl Tracing {
    /// A source named `name` that masks through `secret_masker`.
    pub fn new(name: impl Into<String>, secret_masker: Arc<SecretMasker>) -> Self {
        Self {
            name: name.into(),
            secret_masker,
        }
    }

    fn trace(&self, event_type: TraceEventType, message: &str) {
        let masked = self.secret_masker.mask_secrets(message);
        let component = self.name.as_str();

        match event_type {
            TraceEventType::Error => tracing::error!(component, "{}", masked),
            TraceEventType::Warning => tracing::warn!(component, "{}", masked),
            TraceEventType::Information => tracing::info!(component, "{}", masked),
            TraceEventType::Verbose => tracing::debug!(component, "{}", masked),
        }
    }

    /// Log an error followed by its chain of sources.
    pub fn error_err(&self, err: &dyn std::error::Error) {
        self.error(&err.to_string());
        let mut source = err.source();
        while let Some(cause) = source {
            self.error(&format!("  caused by: {cause}"));
            source = cause.source();
        }
    }
}

impl TraceWriter for Tracing {
    fn info(&self, message: &str) {
        self.trace(TraceEventType::Information, message);
    }

    fn verbose(&self, message: &str) {
        self.trace(TraceEventType::Verbose, message);
    }

    fn warning(&self, message: &str) {
        self.trace(TraceEventType::Warning, message);
    }

    fn error(&self, message: &str) {
        self.trace(TraceEventType::Error, message);
    }
}

/// Hands out named [`Tracing`] sources sharing one secret masker.
#[derive(Clone, Default)]
pub struct TraceManager {
    secret_masker: Arc<SecretMasker>,
}

impl TraceManager {
    /// A trace source tagged with `name` as its `component` field.
    pub fn get(&self, name: &str) -> Tracing {
        Tracing::new(name, self.secret_masker.clone())
    }

    /// The masker shared by every source from this manager.
    pub fn secret_masker(&self) -> &Arc<SecretMasker> {
        &self.secret_masker
    }
}
