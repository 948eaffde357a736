// runner-common: Shared services for the runner supervisor.
// Depends on `runner-sdk`; used by `runner-supervisor`.

pub mod constants;
pub mod http_client_factory;
pub mod secret_masker;
pub mod tracing;

pub use crate::constants::{WellKnownConfigFile, WellKnownScript};
pub use crate::http_client_factory::HttpClientFactory;
pub use crate::secret_masker::SecretMasker;
pub use crate::tracing::{TraceManager, Tracing};
