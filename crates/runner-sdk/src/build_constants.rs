/// Build metadata stamped in at compile time, with fallbacks for local builds.

/// Source control information.
pub struct Source;

impl Source {
    /// Set via `RUNNER_COMMIT_HASH` at compile time, or "none".
    pub const COMMIT_HASH: &'static str = match option_env!("RUNNER_COMMIT_HASH") {
        Some(h) => h,
        None => "none",
    };

    /// Set via `RUNNER_BUILD_DATE` at compile time, or "unknown".
    pub const BUILD_DATE: &'static str = match option_env!("RUNNER_BUILD_DATE") {
        Some(d) => d,
        None => "unknown",
    };
}

/// Supervisor package metadata.
#[derive(Debug, Clone)]
pub struct RunnerPackage;

impl RunnerPackage {
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    pub const PACKAGE_NAME: &'static str = "runner-supervisor";
}
