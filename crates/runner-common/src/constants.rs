// Well-known names shared by the supervisor: install layout, host endpoints
// and process exit codes.

use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Files the runner installer drops next to its scripts.
///
/// The supervisor only probes for them; it never writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownConfigFile {
    /// Runner identity written by `config.sh` (`.runner`).
    Runner,
    /// Credentials written by `config.sh` (`.credentials`).
    Credentials,
}

impl WellKnownConfigFile {
    pub fn file_name(self) -> &'static str {
        match self {
            WellKnownConfigFile::Runner => ".runner",
            WellKnownConfigFile::Credentials => ".credentials",
        }
    }
}

impl fmt::Display for WellKnownConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Scripts shipped in the runner install directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownScript {
    /// `run.sh`: listens for and executes jobs.
    Run,
    /// `config.sh`: registers and removes the runner.
    Config,
}

impl WellKnownScript {
    pub fn file_name(self) -> &'static str {
        match self {
            WellKnownScript::Run => "run.sh",
            WellKnownScript::Config => "config.sh",
        }
    }
}

impl fmt::Display for WellKnownScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

pub mod host {
    /// Every registration URL must start with this prefix.
    pub const URL_PREFIX: &str = "https://github.com/";
    pub const DEFAULT_API_URL: &str = "https://api.github.com";
    pub const API_VERSION: &str = "2022-11-28";
    pub const ACCEPT: &str = "application/vnd.github+json";
}

pub mod endpoints {
    pub const REGISTRATION_TOKEN: &str = "actions/runners/registration-token";
    pub const REMOVE_TOKEN: &str = "actions/runners/remove-token";

    /// GitHub App installation token exchange.
    pub fn installation_access_token(installation_id: i64) -> String {
        format!("/app/installations/{installation_id}/access_tokens")
    }
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Arguments understood by `config.sh` and `run.sh`.
pub mod command_line {
    pub mod commands {
        pub const REMOVE: &str = "remove";
    }

    pub mod args {
        pub const URL: &str = "--url";
        pub const NAME: &str = "--name";
        pub const WORK: &str = "--work";
        pub const LABELS: &str = "--labels";
        pub const TOKEN: &str = "--token";
    }

    pub mod flags {
        pub const UNATTENDED: &str = "--unattended";
        pub const REPLACE: &str = "--replace";
        pub const ONCE: &str = "--once";
    }
}

// ---------------------------------------------------------------------------
// Return codes
// ---------------------------------------------------------------------------

/// Exit codes of the supervisor process itself.
pub mod return_code {
    pub const SUCCESS: i32 = 0;
    pub const TERMINATED_ERROR: i32 = 1;
    /// The runner could not be removed and is still registered on the host.
    pub const REMOVAL_FAILED: i32 = 2;
}

// ---------------------------------------------------------------------------
// Environment variables
// ---------------------------------------------------------------------------

pub mod variables {
    pub const TLS_NO_VERIFY: &str = "GITHUB_ACTIONS_RUNNER_TLS_NO_VERIFY";
    pub const RUNNER_LABELS: &str = "RUNNER_LABELS";
}
