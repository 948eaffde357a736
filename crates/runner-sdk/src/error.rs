// Error taxonomy shared by every layer of the supervisor.
// Callers branch on `RunnerError::kind()` instead of comparing error identities.

use std::fmt;
use std::path::PathBuf;

/// Boxed error used for transport failures coming from behind a trait seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`RunnerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed configuration input.
    Parameter,
    /// Target executable missing or lacking an execute bit at construction time.
    Executable,
    /// Child process failed to launch, exited non-zero, or was cancelled.
    Process,
    /// The host API refused or failed a token request.
    TokenRequest,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Parameter => write!(f, "parameter error"),
            ErrorKind::Executable => write!(f, "executable error"),
            ErrorKind::Process => write!(f, "process error"),
            ErrorKind::TokenRequest => write!(f, "token request error"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid command path {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("command is not executable {}", path.display())]
    NotExecutable { path: PathBuf },

    #[error("cannot inspect command path {}", path.display())]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start process '{}'", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Exit code {exit_code} returned from process: file name '{}', arguments '{arguments}'.", path.display())]
    ExitCode {
        exit_code: i32,
        path: PathBuf,
        arguments: String,
    },

    #[error("process '{}' was cancelled", path.display())]
    Cancelled { path: PathBuf },

    #[error("github request failed: unexpected status {status} from {endpoint}")]
    RequestFailed { endpoint: String, status: u16 },

    #[error("github request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to decode response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context}: {inner}")]
    Context {
        context: String,
        inner: Box<RunnerError>,
    },
}

impl RunnerError {
    /// The discriminant of this error. `Context` reports the kind of the error it wraps.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::MissingParameter(_) | RunnerError::InvalidParameter(_) => {
                ErrorKind::Parameter
            }
            RunnerError::ExecutableNotFound { .. }
            | RunnerError::NotExecutable { .. }
            | RunnerError::Inaccessible { .. } => ErrorKind::Executable,
            RunnerError::Launch { .. }
            | RunnerError::ExitCode { .. }
            | RunnerError::Cancelled { .. } => ErrorKind::Process,
            RunnerError::RequestFailed { .. }
            | RunnerError::Transport { .. }
            | RunnerError::Decode { .. } => ErrorKind::TokenRequest,
            RunnerError::Context { inner, .. } => inner.kind(),
        }
    }

    /// Wrap this error with a context message, keeping its kind.
    pub fn context(self, context: impl Into<String>) -> Self {
        RunnerError::Context {
            context: context.into(),
            inner: Box::new(self),
        }
    }

    /// The exit code of a failed child process, looking through any context wrappers.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunnerError::ExitCode { exit_code, .. } => Some(*exit_code),
            RunnerError::Context { inner, .. } => inner.exit_code(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            RunnerError::Cancelled { .. } => true,
            RunnerError::Context { inner, .. } => inner.is_cancelled(),
            _ => false,
        }
    }
}
