//! Error types for Warden operations.

use std::fmt;
use thiserror::Error;

/// The main error type for Warden operations.
///
/// Subtask-level failures (remote execution, store conflicts) are normally
/// captured as data in the run history. They only surface as errors from
/// the low-level collaborators that produce them.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A task or request was rejected before any work started
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A remote execution step failed
    #[error("Remote execution error: {0}")]
    Remote(RemoteFailure),

    /// The credential versioning transaction could not commit
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    /// Sealing or revealing secret material failed
    #[error("Secret codec error: {0}")]
    Codec(String),

    /// External secret manager error
    #[error("Secret backend error: {0}")]
    Backend(String),

    /// A referenced task, run, asset or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal bug - should never happen in production
    #[error("Bug detected: {0}\n\nThis is an internal error. Please report this issue at:\nhttps://github.com/warden-pam/warden/issues")]
    Bug(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl WardenError {
    /// Whether the error is a versioning conflict the caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WardenError::PersistenceConflict(_))
    }
}

/// Reasons a rotation task is refused before a run is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The task targets a reserved account such as `root`
    #[error("disallowed-account")]
    DisallowedAccount(String),

    /// The task resolved to no hosts
    #[error("empty-target-set")]
    EmptyTargetSet,

    /// An identifier failed its syntax check
    #[error("invalid-identifier: {0}")]
    InvalidIdentifier(String),
}

impl ValidationError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::DisallowedAccount(_) => "disallowed-account",
            ValidationError::EmptyTargetSet => "empty-target-set",
            ValidationError::InvalidIdentifier(_) => "invalid-identifier",
        }
    }
}

/// Remote execution failure classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// Host could not be contacted or timed out
    Unreachable(String),
    /// Host was contacted but refused the credentials
    AuthFailure(String),
    /// The module ran and reported failure
    ModuleError(String),
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFailure::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            RemoteFailure::AuthFailure(msg) => write!(f, "auth-failure: {}", msg),
            RemoteFailure::ModuleError(msg) => write!(f, "module-error: {}", msg),
        }
    }
}

/// A specialized Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

/// Helper macro to create and return a WardenError::Bug
///
/// This should be used for conditions that should never occur
/// in normal operation and indicate a bug in Warden itself.
#[macro_export]
macro_rules! bug {
    ($msg:expr) => {
        return Err($crate::WardenError::Bug($msg.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::WardenError::Bug(format!($fmt, $($arg)*)))
    };
}

/// Helper macro to bail out with a WardenError
///
/// # Example
///
/// ```ignore
/// if concurrency == 0 {
///     bail!(Config, "engine.concurrency must be at least 1");
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($variant:ident, $msg:expr) => {
        return Err($crate::WardenError::$variant($msg.to_string()))
    };
    ($variant:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::WardenError::$variant(format!($fmt, $($arg)*)))
    };
    ($msg:expr) => {
        return Err($crate::WardenError::Other($msg.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::WardenError::Other(format!($fmt, $($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_codes() {
        let err = WardenError::from(ValidationError::DisallowedAccount("root".into()));
        assert_eq!(err.to_string(), "Validation error: disallowed-account");
        assert_eq!(ValidationError::EmptyTargetSet.code(), "empty-target-set");
    }

    #[test]
    fn test_conflict_detection() {
        assert!(WardenError::PersistenceConflict("busy".into()).is_conflict());
        assert!(!WardenError::Backend("down".into()).is_conflict());
    }
}
