//! Common enumerations used throughout Warden.

use crate::errors::{Result, ValidationError, WardenError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Log level enumeration for the logging system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// No logging
    None,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Detailed trace messages
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(LogLevel::None),
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            _ => Err(WardenError::Config(format!("Invalid log level: {}", s))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::None => write!(f, "NONE"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Trace => write!(f, "TRACE"),
        }
    }
}

/// Classification of one remote step against one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOutcome {
    /// Host contacted and the module succeeded
    Success,
    /// Host could not be contacted (includes timeouts)
    Unreachable,
    /// Host contacted but authentication was rejected
    AuthFailure,
    /// Module ran and failed, or the executor itself errored
    ModuleError,
}

impl StepOutcome {
    /// Whether the step succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Success => write!(f, "success"),
            StepOutcome::Unreachable => write!(f, "unreachable"),
            StepOutcome::AuthFailure => write!(f, "auth-failure"),
            StepOutcome::ModuleError => write!(f, "module-error"),
        }
    }
}

/// Per-host subtask state.
///
/// ```text
/// Pending -> Changing -> ChangeFailed
///                     -> Verifying -> VerifyFailed
///                                  -> Committed
/// Pending -> Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtaskState {
    /// Not yet dispatched
    Pending,
    /// Change command in flight
    Changing,
    /// Verification with the candidate credential in flight
    Verifying,
    /// Change step failed; store untouched
    ChangeFailed,
    /// Verification failed; previous latest stays authoritative
    VerifyFailed,
    /// New credential verified and stored
    Committed,
    /// Run was cancelled before this host was dispatched
    Skipped,
}

impl SubtaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubtaskState::ChangeFailed
                | SubtaskState::VerifyFailed
                | SubtaskState::Committed
                | SubtaskState::Skipped
        )
    }

    /// Whether the subtask counts against the run.
    pub fn is_failure(&self) -> bool {
        matches!(self, SubtaskState::ChangeFailed | SubtaskState::VerifyFailed)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: SubtaskState) -> bool {
        use SubtaskState::*;
        matches!(
            (self, next),
            (Pending, Changing)
                | (Pending, Skipped)
                | (Changing, ChangeFailed)
                | (Changing, Verifying)
                | (Verifying, VerifyFailed)
                | (Verifying, Committed)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: SubtaskState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(WardenError::Bug(format!(
                "illegal subtask transition {} -> {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for SubtaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubtaskState::Pending => "pending",
            SubtaskState::Changing => "changing",
            SubtaskState::Verifying => "verifying",
            SubtaskState::ChangeFailed => "change-failed",
            SubtaskState::VerifyFailed => "verify-failed",
            SubtaskState::Committed => "committed",
            SubtaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Credential backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Built-in versioned store
    Local,
    /// External secret manager (Vault KV)
    Vault,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Vault => write!(f, "vault"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(BackendKind::Local),
            "vault" => Ok(BackendKind::Vault),
            other => Err(ValidationError::InvalidIdentifier(format!("backend '{}'", other)).into()),
        }
    }
}
