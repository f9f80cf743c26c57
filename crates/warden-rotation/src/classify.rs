//! Classification of per-host executor results.

use once_cell::sync::Lazy;
use regex::Regex;
use warden_types::{HostResult, RemoteFailure, StepOutcome, WardenError};

static AUTH_FAILURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(permission denied|authentication fail|auth(entication)? error|invalid (user|password|credentials)|incorrect password|login incorrect|access denied|logon failure|bad password)",
    )
    .expect("static regex")
});

/// Outcome of one remote step against one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Classified outcome
    pub outcome: StepOutcome,
    /// Executor or module message
    pub message: String,
}

impl StepReport {
    /// A report with an explicit outcome.
    pub fn new(outcome: StepOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }

    /// Whether the step succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Report for an executor call that returned an error.
    ///
    /// Classified remote failures keep their class; anything else is a
    /// module error.
    pub fn from_error(error: WardenError) -> Self {
        match error {
            WardenError::Remote(RemoteFailure::Unreachable(msg)) => Self::new(StepOutcome::Unreachable, msg),
            WardenError::Remote(RemoteFailure::AuthFailure(msg)) => Self::new(StepOutcome::AuthFailure, msg),
            WardenError::Remote(RemoteFailure::ModuleError(msg)) => Self::new(StepOutcome::ModuleError, msg),
            other => Self::new(StepOutcome::ModuleError, other.to_string()),
        }
    }

    /// The failure as an error value, if the step failed.
    pub fn failure(&self) -> Option<RemoteFailure> {
        let message = self.message.clone();
        match self.outcome {
            StepOutcome::Success => None,
            StepOutcome::Unreachable => Some(RemoteFailure::Unreachable(message)),
            StepOutcome::AuthFailure => Some(RemoteFailure::AuthFailure(message)),
            StepOutcome::ModuleError => Some(RemoteFailure::ModuleError(message)),
        }
    }
}

/// Classify a host's result.
///
/// A host missing from the report is unreachable. Rejected credentials are
/// recognised from the message whether the executor flagged the host as
/// unreachable or as failed.
pub fn classify(result: Option<&HostResult>) -> StepReport {
    let Some(result) = result else {
        return StepReport::new(StepOutcome::Unreachable, "host missing from executor report");
    };

    let message = result.module_result.message.clone();
    let outcome = if result.contacted && !result.unreachable && result.module_result.success {
        StepOutcome::Success
    } else if AUTH_FAILURE_RE.is_match(&message) {
        StepOutcome::AuthFailure
    } else if result.unreachable || !result.contacted {
        StepOutcome::Unreachable
    } else {
        StepOutcome::ModuleError
    };

    StepReport::new(outcome, message)
}
