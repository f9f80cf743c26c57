//! Contract between the rotation engine and remote executors.

use crate::identifiers::{AssetId, Username};
use crate::records::SecretMaterial;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection parameters for one managed host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConnection {
    /// Asset the host belongs to
    pub asset: AssetId,
    /// Inventory hostname; results are keyed by it
    pub hostname: String,
    /// Address to connect to
    pub address: String,
    /// Port to connect to
    pub port: u16,
    /// Connection protocol (e.g. "ssh")
    pub protocol: String,
    /// Administrative account used for privileged invocations
    pub admin_user: Username,
    /// Administrative secret, if not using agent or key-based auth
    pub admin_secret: Option<SecretMaterial>,
}

/// A module invocation understood by executors.
#[derive(Clone, PartialEq, Eq)]
pub enum ModuleInvocation {
    /// Set `username`'s password on the host
    ChangePassword {
        /// Account whose password changes
        username: Username,
        /// New password material
        secret: SecretMaterial,
    },
    /// Open a session and run a no-op
    ConnectivityCheck,
}

impl ModuleInvocation {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ModuleInvocation::ChangePassword { .. } => "change-password",
            ModuleInvocation::ConnectivityCheck => "connectivity-check",
        }
    }
}

impl fmt::Debug for ModuleInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleInvocation::ChangePassword { username, .. } => f
                .debug_struct("ChangePassword")
                .field("username", username)
                .finish_non_exhaustive(),
            ModuleInvocation::ConnectivityCheck => f.write_str("ConnectivityCheck"),
        }
    }
}

/// Which identity the executor authenticates as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    /// The host's administrative account from the inventory
    Privileged,
    /// An explicit account with the given secret
    Account {
        /// Account name
        username: Username,
        /// Secret to authenticate with
        secret: SecretMaterial,
    },
}

/// Per-call executor options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Upper bound for the whole call
    pub timeout: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result reported by the module itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResult {
    /// Whether the module reported success
    pub success: bool,
    /// Module or connection message
    #[serde(default)]
    pub message: String,
}

/// Outcome for one host within an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResult {
    /// A session was established
    pub contacted: bool,
    /// The host could not be reached
    pub unreachable: bool,
    /// Module result, meaningful when contacted
    #[serde(default)]
    pub module_result: ModuleResult,
}

impl HostResult {
    /// Contacted host whose module succeeded.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            contacted: true,
            unreachable: false,
            module_result: ModuleResult {
                success: true,
                message: message.into(),
            },
        }
    }

    /// Contacted host whose module failed.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            contacted: true,
            unreachable: false,
            module_result: ModuleResult {
                success: false,
                message: message.into(),
            },
        }
    }

    /// Host that could not be reached.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            contacted: false,
            unreachable: true,
            module_result: ModuleResult {
                success: false,
                message: message.into(),
            },
        }
    }
}

/// Per-host results of one executor call.
///
/// Executors may return partial reports; hosts missing from `per_host`
/// must be treated as unreachable by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Results keyed by inventory hostname
    pub per_host: IndexMap<String, HostResult>,
}

impl ExecutionReport {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host result.
    pub fn insert(&mut self, hostname: impl Into<String>, result: HostResult) {
        self.per_host.insert(hostname.into(), result);
    }

    /// Result for one host, if reported.
    pub fn host(&self, hostname: &str) -> Option<&HostResult> {
        self.per_host.get(hostname)
    }
}
