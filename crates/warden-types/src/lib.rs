//! # Warden Types
//!
//! Core types, traits, and enums shared across all Warden crates.
//!
//! This crate provides the fundamental building blocks for the Warden
//! credential rotation platform, including:
//!
//! - Validated identifiers for assets, accounts, tasks and runs
//! - Credential records and zeroizing secret material
//! - The remote executor contract (invocations, auth, per-host reports)
//! - Core traits for codecs, credential backends, executors and inventories
//! - Error types and result aliases
//!
//! ## Example
//!
//! ```
//! use warden_types::{AssetId, Username, CredentialIdentity};
//!
//! let identity = CredentialIdentity::new(
//!     AssetId::new("web-01").unwrap(),
//!     Username::new("deploy").unwrap(),
//! );
//! assert_eq!(identity.to_string(), "deploy@web-01");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod enums;
pub mod errors;
pub mod execution;
pub mod identifiers;
pub mod records;
pub mod traits;

// Re-export common types for convenience
pub use enums::{BackendKind, LogLevel, StepOutcome, SubtaskState};
pub use errors::{RemoteFailure, Result, ValidationError, WardenError};
pub use execution::{
    AuthContext, ExecutionOptions, ExecutionReport, HostConnection, HostResult, ModuleInvocation,
    ModuleResult,
};
pub use identifiers::{AssetId, CredentialIdentity, RecordId, RunId, SubtaskId, TaskId, Username};
pub use records::{
    CredentialFilter, CredentialMetadata, CredentialRecord, CredentialView, SealedSecret,
    SecretMaterial,
};
pub use traits::{CredentialBackend, Inventory, RemoteExecutor, SecretCodec, VaultStore};
