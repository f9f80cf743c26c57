//! # Warden Credentials
//!
//! Versioned credential storage.
//!
//! Every (asset, username) identity owns an append-only log of
//! [`CredentialRecord`](warden_types::CredentialRecord)s. Exactly one record
//! per identity is the latest; a new version flips the previous latest off
//! in the same serialized transaction.
//!
//! Two [`CredentialBackend`](warden_types::CredentialBackend) variants exist:
//! - [`LocalBackend`]: the built-in [`CredentialStore`], optionally
//!   persisted as one JSON log per identity
//! - [`VaultBackend`]: versions kept in a Vault KV engine with a `latest`
//!   pointer per identity
//!
//! Pick one with [`build_backend`] at start-up.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
mod locks;
pub mod store;

pub use backend::{build_backend, LocalBackend, VaultBackend};
pub use store::CredentialStore;
