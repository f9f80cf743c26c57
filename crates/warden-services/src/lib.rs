//! # Warden Services
//!
//! External service client implementations for Warden.
//!
//! This crate provides async clients for:
//! - **Vault**: HashiCorp Vault KV v2 secret storage, used by the external
//!   credential backend
//! - **Ad-hoc runner**: a [`warden_types::RemoteExecutor`] that shells out to
//!   an `ansible`-compatible ad-hoc command

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adhoc;
pub mod vault;

pub use adhoc::AdHocExecutor;
pub use vault::{VaultClient, VaultConfig};
