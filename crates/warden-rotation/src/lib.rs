//! # Warden Rotation
//!
//! Password rotation for managed hosts.
//!
//! A [`RotationTask`] names an account and a set of assets. Each run of a
//! task changes the account's password on every host, verifies the new
//! password by logging in with it, and only then records it as the latest
//! credential version. A failed host never loses its last known-good
//! credential.
//!
//! - [`catalog`]: task and asset definitions loaded from YAML, plus the
//!   static [`Inventory`](warden_types::Inventory)
//! - [`engine`]: the per-run orchestration and worker pool
//! - [`history`]: run and per-host subtask records
//! - [`service`]: trigger, cancel and query runs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod classify;
pub mod engine;
pub mod history;
pub mod service;
pub mod task;

#[cfg(test)]
mod testing;

pub use catalog::{AssetEntry, StaticInventory, TaskCatalog};
pub use engine::RotationEngine;
pub use history::{HistoryStore, RunCounts, RunHistory, RunSnapshot, SubtaskHistory};
pub use service::RotationService;
pub use task::RotationTask;
