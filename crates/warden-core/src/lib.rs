//! # Warden Core
//!
//! Core utilities, configuration management, logging, and common functionality
//! for the Warden credential rotation platform.
//!
//! This crate provides:
//!
//! - **Configuration**: Multi-layer configuration (defaults, file, set, environment)
//! - **Logging**: Structured logging with multiple outputs and formats
//! - **Process Execution**: Async command execution with secret redaction
//! - **File Operations**: Atomic writes, path expansion
//! - **Time Utilities**: Duration and relative time formatting
//! - **Data Structures**: Deep merging and dotted-path access
//!
//! ## Example
//!
//! ```no_run
//! use warden_core::config::WardenConfig;
//!
//! let config = WardenConfig::load()?;
//! let _guards = warden_core::log::init(&config.logs, "warden=info")?;
//! # Ok::<(), warden_types::WardenError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod log;
pub mod time;
pub mod util;

// Re-export commonly used items
pub use config::{Config, WardenConfig};
pub use warden_types::{Result, WardenError};

/// Warden application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Warden application name
pub const APP_NAME: &str = "warden";
