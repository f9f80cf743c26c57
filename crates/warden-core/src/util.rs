//! Common utility functions.

pub mod data;
pub mod fs;
pub mod process;

// Re-export commonly used items
pub use data::{deep_merge, get_path, set_path};
pub use fs::{expand_path, write_atomic};
pub use process::{redact_secrets, run_async_with_env};
