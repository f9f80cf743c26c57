//! # Warden Secrets
//!
//! Secret material handling for Warden:
//! - [`AesGcmCodec`]: AES-256-GCM sealing of credential material at rest
//! - [`PasswordGenerator`]: OS-RNG backed candidate passwords for rotation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod password;

pub use codec::AesGcmCodec;
pub use password::PasswordGenerator;
