//! Configuration types and structures.

use crate::enums::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Credential backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Built-in versioned store
    Local {
        /// Directory holding version logs; in-memory only when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    /// HashiCorp Vault KV v2
    Vault {
        /// Vault URL
        url: String,
        /// KV v2 mount
        #[serde(default = "default_mount")]
        mount: String,
        /// Path prefix under the mount
        #[serde(default = "default_prefix")]
        prefix: String,
        /// Vault namespace (for enterprise Vault)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        /// Token; `VAULT_TOKEN` takes precedence
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        /// Whether to skip TLS verification (insecure)
        #[serde(default)]
        insecure: bool,
    },
}

impl BackendConfig {
    /// The variant this configuration selects.
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Local { .. } => BackendKind::Local,
            BackendConfig::Vault { .. } => BackendKind::Vault,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local { path: None }
    }
}

fn default_mount() -> String {
    "secret".to_string()
}

fn default_prefix() -> String {
    "warden/credentials".to_string()
}

/// Secret codec key source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Base64 encoded 32-byte key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Environment variable holding the base64 key or a passphrase
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            key: None,
            key_env: default_key_env(),
        }
    }
}

fn default_key_env() -> String {
    "WARDEN_SECRET_KEY".to_string()
}

/// Rotation engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrent host sessions per run
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per remote call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts at committing a verified credential
    #[serde(default = "default_store_retries")]
    pub store_retries: u32,
    /// Accounts that may never be rotated
    #[serde(default = "default_reserved_accounts")]
    pub reserved_accounts: Vec<String>,
    /// Length of generated passwords
    #[serde(default = "default_password_length")]
    pub password_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            store_retries: default_store_retries(),
            reserved_accounts: default_reserved_accounts(),
            password_length: default_password_length(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_store_retries() -> u32 {
    3
}

fn default_reserved_accounts() -> Vec<String> {
    vec!["root".to_string()]
}

fn default_password_length() -> usize {
    24
}

/// Ad-hoc runner executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Runner program
    #[serde(default = "default_program")]
    pub program: String,
    /// Extra arguments passed before the module arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            extra_args: Vec::new(),
        }
    }
}

fn default_program() -> String {
    "ansible".to_string()
}

/// Log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log file path; stderr when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Log level for this output
    pub level: crate::LogLevel,
    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format with colors
    Pretty,
    /// JSON format for machine parsing
    Json,
    /// Compact single-line format
    Compact,
}
