//! Configuration management for Warden.
//!
//! This module provides multi-layer configuration support with:
//! - File-based configuration (YAML)
//! - Environment variable overrides (`WARDEN_*`)
//! - Programmatic updates
//! - Schema validation
//!
//! ## Configuration Layers
//!
//! Configuration values are resolved in this priority order:
//! 1. Environment variables
//! 2. Programmatically set values
//! 3. Values loaded from file
//! 4. Default values
//!
//! Environment variables map onto dotted keys by stripping the prefix,
//! lowercasing, and splitting on `__`: `WARDEN_ENGINE__CONCURRENCY=8`
//! sets `engine.concurrency`. Values are parsed as YAML scalars.
//!
//! ## Example
//!
//! ```no_run
//! use warden_core::config::WardenConfig;
//!
//! let config = WardenConfig::load_from("/etc/warden/config")?;
//! assert!(config.engine.concurrency >= 1);
//! # Ok::<(), warden_types::WardenError>(())
//! ```

use crate::util::data::{deep_merge, get_path, set_path};
use crate::util::fs::expand_path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use warden_types::config::{BackendConfig, CodecConfig, EngineConfig, ExecutorConfig, LogConfig};
use warden_types::{bail, Result, WardenError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "WARDEN_";

/// Configuration layer priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLayer {
    /// Default values
    Default = 0,
    /// Values loaded from file
    Loaded = 1,
    /// Values set programmatically
    Set = 2,
    /// Values from environment variables
    Environment = 3,
}

const LAYER_ORDER: [ConfigLayer; 4] = [
    ConfigLayer::Default,
    ConfigLayer::Loaded,
    ConfigLayer::Set,
    ConfigLayer::Environment,
];

/// Low-level configuration with multi-layer support.
///
/// For the typed application configuration, see [`WardenConfig`].
#[derive(Clone, Debug, Default)]
pub struct Config {
    layers: HashMap<ConfigLayer, Value>,
    file_path: Option<PathBuf>,
    schema: Option<Value>,
}

impl Config {
    /// Create a configuration from a file path.
    ///
    /// If the file doesn't exist, an empty configuration is created.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut layers = HashMap::new();

        if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| WardenError::Config(format!("Failed to read config file: {}", e)))?;

            let value: Value = serde_yaml::from_str(&content)
                .map_err(|e| WardenError::Config(format!("Failed to parse config: {}", e)))?;

            if !value.is_null() {
                layers.insert(ConfigLayer::Loaded, value);
            }
        }

        Ok(Self {
            layers,
            file_path: Some(path.to_path_buf()),
            schema: None,
        })
    }

    /// Set the default layer.
    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.layers.insert(ConfigLayer::Default, defaults);
        self
    }

    /// Populate the environment layer from `(name, value)` pairs.
    ///
    /// Only names starting with `prefix` are considered.
    pub fn with_env<I>(mut self, prefix: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env_layer = Value::Object(Default::default());
        let mut found = false;

        for (name, raw) in vars {
            let Some(stripped) = name.strip_prefix(prefix) else {
                continue;
            };
            let key = stripped.to_lowercase().replace("__", ".");
            if key.is_empty() {
                continue;
            }
            let value: Value = serde_yaml::from_str(&raw).unwrap_or(Value::String(raw));
            set_path(&mut env_layer, &key, value)?;
            found = true;
        }

        if found {
            self.layers.insert(ConfigLayer::Environment, env_layer);
        }
        Ok(self)
    }

    /// Populate the environment layer from the process environment.
    pub fn with_process_env(self) -> Result<Self> {
        self.with_env(ENV_PREFIX, std::env::vars())
    }

    /// Get a configuration value by key, respecting layer priority.
    ///
    /// Returns None if the key doesn't exist in any layer.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        for layer in LAYER_ORDER.iter().rev() {
            if let Some(value) = self.layers.get(layer).and_then(|data| get_path(data, key)) {
                if let Ok(typed_value) = serde_json::from_value(value.clone()) {
                    return Some(typed_value);
                }
            }
        }

        None
    }

    /// Set a configuration value programmatically.
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| WardenError::Config(format!("Failed to serialize value: {}", e)))?;

        let set_layer = self
            .layers
            .entry(ConfigLayer::Set)
            .or_insert(Value::Object(Default::default()));

        set_path(set_layer, key, value)
    }

    /// Save the merged configuration to file.
    pub fn save(&self) -> Result<()> {
        let path = self
            .file_path
            .as_ref()
            .ok_or_else(|| WardenError::Config("Cannot save: no file path set".to_string()))?;

        let yaml = serde_yaml::to_string(&self.merged_data())
            .map_err(|e| WardenError::Config(format!("Failed to serialize config: {}", e)))?;

        crate::util::fs::write_atomic(path, yaml.as_bytes())
    }

    /// Get merged data from all layers.
    pub fn merged_data(&self) -> Value {
        let mut merged = Value::Object(serde_json::Map::new());

        for layer in &LAYER_ORDER {
            if let Some(layer_data) = self.layers.get(layer) {
                merged = deep_merge(merged, layer_data.clone());
            }
        }

        merged
    }

    /// Validate configuration against schema (if set).
    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.schema {
            let instance = self.merged_data();

            let compiled = jsonschema::JSONSchema::compile(schema)
                .map_err(|e| WardenError::Config(format!("Invalid schema: {}", e)))?;

            let result = compiled.validate(&instance);
            if let Err(errors) = result {
                let error_msgs: Vec<String> = errors.map(|e| format!("{}", e)).collect();
                return Err(WardenError::Config(format!(
                    "Validation failed: {}",
                    error_msgs.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Set validation schema.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// JSON schema for the application configuration.
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "backend": {
                "type": "object",
                "required": ["type"],
                "properties": {
                    "type": { "enum": ["local", "vault"] }
                }
            },
            "engine": {
                "type": "object",
                "properties": {
                    "concurrency": { "type": "integer", "minimum": 1 },
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "store_retries": { "type": "integer", "minimum": 1 },
                    "password_length": { "type": "integer", "minimum": 8, "maximum": 128 },
                    "reserved_accounts": { "type": "array", "items": { "type": "string" } }
                }
            },
            "logs": { "type": "array" }
        }
    })
}

/// Warden application configuration (`~/.warden/config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Credential backend selection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Secret codec key source
    #[serde(default)]
    pub codec: CodecConfig,

    /// Rotation engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Remote executor
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Directory for run history; in-memory only when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_path: Option<PathBuf>,

    /// Task and asset catalog file
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Log configurations
    #[serde(default)]
    pub logs: Vec<LogConfig>,
}

fn default_catalog_path() -> PathBuf {
    WardenConfig::home_dir().join("catalog.yml")
}

impl WardenConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path, applying `WARDEN_*` overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::load(expand_path(path))?
            .with_schema(schema())
            .with_process_env()?;
        Self::from_config(&config)
    }

    /// Build from an already layered configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let mut parsed: WardenConfig = serde_json::from_value(config.merged_data())
            .map_err(|e| WardenError::Config(format!("Failed to parse config: {}", e)))?;
        parsed.expand_paths();
        parsed.check()?;
        Ok(parsed)
    }

    /// Warden's home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".warden")
    }

    /// Get the default path for configuration.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config")
    }

    fn expand_paths(&mut self) {
        if let BackendConfig::Local { path: Some(path) } = &mut self.backend {
            *path = expand_path(&*path);
        }
        if let Some(path) = &mut self.history_path {
            *path = expand_path(&*path);
        }
        self.catalog_path = expand_path(&self.catalog_path);
    }

    fn check(&self) -> Result<()> {
        if self.engine.concurrency == 0 {
            bail!(Config, "engine.concurrency must be at least 1");
        }
        if self.engine.store_retries == 0 {
            bail!(Config, "engine.store_retries must be at least 1");
        }
        if self.engine.timeout_secs == 0 {
            bail!(Config, "engine.timeout_secs must be at least 1");
        }
        if self.engine.password_length < 8 {
            bail!(
                Config,
                "engine.password_length must be at least 8 (got {})",
                self.engine.password_length
            );
        }
        Ok(())
    }

    /// Copy with credentials blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.codec.key.is_some() {
            copy.codec.key = Some("<redacted>".to_string());
        }
        if let BackendConfig::Vault { token, .. } = &mut copy.backend {
            if token.is_some() {
                *token = Some("<redacted>".to_string());
            }
        }
        copy
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            codec: CodecConfig::default(),
            engine: EngineConfig::default(),
            executor: ExecutorConfig::default(),
            history_path: None,
            catalog_path: default_catalog_path(),
            logs: Vec::new(),
        }
    }
}
