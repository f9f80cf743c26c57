//! CLI command implementations.

pub mod config;
pub mod credentials;
pub mod history;
pub mod rotate;
pub mod tasks;

use anyhow::{Context as _, Result};
use std::sync::Arc;
use warden_core::WardenConfig;
use warden_credentials::build_backend;
use warden_rotation::{HistoryStore, RotationEngine, RotationService, StaticInventory, TaskCatalog};
use warden_secrets::AesGcmCodec;
use warden_services::AdHocExecutor;
use warden_types::{CredentialBackend, SecretCodec};

/// Collaborators shared by every command, built once from configuration.
pub struct Context {
    pub config: WardenConfig,
    pub codec: Arc<dyn SecretCodec>,
    pub backend: Arc<dyn CredentialBackend>,
}

impl Context {
    pub fn open(config: WardenConfig) -> Result<Self> {
        let key_file = WardenConfig::home_dir().join("master.key");
        let codec: Arc<dyn SecretCodec> = Arc::new(
            AesGcmCodec::from_config(&config.codec, &key_file).context("Failed to load the secret key")?,
        );
        let backend = build_backend(&config.backend, codec.clone())
            .context("Failed to open the credential backend")?;
        tracing::debug!(backend = %backend.kind(), "Credential backend ready");

        Ok(Self { config, codec, backend })
    }

    /// Wire the rotation service over the configured catalog, history and executor.
    pub fn service(&self) -> Result<RotationService> {
        let catalog = Arc::new(TaskCatalog::load(&self.config.catalog_path).with_context(|| {
            format!("Failed to load the task catalog from {}", self.config.catalog_path.display())
        })?);
        let inventory = Arc::new(StaticInventory::new(catalog.clone()).with_backend(self.backend.clone()));
        let executor = Arc::new(AdHocExecutor::new(&self.config.executor));
        let history = match &self.config.history_path {
            Some(path) => HistoryStore::open(path)
                .with_context(|| format!("Failed to open run history at {}", path.display()))?,
            None => HistoryStore::in_memory(),
        };

        let engine = RotationEngine::new(
            self.backend.clone(),
            executor,
            inventory,
            self.codec.clone(),
            Arc::new(history),
            self.config.engine.clone(),
        )?;
        Ok(RotationService::new(engine, catalog))
    }
}

/// Login name recorded as the creator of credentials set from the CLI.
pub fn operator() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "warden-cli".to_string())
}
