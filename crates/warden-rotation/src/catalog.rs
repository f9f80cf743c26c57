//! Task and asset catalog.
//!
//! The catalog is a YAML file owned by the operators:
//!
//! ```yaml
//! assets:
//!   - id: web-01
//!     address: 10.0.0.11
//!     admin_user: ansible
//! tasks:
//!   - name: nightly-deploy
//!     username: deploy
//!     assets: [web-01]
//! ```
//!
//! Tasks without an `id` get one on first load and the file is rewritten so
//! run history stays attached to the same task.

use crate::task::RotationTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::util::fs::write_atomic;
use warden_types::{
    AssetId, CredentialBackend, HostConnection, Inventory, Result, TaskId, Username, WardenError,
};

/// Connection parameters for one managed asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Asset id
    pub id: AssetId,
    /// Inventory hostname; defaults to the asset id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Address to connect to
    pub address: String,
    /// Port to connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection protocol
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Administrative account
    pub admin_user: Username,
}

fn default_port() -> u16 {
    22
}

fn default_protocol() -> String {
    "ssh".to_string()
}

impl AssetEntry {
    /// Inventory hostname.
    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or_else(|| self.id.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    assets: Vec<AssetEntry>,
    #[serde(default)]
    tasks: Vec<RotationTask>,
}

/// Rotation tasks and the assets they target.
pub struct TaskCatalog {
    path: Option<PathBuf>,
    data: RwLock<CatalogFile>,
}

impl TaskCatalog {
    /// Catalog held only in memory.
    pub fn in_memory(assets: Vec<AssetEntry>, tasks: Vec<RotationTask>) -> Self {
        Self {
            path: None,
            data: RwLock::new(CatalogFile { assets, tasks }),
        }
    }

    /// Load a catalog file. A missing file is an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!("No catalog at {:?}", path);
            return Ok(Self {
                path: Some(path),
                data: RwLock::new(CatalogFile::default()),
            });
        }

        let content = std::fs::read_to_string(&path)?;
        let raw: serde_yaml::Value = serde_yaml::from_str(&content)?;
        let missing_ids = raw
            .get("tasks")
            .and_then(|t| t.as_sequence())
            .map_or(false, |tasks| tasks.iter().any(|t| t.get("id").is_none()));

        let data: CatalogFile = if raw.is_null() {
            CatalogFile::default()
        } else {
            serde_yaml::from_value(raw)?
        };
        check_unique_names(&data)?;

        let catalog = Self {
            path: Some(path),
            data: RwLock::new(data),
        };
        if missing_ids {
            info!("Assigning ids to new catalog tasks");
            catalog.save()?;
        }
        Ok(catalog)
    }

    /// Write the catalog back to its file, if it has one.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.data.read())?;
        write_atomic(path, yaml.as_bytes())
    }

    /// All tasks in definition order.
    pub fn tasks(&self) -> Vec<RotationTask> {
        self.data.read().tasks.clone()
    }

    /// A task by id.
    pub fn task(&self, id: &TaskId) -> Result<RotationTask> {
        self.data
            .read()
            .tasks
            .iter()
            .find(|t| &t.id == id)
            .cloned()
            .ok_or_else(|| WardenError::NotFound(format!("task {}", id)))
    }

    /// A task by name or id.
    pub fn find(&self, name_or_id: &str) -> Result<RotationTask> {
        let data = self.data.read();
        data.tasks
            .iter()
            .find(|t| t.name == name_or_id || t.id.to_string() == name_or_id)
            .cloned()
            .ok_or_else(|| WardenError::NotFound(format!("task '{}'", name_or_id)))
    }

    /// All assets.
    pub fn assets(&self) -> Vec<AssetEntry> {
        self.data.read().assets.clone()
    }

    /// An asset by id.
    pub fn asset(&self, id: &AssetId) -> Option<AssetEntry> {
        self.data.read().assets.iter().find(|a| &a.id == id).cloned()
    }

    /// Record the completion time of a task's latest run.
    pub fn touch_last_run(&self, id: &TaskId, at: DateTime<Utc>) -> Result<()> {
        {
            let mut data = self.data.write();
            let task = data
                .tasks
                .iter_mut()
                .find(|t| &t.id == id)
                .ok_or_else(|| WardenError::NotFound(format!("task {}", id)))?;
            task.date_last_run = Some(at);
        }
        self.save()
    }
}

fn check_unique_names(data: &CatalogFile) -> Result<()> {
    let mut names = std::collections::HashSet::new();
    for task in &data.tasks {
        if !names.insert(task.name.as_str()) {
            return Err(WardenError::Config(format!("duplicate task name '{}'", task.name)));
        }
    }
    let mut ids = std::collections::HashSet::new();
    for asset in &data.assets {
        if !ids.insert(&asset.id) {
            return Err(WardenError::Config(format!("duplicate asset '{}'", asset.id)));
        }
    }
    Ok(())
}

/// Inventory backed by the catalog's asset list.
///
/// When a credential backend is attached, each host's administrative
/// secret is the latest credential stored for its admin account.
pub struct StaticInventory {
    catalog: Arc<TaskCatalog>,
    backend: Option<Arc<dyn CredentialBackend>>,
}

impl StaticInventory {
    /// Inventory over a catalog.
    pub fn new(catalog: Arc<TaskCatalog>) -> Self {
        Self {
            catalog,
            backend: None,
        }
    }

    /// Look up admin secrets in `backend`.
    pub fn with_backend(mut self, backend: Arc<dyn CredentialBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn resolve(&self, assets: &[AssetId]) -> Result<Vec<HostConnection>> {
        let mut hosts = Vec::with_capacity(assets.len());
        for id in assets {
            let Some(entry) = self.catalog.asset(id) else {
                warn!(asset = %id, "Asset not in catalog; skipping");
                continue;
            };

            let admin_secret = match &self.backend {
                Some(backend) => backend.get_auth(&entry.id, &entry.admin_user).await?,
                None => None,
            };

            hosts.push(HostConnection {
                asset: entry.id.clone(),
                hostname: entry.hostname().to_string(),
                address: entry.address.clone(),
                port: entry.port,
                protocol: entry.protocol.clone(),
                admin_user: entry.admin_user.clone(),
                admin_secret,
            });
        }
        Ok(hosts)
    }
}
