//! The built-in credential versioning store.

use crate::locks::IdentityLocks;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;
use warden_core::util::fs::write_atomic;
use warden_types::{
    AssetId, CredentialFilter, CredentialIdentity, CredentialMetadata, CredentialRecord, RecordId,
    Result, SecretCodec, SecretMaterial, Username, WardenError,
};

/// Versioned credential records keyed by identity.
///
/// Writes for one identity are serialized; different identities never wait
/// on each other. When opened on a directory, each identity's log lives in
/// `<dir>/<asset>/<username>.json` and is replaced atomically before the
/// in-memory state changes.
pub struct CredentialStore {
    codec: Arc<dyn SecretCodec>,
    dir: Option<PathBuf>,
    logs: RwLock<BTreeMap<CredentialIdentity, Vec<CredentialRecord>>>,
    locks: IdentityLocks,
}

impl CredentialStore {
    /// A store that lives only in memory.
    pub fn in_memory(codec: Arc<dyn SecretCodec>) -> Self {
        Self {
            codec,
            dir: None,
            logs: RwLock::new(BTreeMap::new()),
            locks: IdentityLocks::default(),
        }
    }

    /// Open (or create) a store persisted under `dir`.
    ///
    /// Every log is checked on load: contiguous versions from 1 and a single
    /// latest record, which must be the last one.
    pub fn open(dir: impl AsRef<Path>, codec: Arc<dyn SecretCodec>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut logs = BTreeMap::new();
        for entry in WalkDir::new(&dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().map_or(true, |e| e != "json") {
                continue;
            }

            let content = std::fs::read_to_string(path)?;
            let records: Vec<CredentialRecord> = serde_json::from_str(&content)?;
            if records.is_empty() {
                continue;
            }

            let identity = records[0].identity();
            check_log(&identity, &records)
                .map_err(|e| WardenError::Backend(format!("Corrupt version log {:?}: {}", path, e)))?;
            if path != log_path(&dir, &identity) {
                return Err(WardenError::Backend(format!(
                    "Version log {:?} does not belong to {}",
                    path, identity
                )));
            }
            logs.insert(identity, records);
        }

        tracing::debug!(dir = ?dir, identities = logs.len(), "Opened credential store");

        Ok(Self {
            codec,
            dir: Some(dir),
            logs: RwLock::new(logs),
            locks: IdentityLocks::default(),
        })
    }

    /// The codec sealing this store's secrets.
    pub fn codec(&self) -> &Arc<dyn SecretCodec> {
        &self.codec
    }

    /// The latest record for an identity.
    pub fn get_latest(&self, asset: &AssetId, username: &Username) -> Option<CredentialRecord> {
        let identity = CredentialIdentity::new(asset.clone(), username.clone());
        self.logs
            .read()
            .get(&identity)
            .and_then(|log| log.iter().rev().find(|r| r.is_latest).cloned())
    }

    /// Records matching `filter`, ordered by asset, username and version.
    pub fn list(&self, filter: &CredentialFilter) -> Vec<CredentialRecord> {
        self.logs
            .read()
            .values()
            .flat_map(|log| log.iter())
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    /// Every version for one identity, oldest first.
    pub fn history(&self, asset: &AssetId, username: &Username) -> Vec<CredentialRecord> {
        let identity = CredentialIdentity::new(asset.clone(), username.clone());
        self.logs.read().get(&identity).cloned().unwrap_or_default()
    }

    /// Latest credential of every account on one asset.
    pub fn users_for_asset(&self, asset: &AssetId) -> Vec<CredentialRecord> {
        self.list(&CredentialFilter::all().asset(asset.clone()).latest_only())
    }

    /// Append a new latest version.
    ///
    /// The previous latest (if any) is flipped off and the new record gets
    /// the next `version_count`. Fails with `PersistenceConflict` if the log
    /// cannot be written; the store is unchanged in that case.
    pub async fn create_version(
        &self,
        asset: &AssetId,
        username: &Username,
        material: &SecretMaterial,
        metadata: &CredentialMetadata,
    ) -> Result<CredentialRecord> {
        let identity = CredentialIdentity::new(asset.clone(), username.clone());
        let secret = self.codec.seal_material(material)?;
        let _guard = self.locks.acquire(&identity).await;

        let mut log = self.logs.read().get(&identity).cloned().unwrap_or_default();
        let now = Utc::now();

        let mut previous = 0;
        for record in log.iter_mut().filter(|r| r.is_latest) {
            record.is_latest = false;
            record.updated_at = now;
            previous = previous.max(record.version_count);
        }

        let record = CredentialRecord {
            id: RecordId::new(),
            asset: asset.clone(),
            username: username.clone(),
            name: metadata
                .name
                .clone()
                .unwrap_or_else(|| CredentialRecord::default_name(asset, username)),
            secret,
            comment: metadata.comment.clone(),
            created_by: metadata.created_by.clone(),
            org_id: metadata.org_id.clone(),
            created_at: now,
            updated_at: now,
            is_latest: true,
            version_count: previous + 1,
        };
        log.push(record.clone());

        if let Some(dir) = &self.dir {
            let path = log_path(dir, &identity);
            let json = serde_json::to_vec_pretty(&log)?;
            let written = match tokio::task::spawn_blocking(move || write_atomic(&path, &json)).await {
                Ok(result) => result,
                Err(e) => Err(WardenError::Other(format!("log writer stopped: {}", e))),
            };
            written.map_err(|e| {
                WardenError::PersistenceConflict(format!(
                    "could not write version log for {}: {}",
                    identity, e
                ))
            })?;
        }

        self.logs.write().insert(identity, log);

        tracing::info!(
            asset = %asset,
            username = %username,
            version = record.version_count,
            "Created credential version"
        );
        Ok(record)
    }

    /// Decode a record's secret material.
    pub fn reveal_secret(&self, record: &CredentialRecord) -> Result<SecretMaterial> {
        self.codec.reveal_material(&record.secret)
    }
}

fn log_path(dir: &Path, identity: &CredentialIdentity) -> PathBuf {
    dir.join(identity.asset.as_str())
        .join(format!("{}.json", identity.username))
}

fn check_log(identity: &CredentialIdentity, records: &[CredentialRecord]) -> std::result::Result<(), String> {
    for (i, record) in records.iter().enumerate() {
        if &record.identity() != identity {
            return Err(format!("record {} belongs to {}", record.id, record.identity()));
        }
        if record.version_count != i as u64 + 1 {
            return Err(format!(
                "expected version {} but found {}",
                i + 1,
                record.version_count
            ));
        }
    }

    let latest: Vec<_> = records.iter().filter(|r| r.is_latest).collect();
    match latest.as_slice() {
        [only] if only.version_count == records.len() as u64 => Ok(()),
        [only] => Err(format!("latest is version {} of {}", only.version_count, records.len())),
        other => Err(format!("{} records flagged latest", other.len())),
    }
}
