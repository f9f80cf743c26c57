//! Credential backend variants.

use crate::locks::IdentityLocks;
use crate::store::CredentialStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use warden_services::{VaultClient, VaultConfig};
use warden_types::config::BackendConfig;
use warden_types::{
    AssetId, BackendKind, CredentialBackend, CredentialFilter, CredentialIdentity,
    CredentialMetadata, CredentialRecord, RecordId, Result, SealedSecret, SecretCodec,
    SecretMaterial, Username, VaultStore, WardenError,
};

/// Build the configured backend.
///
/// Called once at start-up; the rest of the program only sees the trait
/// object.
pub fn build_backend(
    config: &BackendConfig,
    codec: Arc<dyn SecretCodec>,
) -> Result<Arc<dyn CredentialBackend>> {
    match config {
        BackendConfig::Local { path: Some(path) } => {
            tracing::debug!(path = ?path, "Using local credential store");
            Ok(Arc::new(LocalBackend::new(Arc::new(CredentialStore::open(path, codec)?))))
        }
        BackendConfig::Local { path: None } => {
            tracing::warn!("Local credential store has no path; credentials will not persist");
            Ok(Arc::new(LocalBackend::new(Arc::new(CredentialStore::in_memory(codec)))))
        }
        BackendConfig::Vault { prefix, .. } => {
            let vault_config = VaultConfig::from_backend(config)
                .ok_or_else(|| WardenError::Bug("vault config for non-vault backend".to_string()))?;
            tracing::debug!(url = %vault_config.url, prefix = %prefix, "Using vault credential backend");
            let client = VaultClient::new(vault_config)?;
            Ok(Arc::new(VaultBackend::new(Arc::new(client), codec, prefix.clone())))
        }
    }
}

/// Backend over the built-in [`CredentialStore`].
#[derive(Clone)]
pub struct LocalBackend {
    store: Arc<CredentialStore>,
}

impl LocalBackend {
    /// Wrap a store.
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }
}

#[async_trait]
impl CredentialBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, asset: &AssetId, username: &Username) -> Result<Option<CredentialRecord>> {
        Ok(self.store.get_latest(asset, username))
    }

    async fn filter(&self, filter: &CredentialFilter) -> Result<Vec<CredentialRecord>> {
        Ok(self.store.list(filter))
    }

    async fn create(
        &self,
        asset: &AssetId,
        username: &Username,
        material: &SecretMaterial,
        metadata: &CredentialMetadata,
    ) -> Result<CredentialRecord> {
        self.store.create_version(asset, username, material, metadata).await
    }

    fn reveal(&self, record: &CredentialRecord) -> Result<SecretMaterial> {
        self.store.reveal_secret(record)
    }
}

const LATEST: &str = "latest";

/// Backend keeping versions in a Vault KV engine.
///
/// Layout under `prefix`:
///
/// ```text
/// <prefix>/<asset>/<username>/v1
/// <prefix>/<asset>/<username>/v2
/// <prefix>/<asset>/<username>/latest   -> { version: "2" }
/// ```
///
/// Version entries are written once. The `latest` pointer is written after
/// the version entry, so a version whose pointer write failed is never
/// reported and gets overwritten by the next attempt.
pub struct VaultBackend {
    vault: Arc<dyn VaultStore>,
    codec: Arc<dyn SecretCodec>,
    prefix: String,
    locks: IdentityLocks,
}

impl VaultBackend {
    /// Create a backend over a vault store.
    pub fn new(vault: Arc<dyn VaultStore>, codec: Arc<dyn SecretCodec>, prefix: impl Into<String>) -> Self {
        Self {
            vault,
            codec,
            prefix: prefix.into().trim_matches('/').to_string(),
            locks: IdentityLocks::default(),
        }
    }

    fn identity_path(&self, asset: &AssetId, username: &Username) -> String {
        format!("{}/{}/{}", self.prefix, asset, username)
    }

    async fn latest_version(&self, base: &str) -> Result<u64> {
        let pointer = self.vault.read(&format!("{}/{}", base, LATEST)).await?;
        pointer_version(base, pointer)
    }

    async fn read_version(
        &self,
        asset: &AssetId,
        username: &Username,
        version: u64,
    ) -> Result<Option<StoredVersion>> {
        let path = format!("{}/v{}", self.identity_path(asset, username), version);
        match self.vault.read(&path).await? {
            Some(data) => StoredVersion::from_map(&data)
                .map(Some)
                .map_err(|e| WardenError::Backend(format!("Malformed version at {}: {}", path, e))),
            None => Ok(None),
        }
    }

    /// Every committed version of one identity, oldest first.
    async fn identity_records(
        &self,
        asset: &AssetId,
        username: &Username,
        latest_only: bool,
    ) -> Result<Vec<CredentialRecord>> {
        let latest = self.latest_version(&self.identity_path(asset, username)).await?;
        if latest == 0 {
            return Ok(Vec::new());
        }

        let first = if latest_only { latest } else { 1 };
        let mut stored = Vec::new();
        for version in first..=latest {
            match self.read_version(asset, username, version).await? {
                Some(entry) => stored.push(entry),
                None => {
                    tracing::warn!(asset = %asset, username = %username, version, "Missing credential version");
                }
            }
        }

        let mut records = Vec::with_capacity(stored.len());
        for (i, entry) in stored.iter().enumerate() {
            // The time a version stopped being latest is its successor's creation.
            let superseded_at = stored.get(i + 1).map(|next| next.created_at);
            records.push(entry.to_record(asset, username, latest, superseded_at));
        }
        Ok(records)
    }

    async fn child_names(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .vault
            .list(prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_suffix('/').map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl CredentialBackend for VaultBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vault
    }

    async fn get(&self, asset: &AssetId, username: &Username) -> Result<Option<CredentialRecord>> {
        Ok(self.identity_records(asset, username, true).await?.pop())
    }

    async fn filter(&self, filter: &CredentialFilter) -> Result<Vec<CredentialRecord>> {
        let assets = match &filter.asset {
            Some(asset) => vec![asset.clone()],
            None => self
                .child_names(&self.prefix)
                .await?
                .into_iter()
                .filter_map(|name| AssetId::new(&name).ok())
                .collect(),
        };

        let mut records = Vec::new();
        for asset in assets {
            let usernames = match &filter.username {
                Some(username) => vec![username.clone()],
                None => self
                    .child_names(&format!("{}/{}", self.prefix, asset))
                    .await?
                    .into_iter()
                    .filter_map(|name| Username::new(&name).ok())
                    .collect(),
            };
            for username in usernames {
                records.extend(self.identity_records(&asset, &username, filter.latest).await?);
            }
        }
        Ok(records)
    }

    async fn create(
        &self,
        asset: &AssetId,
        username: &Username,
        material: &SecretMaterial,
        metadata: &CredentialMetadata,
    ) -> Result<CredentialRecord> {
        let identity = CredentialIdentity::new(asset.clone(), username.clone());
        let secret = self.codec.seal_material(material)?;
        let _guard = self.locks.acquire(&identity).await;

        let base = self.identity_path(asset, username);
        let pointer = self
            .vault
            .read(&format!("{}/{}", base, LATEST))
            .await
            .map_err(|e| conflict(&identity, "latest pointer not read", e))?;
        let version = pointer_version(&base, pointer)? + 1;
        let entry = StoredVersion {
            id: RecordId::new(),
            name: metadata
                .name
                .clone()
                .unwrap_or_else(|| CredentialRecord::default_name(asset, username)),
            secret,
            comment: metadata.comment.clone(),
            created_by: metadata.created_by.clone(),
            org_id: metadata.org_id.clone(),
            created_at: Utc::now(),
            version,
        };

        self.vault
            .write(&format!("{}/v{}", base, version), &entry.to_map())
            .await
            .map_err(|e| conflict(&identity, &format!("version {} not written", version), e))?;

        let mut pointer = HashMap::new();
        pointer.insert("version".to_string(), version.to_string());
        self.vault
            .write(&format!("{}/{}", base, LATEST), &pointer)
            .await
            .map_err(|e| conflict(&identity, "latest pointer not updated", e))?;

        tracing::info!(
            vault = self.vault.name(),
            asset = %asset,
            username = %username,
            version,
            "Created credential version in vault"
        );
        Ok(entry.to_record(asset, username, version, None))
    }

    fn reveal(&self, record: &CredentialRecord) -> Result<SecretMaterial> {
        self.codec.reveal_material(&record.secret)
    }
}

fn pointer_version(base: &str, pointer: Option<HashMap<String, String>>) -> Result<u64> {
    let Some(pointer) = pointer else {
        return Ok(0);
    };
    pointer
        .get("version")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| WardenError::Backend(format!("Malformed latest pointer at {}", base)))
}

/// Storage failures inside the versioning transaction are retryable.
fn conflict(identity: &CredentialIdentity, what: &str, error: WardenError) -> WardenError {
    WardenError::PersistenceConflict(format!("{} for {}: {}", what, identity, error))
}

/// One version entry as stored in the vault.
struct StoredVersion {
    id: RecordId,
    name: String,
    secret: SealedSecret,
    comment: String,
    created_by: String,
    org_id: String,
    created_at: DateTime<Utc>,
    version: u64,
}

impl StoredVersion {
    fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), self.id.to_string());
        map.insert("name".to_string(), self.name.clone());
        map.insert("secret".to_string(), self.secret.as_token().to_string());
        map.insert("comment".to_string(), self.comment.clone());
        map.insert("created_by".to_string(), self.created_by.clone());
        map.insert("org_id".to_string(), self.org_id.clone());
        map.insert("created_at".to_string(), self.created_at.to_rfc3339());
        map.insert("version".to_string(), self.version.to_string());
        map
    }

    fn from_map(map: &HashMap<String, String>) -> std::result::Result<Self, String> {
        let field = |key: &str| {
            map.get(key)
                .cloned()
                .ok_or_else(|| format!("missing field '{}'", key))
        };

        Ok(Self {
            id: field("id")?.parse::<RecordId>().map_err(|e| e.to_string())?,
            name: field("name")?,
            secret: SealedSecret::from_token(field("secret")?),
            comment: map.get("comment").cloned().unwrap_or_default(),
            created_by: map.get("created_by").cloned().unwrap_or_default(),
            org_id: map.get("org_id").cloned().unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&field("created_at")?)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| e.to_string())?,
            version: field("version")?.parse().map_err(|_| "bad version".to_string())?,
        })
    }

    fn to_record(
        &self,
        asset: &AssetId,
        username: &Username,
        latest: u64,
        superseded_at: Option<DateTime<Utc>>,
    ) -> CredentialRecord {
        CredentialRecord {
            id: self.id,
            asset: asset.clone(),
            username: username.clone(),
            name: self.name.clone(),
            secret: self.secret.clone(),
            comment: self.comment.clone(),
            created_by: self.created_by.clone(),
            org_id: self.org_id.clone(),
            created_at: self.created_at,
            updated_at: superseded_at.unwrap_or(self.created_at),
            is_latest: self.version == latest,
            version_count: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use warden_secrets::AesGcmCodec;

    /// In-memory KV store that can be told to reject pointer writes.
    #[derive(Default)]
    struct MemoryVault {
        data: Mutex<BTreeMap<String, HashMap<String, String>>>,
        fail_pointer_writes: AtomicBool,
        fail_version_writes: AtomicBool,
    }

    #[async_trait]
    impl VaultStore for MemoryVault {
        async fn read(&self, path: &str) -> Result<Option<HashMap<String, String>>> {
            Ok(self.data.lock().get(path).cloned())
        }

        async fn write(&self, path: &str, data: &HashMap<String, String>) -> Result<()> {
            if path.ends_with("/latest") && self.fail_pointer_writes.load(Ordering::SeqCst) {
                return Err(WardenError::Backend("permission denied".into()));
            }
            if !path.ends_with("/latest") && self.fail_version_writes.load(Ordering::SeqCst) {
                return Err(WardenError::Backend("503 service unavailable".into()));
            }
            self.data.lock().insert(path.to_string(), data.clone());
            Ok(())
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            let prefix = format!("{}/", prefix.trim_end_matches('/'));
            let mut keys: Vec<String> = self
                .data
                .lock()
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .map(|rest| match rest.split_once('/') {
                    Some((dir, _)) => format!("{}/", dir),
                    None => rest.to_string(),
                })
                .collect();
            keys.dedup();
            Ok(keys)
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    fn codec() -> Arc<dyn SecretCodec> {
        Arc::new(AesGcmCodec::new(&[5u8; 32]))
    }

    fn ids(asset: &str, user: &str) -> (AssetId, Username) {
        (AssetId::new(asset).unwrap(), Username::new(user).unwrap())
    }

    fn meta() -> CredentialMetadata {
        CredentialMetadata::new("ops", "")
    }

    #[tokio::test]
    async fn test_vault_versions_and_pointer() {
        let vault = Arc::new(MemoryVault::default());
        let backend = VaultBackend::new(vault.clone(), codec(), "/warden/credentials/");
        let (a, u) = ids("web-01", "deploy");

        for pw in ["one", "two", "three"] {
            backend
                .create(&a, &u, &SecretMaterial::from_password(pw), &meta())
                .await
                .unwrap();
        }

        let pointer = vault.read("warden/credentials/web-01/deploy/latest").await.unwrap().unwrap();
        assert_eq!(pointer.get("version").map(String::as_str), Some("3"));

        let all = backend.filter(&CredentialFilter::all()).await.unwrap();
        let versions: Vec<(u64, bool)> = all.iter().map(|r| (r.version_count, r.is_latest)).collect();
        assert_eq!(versions, vec![(1, false), (2, false), (3, true)]);
        assert_eq!(all[0].updated_at, all[1].created_at);

        let latest = backend.get(&a, &u).await.unwrap().unwrap();
        assert_eq!(latest.name, "deploy@web-01");
        assert_eq!(backend.reveal(&latest).unwrap().password(), Some("three"));
    }

    #[tokio::test]
    async fn test_vault_pointer_failure_is_conflict() {
        let vault = Arc::new(MemoryVault::default());
        let backend = VaultBackend::new(vault.clone(), codec(), "warden");
        let (a, u) = ids("web-01", "deploy");

        backend
            .create(&a, &u, &SecretMaterial::from_password("good"), &meta())
            .await
            .unwrap();

        vault.fail_pointer_writes.store(true, Ordering::SeqCst);
        let err = backend
            .create(&a, &u, &SecretMaterial::from_password("orphan"), &meta())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let latest = backend.get(&a, &u).await.unwrap().unwrap();
        assert_eq!(latest.version_count, 1);
        assert_eq!(backend.reveal(&latest).unwrap().password(), Some("good"));
        assert_eq!(backend.filter(&CredentialFilter::all()).await.unwrap().len(), 1);

        vault.fail_pointer_writes.store(false, Ordering::SeqCst);
        let next = backend
            .create(&a, &u, &SecretMaterial::from_password("retry"), &meta())
            .await
            .unwrap();
        assert_eq!(next.version_count, 2);
        assert_eq!(
            backend.get_auth(&a, &u).await.unwrap().unwrap().password(),
            Some("retry")
        );
    }

    #[tokio::test]
    async fn test_vault_version_write_failure_is_conflict() {
        let vault = Arc::new(MemoryVault::default());
        let backend = VaultBackend::new(vault.clone(), codec(), "warden");
        let (a, u) = ids("web-01", "deploy");

        backend
            .create(&a, &u, &SecretMaterial::from_password("good"), &meta())
            .await
            .unwrap();

        vault.fail_version_writes.store(true, Ordering::SeqCst);
        let err = backend
            .create(&a, &u, &SecretMaterial::from_password("lost"), &meta())
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "unexpected error: {}", err);

        let latest = backend.get(&a, &u).await.unwrap().unwrap();
        assert_eq!(latest.version_count, 1);
        assert_eq!(backend.reveal(&latest).unwrap().password(), Some("good"));

        vault.fail_version_writes.store(false, Ordering::SeqCst);
        let next = backend
            .create(&a, &u, &SecretMaterial::from_password("retry"), &meta())
            .await
            .unwrap();
        assert_eq!(next.version_count, 2);
    }

    #[tokio::test]
    async fn test_vault_filter_by_asset_and_user() {
        let backend = VaultBackend::new(Arc::new(MemoryVault::default()), codec(), "warden");
        for (asset, user) in [("web-01", "deploy"), ("web-01", "svc"), ("web-02", "deploy")] {
            let (a, u) = ids(asset, user);
            backend
                .create(&a, &u, &SecretMaterial::from_password("x"), &meta())
                .await
                .unwrap();
        }

        let web01 = backend
            .filter(&CredentialFilter::all().asset(AssetId::new("web-01").unwrap()))
            .await
            .unwrap();
        assert_eq!(web01.len(), 2);

        let deploy = backend
            .filter(&CredentialFilter::all().username(Username::new("deploy").unwrap()).latest_only())
            .await
            .unwrap();
        let assets: Vec<&str> = deploy.iter().map(|r| r.asset.as_str()).collect();
        assert_eq!(assets, vec!["web-01", "web-02"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_vault_racing_creates() {
        let backend = Arc::new(VaultBackend::new(Arc::new(MemoryVault::default()), codec(), "warden"));
        let (a, u) = ids("web-01", "deploy");

        let mut handles = Vec::new();
        for i in 0..8 {
            let backend = backend.clone();
            let (a, u) = (a.clone(), u.clone());
            handles.push(tokio::spawn(async move {
                backend
                    .create(&a, &u, &SecretMaterial::from_password(format!("pw-{}", i)), &meta())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let all = backend.filter(&CredentialFilter::all()).await.unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(all.iter().filter(|r| r.is_latest).count(), 1);
    }

    #[tokio::test]
    async fn test_build_backend_local() {
        let dir = TempDir::new().unwrap();
        let config = BackendConfig::Local {
            path: Some(dir.path().to_path_buf()),
        };
        let backend = build_backend(&config, codec()).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);

        let (a, u) = ids("web-01", "deploy");
        let record = backend
            .create(&a, &u, &SecretMaterial::from_password("pw"), &meta())
            .await
            .unwrap();
        let view = backend.to_view(&record, false).unwrap();
        assert!(view.secret.is_none());
        let view = backend.to_view(&record, true).unwrap();
        assert_eq!(view.secret.and_then(|s| s.password().map(str::to_string)), Some("pw".into()));
    }

    #[test]
    fn test_build_backend_vault() {
        let config: BackendConfig = serde_json::from_value(serde_json::json!({
            "type": "vault",
            "url": "https://vault.internal:8200",
        }))
        .unwrap();
        let backend = build_backend(&config, codec()).unwrap();
        assert_eq!(backend.kind(), BackendKind::Vault);
    }
}
