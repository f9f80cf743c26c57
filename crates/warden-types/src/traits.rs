//! Core trait definitions for Warden abstractions.

use crate::enums::BackendKind;
use crate::errors::Result;
use crate::execution::{AuthContext, ExecutionOptions, ExecutionReport, HostConnection, ModuleInvocation};
use crate::identifiers::{AssetId, Username};
use crate::records::{
    CredentialFilter, CredentialMetadata, CredentialRecord, CredentialView, SealedSecret,
    SecretMaterial,
};
use async_trait::async_trait;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Reversible encoding of secret material for storage at rest.
///
/// Implementations must never include plaintext in errors or logs.
pub trait SecretCodec: Send + Sync {
    /// Seal raw plaintext bytes.
    fn seal(&self, plaintext: &[u8]) -> Result<SealedSecret>;

    /// Reveal a previously sealed token.
    fn reveal(&self, token: &SealedSecret) -> Result<Zeroizing<Vec<u8>>>;

    /// Seal structured secret material.
    fn seal_material(&self, material: &SecretMaterial) -> Result<SealedSecret> {
        let bytes = Zeroizing::new(serde_json::to_vec(material)?);
        self.seal(&bytes)
    }

    /// Reveal structured secret material.
    fn reveal_material(&self, token: &SealedSecret) -> Result<SecretMaterial> {
        let bytes = self.reveal(token)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Versioned credential storage.
///
/// Selected once at configuration time; callers only ever hold
/// `Arc<dyn CredentialBackend>`.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// The latest record for an identity, if any.
    async fn get(&self, asset: &AssetId, username: &Username) -> Result<Option<CredentialRecord>>;

    /// Records matching a filter, ordered by asset, username and version.
    async fn filter(&self, filter: &CredentialFilter) -> Result<Vec<CredentialRecord>>;

    /// Append a new latest version for an identity.
    ///
    /// Fails with `PersistenceConflict` when the versioning transaction
    /// cannot commit; nothing is applied in that case.
    async fn create(
        &self,
        asset: &AssetId,
        username: &Username,
        material: &SecretMaterial,
        metadata: &CredentialMetadata,
    ) -> Result<CredentialRecord>;

    /// Decode a record's secret material.
    fn reveal(&self, record: &CredentialRecord) -> Result<SecretMaterial>;

    /// Project a record for read APIs.
    fn to_view(&self, record: &CredentialRecord, include_secret: bool) -> Result<CredentialView> {
        let secret = if include_secret {
            Some(self.reveal(record)?)
        } else {
            None
        };
        Ok(CredentialView::from_record(record, secret))
    }

    /// Revealed material of the latest record for an identity.
    async fn get_auth(&self, asset: &AssetId, username: &Username) -> Result<Option<SecretMaterial>> {
        match self.get(asset, username).await? {
            Some(record) => Ok(Some(self.reveal(&record)?)),
            None => Ok(None),
        }
    }
}

/// Executes module invocations against managed hosts.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `invocation` on every host in `hosts`.
    ///
    /// An `Err` means the executor itself failed; per-host problems are
    /// reported inside the [`ExecutionReport`].
    async fn execute(
        &self,
        hosts: &[HostConnection],
        invocation: &ModuleInvocation,
        auth: &AuthContext,
        options: &ExecutionOptions,
    ) -> Result<ExecutionReport>;

    /// Executor name for logs.
    fn name(&self) -> &str;
}

/// Resolves asset references into connection parameters.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Resolve assets, silently dropping unknown ones.
    async fn resolve(&self, assets: &[AssetId]) -> Result<Vec<HostConnection>>;
}

/// Key/value secret storage in an external secret manager.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Read a secret. Returns `Ok(None)` when the path does not exist.
    async fn read(&self, path: &str) -> Result<Option<HashMap<String, String>>>;

    /// Write a secret.
    async fn write(&self, path: &str, data: &HashMap<String, String>) -> Result<()>;

    /// List the keys directly under a prefix. Folders end in `/`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get the vault name/alias.
    fn name(&self) -> &str;
}
