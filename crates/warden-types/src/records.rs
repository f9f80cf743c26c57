//! Credential records and secret material.

use crate::identifiers::{AssetId, CredentialIdentity, RecordId, Username};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Plaintext secret material for one account.
///
/// Only ever held transiently: the value is wiped on drop and `Debug`
/// never prints the contents.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
}

impl SecretMaterial {
    /// Material carrying only a password.
    pub fn from_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            public_key: None,
            private_key: None,
        }
    }

    /// Material carrying any combination of password and key pair.
    pub fn new(
        password: Option<String>,
        public_key: Option<String>,
        private_key: Option<String>,
    ) -> Self {
        Self {
            password,
            public_key,
            private_key,
        }
    }

    /// The password, if any.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The public key, if any.
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// The private key, if any.
    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref()
    }

    /// Whether nothing is set.
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.public_key.is_none() && self.private_key.is_none()
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("public_key", &self.public_key.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Opaque sealed form of [`SecretMaterial`], safe to persist.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    /// Wrap a token produced by a codec.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token text.
    pub fn as_token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedSecret({} bytes)", self.0.len())
    }
}

/// Caller-supplied attributes for a new credential version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    /// Display name; defaults to `username@asset`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form comment
    #[serde(default)]
    pub comment: String,
    /// Who created the version
    #[serde(default)]
    pub created_by: String,
    /// Organization scope
    #[serde(default)]
    pub org_id: String,
}

impl CredentialMetadata {
    /// Metadata attributed to `created_by` with a comment.
    pub fn new(created_by: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            comment: comment.into(),
            ..Default::default()
        }
    }

    /// Set the organization scope.
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }
}

/// One version of an account's secret on one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Record id
    pub id: RecordId,
    /// Managed host
    pub asset: AssetId,
    /// Account name
    pub username: Username,
    /// Display name
    pub name: String,
    /// Sealed secret material
    pub secret: SealedSecret,
    /// Free-form comment
    pub comment: String,
    /// Creator
    pub created_by: String,
    /// Organization scope
    pub org_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time (only the latest flag ever changes)
    pub updated_at: DateTime<Utc>,
    /// Whether this is the authoritative version
    pub is_latest: bool,
    /// 1-based position in the identity's version log
    pub version_count: u64,
}

impl CredentialRecord {
    /// The identity this record belongs to.
    pub fn identity(&self) -> CredentialIdentity {
        CredentialIdentity::new(self.asset.clone(), self.username.clone())
    }

    /// Default display name for an identity.
    pub fn default_name(asset: &AssetId, username: &Username) -> String {
        format!("{}@{}", username, asset)
    }
}

/// Serializable projection of a record for read APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialView {
    /// Record id
    pub id: RecordId,
    /// Display name
    pub name: String,
    /// Managed host
    pub asset: AssetId,
    /// Account name
    pub username: Username,
    /// Comment
    pub comment: String,
    /// Creator
    pub created_by: String,
    /// Organization scope
    pub org_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Whether this is the authoritative version
    pub is_latest: bool,
    /// Version number
    pub version_count: u64,
    /// Revealed material, only when explicitly requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretMaterial>,
}

impl CredentialView {
    /// Project a record, attaching already-revealed material if given.
    pub fn from_record(record: &CredentialRecord, secret: Option<SecretMaterial>) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            asset: record.asset.clone(),
            username: record.username.clone(),
            comment: record.comment.clone(),
            created_by: record.created_by.clone(),
            org_id: record.org_id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            is_latest: record.is_latest,
            version_count: record.version_count,
            secret,
        }
    }
}

/// Query for [`crate::traits::CredentialBackend::filter`].
///
/// An empty filter matches every version of every identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialFilter {
    /// Restrict to one asset
    pub asset: Option<AssetId>,
    /// Restrict to one account name
    pub username: Option<Username>,
    /// Only return the latest version per identity
    pub latest: bool,
}

impl CredentialFilter {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one asset.
    pub fn asset(mut self, asset: AssetId) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Restrict to one account name.
    pub fn username(mut self, username: Username) -> Self {
        self.username = Some(username);
        self
    }

    /// Only latest versions.
    pub fn latest_only(mut self) -> Self {
        self.latest = true;
        self
    }

    /// Whether a record satisfies the filter.
    pub fn matches(&self, record: &CredentialRecord) -> bool {
        self.asset.as_ref().map_or(true, |a| a == &record.asset)
            && self.username.as_ref().map_or(true, |u| u == &record.username)
            && (!self.latest || record.is_latest)
    }
}
