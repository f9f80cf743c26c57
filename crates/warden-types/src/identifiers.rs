//! Type-safe identifiers.

use crate::errors::{Result, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9._-]{0,31}\$?$").expect("static regex")
});

/// A validated managed-host reference.
///
/// Asset ids double as path components in the on-disk layout, so they must:
/// - Be 1 to 128 characters long
/// - Contain only ASCII letters, digits, `.`, `_` and `-`
/// - Not start with `.` or `-`
///
/// # Example
///
/// ```
/// use warden_types::AssetId;
///
/// let asset = AssetId::new("web-01.prod").unwrap();
/// assert_eq!(asset.as_str(), "web-01.prod");
///
/// assert!(AssetId::new("../etc").is_err());
/// assert!(AssetId::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Create a new validated asset id.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref();
        if !Self::is_valid(id) {
            return Err(ValidationError::InvalidIdentifier(format!(
                "asset '{}': must be 1-128 characters of letters, digits, '.', '_' or '-' \
                and must not start with '.' or '-'",
                id
            ))
            .into());
        }
        Ok(Self(id.to_string()))
    }

    /// Check if an id is valid without allocating.
    pub fn is_valid(id: &str) -> bool {
        if id.is_empty() || id.len() > 128 || id.starts_with('.') || id.starts_with('-') {
            return false;
        }
        id.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AssetId {
    type Err = crate::WardenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for AssetId {
    type Error = crate::WardenError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AssetId> for String {
    fn from(value: AssetId) -> Self {
        value.0
    }
}

/// A validated remote account name.
///
/// Follows the portable POSIX user name rules, with an optional trailing `$`
/// for machine accounts.
///
/// # Example
///
/// ```
/// use warden_types::Username;
///
/// assert!(Username::new("deploy").is_ok());
/// assert!(Username::new("svc_backup$").is_ok());
/// assert!(Username::new("9lives").is_err());
/// assert!(Username::new("bad/name").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Create a new validated username.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if !USERNAME_RE.is_match(name) {
            return Err(ValidationError::InvalidIdentifier(format!(
                "username '{}': must start with a letter or '_' and contain at most 32 \
                letters, digits, '.', '_' or '-'",
                name
            ))
            .into());
        }
        Ok(Self(name.to_string()))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Username {
    type Err = crate::WardenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Username {
    type Error = crate::WardenError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

/// The (asset, username) pair a credential version log is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CredentialIdentity {
    /// Managed host
    pub asset: AssetId,
    /// Account on that host
    pub username: Username,
}

impl CredentialIdentity {
    /// Create an identity.
    pub fn new(asset: AssetId, username: Username) -> Self {
        Self { asset, username }
    }
}

impl fmt::Display for CredentialIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.asset)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = crate::WardenError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    ValidationError::InvalidIdentifier(format!(
                        "{} '{}': {}",
                        stringify!($name),
                        s,
                        e
                    ))
                    .into()
                })
            }
        }
    };
}

uuid_id!(
    /// Identifier of one credential version.
    RecordId
);
uuid_id!(
    /// Identifier of a rotation task.
    TaskId
);
uuid_id!(
    /// Identifier of one execution of a rotation task.
    RunId
);
uuid_id!(
    /// Identifier of a per-host subtask row.
    SubtaskId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_validation() {
        assert!(AssetId::new("web-01").is_ok());
        assert!(AssetId::new("10.0.0.12").is_ok());
        assert!(AssetId::new("db_primary").is_ok());

        assert!(AssetId::new("").is_err());
        assert!(AssetId::new(".hidden").is_err());
        assert!(AssetId::new("-flag").is_err());
        assert!(AssetId::new("a/b").is_err());
        assert!(AssetId::new("x".repeat(129)).is_err());
    }

    #[test]
    fn test_username_validation() {
        assert!(Username::new("deploy").is_ok());
        assert!(Username::new("_apt").is_ok());
        assert!(Username::new("www-data").is_ok());
        assert!(Username::new("HOST$").is_ok());

        assert!(Username::new("").is_err());
        assert!(Username::new("-x").is_err());
        assert!(Username::new("a b").is_err());
        assert!(Username::new("a".repeat(40)).is_err());
    }

    #[test]
    fn test_identity_display() {
        let identity = CredentialIdentity::new(
            AssetId::new("web-01").unwrap(),
            Username::new("deploy").unwrap(),
        );
        assert_eq!(identity.to_string(), "deploy@web-01");
    }

    #[test]
    fn test_uuid_id_roundtrip_through_str() {
        let run = RunId::new();
        let parsed: RunId = run.to_string().parse().unwrap();
        assert_eq!(run, parsed);
        assert!("not-a-uuid".parse::<RunId>().is_err());
    }

    #[test]
    fn test_serde_rejects_invalid_asset() {
        let result: std::result::Result<AssetId, _> = serde_json::from_str("\"../x\"");
        assert!(result.is_err());
    }
}
