//! Rotation task definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_types::{AssetId, Result, TaskId, Username, ValidationError};

/// A declarative password rotation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationTask {
    /// Task id
    #[serde(default)]
    pub id: TaskId,
    /// Unique task name
    pub name: String,
    /// Account rotated on every target
    pub username: Username,
    /// Target assets
    #[serde(default)]
    pub assets: Vec<AssetId>,
    /// Free-form comment
    #[serde(default)]
    pub comment: String,
    /// Creator
    #[serde(default)]
    pub created_by: String,
    /// Organization scope
    #[serde(default)]
    pub org_id: String,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last definition change
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Completion time of the most recent run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_last_run: Option<DateTime<Utc>>,
}

impl RotationTask {
    /// A new task targeting `assets`.
    pub fn new(name: impl Into<String>, username: Username, assets: Vec<AssetId>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            name: name.into(),
            username,
            assets,
            comment: String::new(),
            created_by: String::new(),
            org_id: String::new(),
            created_at: now,
            updated_at: now,
            date_last_run: None,
        }
    }

    /// Refuse reserved accounts such as `root`.
    ///
    /// Checked when a run starts, so catalog edits to the reserved list
    /// apply to existing tasks.
    pub fn check_account(&self, reserved: &[String]) -> Result<()> {
        let name = self.username.as_str();
        if reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            return Err(ValidationError::DisallowedAccount(name.to_string()).into());
        }
        Ok(())
    }

    /// Target assets with duplicates removed, in definition order.
    pub fn unique_assets(&self) -> Vec<AssetId> {
        let mut seen = std::collections::HashSet::new();
        self.assets
            .iter()
            .filter(|a| seen.insert((*a).clone()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::WardenError;

    fn task(user: &str) -> RotationTask {
        RotationTask::new(
            "nightly",
            Username::new(user).unwrap(),
            vec![AssetId::new("web-01").unwrap()],
        )
    }

    #[test]
    fn test_reserved_account_rejected() {
        let reserved = vec!["root".to_string()];
        let err = task("root").check_account(&reserved).unwrap_err();
        match err {
            WardenError::Validation(e) => assert_eq!(e.code(), "disallowed-account"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(task("ROOT").check_account(&reserved).is_err());
        assert!(task("deploy").check_account(&reserved).is_ok());
    }

    #[test]
    fn test_unique_assets() {
        let mut t = task("deploy");
        t.assets.push(AssetId::new("web-02").unwrap());
        t.assets.push(AssetId::new("web-01").unwrap());
        let names: Vec<String> = t.unique_assets().iter().map(|a| a.to_string()).collect();
        assert_eq!(names, vec!["web-01", "web-02"]);
    }

    #[test]
    fn test_yaml_defaults() {
        let t: RotationTask =
            serde_yaml::from_str("name: nightly\nusername: deploy\nassets: [web-01]\n").unwrap();
        assert_eq!(t.assets.len(), 1);
        assert!(t.date_last_run.is_none());
    }
}
