//! Run and subtask history.
//!
//! A run row is written when the run starts (unfinished) and again when it
//! finishes; after that it never changes. Subtask rows are added as hosts
//! complete, at most one per asset per run. With a directory configured,
//! each run is kept in `runs/<run-id>.json` together with its subtasks.

use crate::task::RotationTask;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use warden_core::util::fs::write_atomic;
use warden_types::{
    bug, AssetId, HostConnection, Result, RunId, SealedSecret, SubtaskId, SubtaskState, TaskId,
    WardenError,
};

/// Task attributes captured when a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Task name
    pub task_name: String,
    /// Rotated account
    pub username: String,
    /// Resolved hostnames
    pub hostnames: Vec<String>,
    /// Organization scope
    pub org_id: String,
}

/// Per-run tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Hosts in the run
    pub total: usize,
    /// Hosts whose new credential was committed
    pub success: usize,
    /// Hosts that failed to change, verify or commit
    pub failed: usize,
    /// Hosts never dispatched because the run was cancelled
    pub skipped: usize,
}

impl RunCounts {
    /// Tally finished subtasks.
    pub fn tally(subtasks: &[SubtaskHistory]) -> Self {
        let mut counts = RunCounts {
            total: subtasks.len(),
            ..Default::default()
        };
        for subtask in subtasks {
            match subtask.state {
                SubtaskState::Committed => counts.success += 1,
                SubtaskState::Skipped => counts.skipped += 1,
                _ => counts.failed += 1,
            }
        }
        counts
    }
}

/// One execution of a rotation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistory {
    /// Run id
    pub id: RunId,
    /// Task that was run
    pub task_id: TaskId,
    /// Task attributes at start
    pub snapshot: RunSnapshot,
    /// Run this one re-runs a subtask of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_of: Option<RunId>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time; `None` while running or if the process died
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether no host failed
    #[serde(default)]
    pub success: bool,
    /// Wall time in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
    /// Outcome tallies
    #[serde(default)]
    pub counts: RunCounts,
}

impl RunHistory {
    /// An unfinished run over `hosts`.
    pub fn start(task: &RotationTask, hosts: &[HostConnection], rerun_of: Option<RunId>) -> Self {
        Self {
            id: RunId::new(),
            task_id: task.id,
            snapshot: RunSnapshot {
                task_name: task.name.clone(),
                username: task.username.to_string(),
                hostnames: hosts.iter().map(|h| h.hostname.clone()).collect(),
                org_id: task.org_id.clone(),
            },
            rerun_of,
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            duration_ms: 0,
            counts: RunCounts {
                total: hosts.len(),
                ..Default::default()
            },
        }
    }

    /// Whether the run has finished.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Close the run with its subtasks' outcomes.
    pub fn finish(&mut self, subtasks: &[SubtaskHistory]) {
        let now = Utc::now();
        self.counts = RunCounts::tally(subtasks);
        self.success = self.counts.failed == 0;
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
    }
}

/// Outcome of one host within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskHistory {
    /// Subtask id
    pub id: SubtaskId,
    /// Owning run
    pub run_id: RunId,
    /// Target asset
    pub asset: AssetId,
    /// Target hostname
    pub hostname: String,
    /// Final state
    pub state: SubtaskState,
    /// Whether the new credential was committed
    pub success: bool,
    /// Failure reason such as `verify-failed: auth-failure`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Executor message for the failing step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Store commit attempts
    #[serde(default)]
    pub attempts: u32,
    /// Sealed latest secret before the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_secret: Option<SealedSecret>,
    /// Sealed candidate secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_secret: Option<SealedSecret>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubtaskHistory {
    /// A pending subtask for `host`.
    pub fn pending(run_id: RunId, host: &HostConnection) -> Self {
        Self {
            id: SubtaskId::new(),
            run_id,
            asset: host.asset.clone(),
            hostname: host.hostname.clone(),
            state: SubtaskState::Pending,
            success: false,
            reason: None,
            detail: None,
            attempts: 0,
            old_secret: None,
            new_secret: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// A host skipped by cancellation.
    pub fn skipped(run_id: RunId, host: &HostConnection) -> Self {
        let mut subtask = Self::pending(run_id, host);
        subtask.state = SubtaskState::Skipped;
        subtask.reason = Some("cancelled".to_string());
        subtask.finished_at = Some(subtask.started_at);
        subtask
    }

    /// Move to a non-terminal state.
    pub fn advance(&mut self, next: SubtaskState) -> Result<()> {
        self.state.transition(next)
    }

    /// Terminal success.
    pub fn commit(&mut self) -> Result<()> {
        self.state.transition(SubtaskState::Committed)?;
        self.success = true;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Terminal failure with a reason.
    pub fn fail(&mut self, state: SubtaskState, reason: impl Into<String>, detail: Option<String>) -> Result<()> {
        self.state.transition(state)?;
        self.success = false;
        self.reason = Some(reason.into());
        self.detail = detail.filter(|d| !d.is_empty());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Failure forced from any non-terminal state, for internal errors.
    pub fn abort(&mut self, reason: impl Into<String>, detail: Option<String>) {
        let state = match self.state {
            SubtaskState::Verifying => SubtaskState::VerifyFailed,
            _ => SubtaskState::ChangeFailed,
        };
        self.state = state;
        self.success = false;
        self.reason = Some(reason.into());
        self.detail = detail;
        self.finished_at = Some(Utc::now());
    }
}

/// Sort subtasks for display: failures, then successes, then the rest,
/// newest first within each group.
pub fn display_order(subtasks: &mut [SubtaskHistory]) {
    fn rank(subtask: &SubtaskHistory) -> u8 {
        if subtask.state.is_failure() {
            0
        } else if subtask.success {
            1
        } else {
            2
        }
    }
    subtasks.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| b.started_at.cmp(&a.started_at))
    });
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunFile {
    run: RunHistory,
    #[serde(default)]
    subtasks: Vec<SubtaskHistory>,
}

/// Store for run and subtask history.
#[derive(Default)]
pub struct HistoryStore {
    dir: Option<PathBuf>,
    runs: RwLock<HashMap<RunId, RunFile>>,
}

impl HistoryStore {
    /// History kept only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open history persisted under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let runs_dir = dir.join("runs");
        std::fs::create_dir_all(&runs_dir)?;

        let mut runs = HashMap::new();
        for entry in std::fs::read_dir(&runs_dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let file: RunFile = serde_json::from_str(&content)?;
            runs.insert(file.run.id, file);
        }
        debug!("Loaded {} runs from {:?}", runs.len(), runs_dir);

        Ok(Self {
            dir: Some(dir),
            runs: RwLock::new(runs),
        })
    }

    fn persist(&self, file: &RunFile) -> Result<()> {
        if let Some(dir) = &self.dir {
            let path = dir.join("runs").join(format!("{}.json", file.run.id));
            write_atomic(path, &serde_json::to_vec_pretty(file)?)?;
        }
        Ok(())
    }

    /// Record a run as started.
    pub fn begin_run(&self, run: &RunHistory) -> Result<()> {
        let file = RunFile {
            run: run.clone(),
            subtasks: Vec::new(),
        };
        let mut runs = self.runs.write();
        if runs.contains_key(&run.id) {
            bug!("run {} recorded twice", run.id);
        }
        self.persist(&file)?;
        runs.insert(run.id, file);
        Ok(())
    }

    /// Add a finished subtask to its run.
    ///
    /// The in-memory row is kept even when the file write fails; the write
    /// error is still returned.
    pub fn record_subtask(&self, subtask: &SubtaskHistory) -> Result<()> {
        let mut runs = self.runs.write();
        let file = runs
            .get_mut(&subtask.run_id)
            .ok_or_else(|| WardenError::NotFound(format!("run {}", subtask.run_id)))?;
        if file.run.is_finished() {
            bug!("run {} is finished", subtask.run_id);
        }
        if file.subtasks.iter().any(|s| s.asset == subtask.asset) {
            bug!("run {} already has a subtask for {}", subtask.run_id, subtask.asset);
        }

        file.subtasks.push(subtask.clone());
        self.persist(file)
    }

    /// Close a run. Finished runs are immutable.
    ///
    /// Like [`record_subtask`](Self::record_subtask), memory is updated
    /// before the file write is attempted.
    pub fn finish_run(&self, run: &RunHistory) -> Result<()> {
        let mut runs = self.runs.write();
        let file = runs
            .get_mut(&run.id)
            .ok_or_else(|| WardenError::NotFound(format!("run {}", run.id)))?;
        if file.run.is_finished() {
            bug!("run {} finished twice", run.id);
        }

        file.run = run.clone();
        self.persist(file)
    }

    /// A run by id.
    pub fn run(&self, id: &RunId) -> Option<RunHistory> {
        self.runs.read().get(id).map(|f| f.run.clone())
    }

    /// Runs of one task, newest first.
    pub fn runs_for_task(&self, task_id: &TaskId) -> Vec<RunHistory> {
        let mut runs: Vec<RunHistory> = self
            .runs
            .read()
            .values()
            .filter(|f| &f.run.task_id == task_id)
            .map(|f| f.run.clone())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    /// Subtasks of one run in display order.
    pub fn subtasks(&self, run_id: &RunId) -> Result<Vec<SubtaskHistory>> {
        let mut subtasks = self
            .runs
            .read()
            .get(run_id)
            .map(|f| f.subtasks.clone())
            .ok_or_else(|| WardenError::NotFound(format!("run {}", run_id)))?;
        display_order(&mut subtasks);
        Ok(subtasks)
    }

    /// Subtasks of a task's most recent run.
    pub fn latest_subtasks(&self, task_id: &TaskId) -> Vec<SubtaskHistory> {
        match self.runs_for_task(task_id).first() {
            Some(run) => self.subtasks(&run.id).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}
