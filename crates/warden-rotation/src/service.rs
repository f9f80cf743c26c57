//! Outbound rotation surface: trigger, cancel and query runs.

use crate::catalog::TaskCatalog;
use crate::engine::RotationEngine;
use crate::history::{RunHistory, SubtaskHistory};
use crate::task::RotationTask;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_types::{AssetId, Result, RunId, TaskId, WardenError};

struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<Option<RunHistory>>,
}

/// Runs rotation tasks from the catalog in the background.
pub struct RotationService {
    engine: RotationEngine,
    catalog: Arc<TaskCatalog>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
}

impl RotationService {
    /// Create a service.
    pub fn new(engine: RotationEngine, catalog: Arc<TaskCatalog>) -> Self {
        Self {
            engine,
            catalog,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The task catalog.
    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    /// The engine runs execute on.
    pub fn engine(&self) -> &RotationEngine {
        &self.engine
    }

    /// Start a run of a task and return its id without waiting.
    ///
    /// Validation errors are returned here and leave no history behind.
    pub async fn trigger(&self, task_id: &TaskId) -> Result<RunId> {
        let task = self.catalog.task(task_id)?;
        self.start(task, None, None).await
    }

    /// Start a new run limited to one asset of an earlier run.
    pub async fn rerun_subtask(&self, run_id: &RunId, asset: &AssetId) -> Result<RunId> {
        let previous = self
            .engine
            .history()
            .run(run_id)
            .ok_or_else(|| WardenError::NotFound(format!("run {}", run_id)))?;
        let subtasks = self.engine.history().subtasks(run_id)?;
        if !subtasks.iter().any(|s| &s.asset == asset) {
            return Err(WardenError::NotFound(format!(
                "no subtask for {} in run {}",
                asset, run_id
            )));
        }

        let task = self.catalog.task(&previous.task_id)?;
        self.start(task, Some(asset), Some(*run_id)).await
    }

    async fn start(&self, task: RotationTask, only: Option<&AssetId>, rerun_of: Option<RunId>) -> Result<RunId> {
        let hosts = self.engine.prepare(&task, only).await?;
        let run = self.engine.begin(&task, &hosts, rerun_of)?;
        let run_id = run.id;

        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        self.active.lock().insert(
            run_id,
            ActiveRun {
                cancel: cancel.clone(),
                done: rx,
            },
        );

        let engine = self.engine.clone();
        let catalog = self.catalog.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            match engine.execute(run, &task, hosts, cancel).await {
                Ok(finished) => {
                    if let Some(at) = finished.finished_at {
                        if let Err(e) = catalog.touch_last_run(&task.id, at) {
                            warn!(task = %task.name, "Could not record last run time: {}", e);
                        }
                    }
                    let _ = tx.send(Some(finished));
                }
                Err(e) => error!(run_id = %run_id, "Rotation run aborted: {}", e),
            }
            active.lock().remove(&run_id);
        });

        Ok(run_id)
    }

    /// Request cancellation of a running run.
    ///
    /// Returns `false` if the run already finished.
    pub fn cancel(&self, run_id: &RunId) -> Result<bool> {
        if let Some(active) = self.active.lock().get(run_id) {
            info!(run_id = %run_id, "Cancelling rotation run");
            active.cancel.cancel();
            return Ok(true);
        }
        match self.engine.history().run(run_id) {
            Some(_) => Ok(false),
            None => Err(WardenError::NotFound(format!("run {}", run_id))),
        }
    }

    /// Whether a run is still executing in this process.
    pub fn is_running(&self, run_id: &RunId) -> bool {
        self.active.lock().contains_key(run_id)
    }

    /// Wait for a run to finish.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunHistory> {
        let receiver = self.active.lock().get(run_id).map(|a| a.done.clone());
        if let Some(mut receiver) = receiver {
            let finished = match receiver.wait_for(|done| done.is_some()).await {
                Ok(done) => (*done).clone(),
                Err(_) => None,
            };
            if let Some(run) = finished {
                return Ok(run);
            }
        }

        match self.engine.history().run(run_id) {
            Some(run) if run.is_finished() => Ok(run),
            Some(_) => Err(WardenError::Other(format!("run {} did not finish", run_id))),
            None => Err(WardenError::NotFound(format!("run {}", run_id))),
        }
    }

    /// Runs of a task, newest first.
    pub fn get_run_history(&self, task_id: &TaskId) -> Vec<RunHistory> {
        self.engine.history().runs_for_task(task_id)
    }

    /// Subtasks of a run in display order.
    pub fn get_subtask_history(&self, run_id: &RunId) -> Result<Vec<SubtaskHistory>> {
        self.engine.history().subtasks(run_id)
    }

    /// Subtasks of a task's most recent run.
    pub fn latest_subtask_history(&self, task_id: &TaskId) -> Vec<SubtaskHistory> {
        self.engine.history().latest_subtasks(task_id)
    }
}
