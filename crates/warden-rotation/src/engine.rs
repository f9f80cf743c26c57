//! The rotation engine.
//!
//! One run of a task goes through every resolved host with a bounded pool
//! of workers. For each host:
//!
//! 1. generate a fresh candidate password
//! 2. change it on the host through the administrative account
//! 3. log in as the account with the candidate
//! 4. store the candidate as the account's latest credential
//!
//! A host that fails at 2 or 3 keeps its previous latest credential. Store
//! conflicts at 4 are retried; remote steps are never retried within a run.

use crate::classify::{classify, StepReport};
use crate::history::{HistoryStore, RunHistory, SubtaskHistory};
use crate::task::RotationTask;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_secrets::PasswordGenerator;
use warden_types::config::EngineConfig;
use warden_types::{
    AssetId, AuthContext, CredentialBackend, CredentialMetadata, ExecutionOptions, HostConnection,
    Inventory, ModuleInvocation, RemoteExecutor, Result, RunId, SecretCodec, SecretMaterial,
    StepOutcome, SubtaskState, ValidationError, WardenError,
};

/// Orchestrates rotation runs.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct RotationEngine {
    backend: Arc<dyn CredentialBackend>,
    executor: Arc<dyn RemoteExecutor>,
    inventory: Arc<dyn Inventory>,
    codec: Arc<dyn SecretCodec>,
    history: Arc<HistoryStore>,
    config: EngineConfig,
    generator: PasswordGenerator,
}

impl RotationEngine {
    /// Create an engine.
    pub fn new(
        backend: Arc<dyn CredentialBackend>,
        executor: Arc<dyn RemoteExecutor>,
        inventory: Arc<dyn Inventory>,
        codec: Arc<dyn SecretCodec>,
        history: Arc<HistoryStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(WardenError::Config("engine.concurrency must be at least 1".to_string()));
        }
        if config.store_retries == 0 {
            return Err(WardenError::Config("engine.store_retries must be at least 1".to_string()));
        }
        let generator = PasswordGenerator::new(config.password_length)?;
        Ok(Self {
            backend,
            executor,
            inventory,
            codec,
            history,
            config,
            generator,
        })
    }

    /// The history this engine writes to.
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// The credential backend this engine commits to.
    pub fn backend(&self) -> &Arc<dyn CredentialBackend> {
        &self.backend
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Validate a task and resolve its hosts.
    ///
    /// `only` restricts the run to one of the task's assets. Fails with
    /// `disallowed-account` or `empty-target-set` before anything is
    /// recorded.
    pub async fn prepare(&self, task: &RotationTask, only: Option<&AssetId>) -> Result<Vec<HostConnection>> {
        task.check_account(&self.config.reserved_accounts)?;

        let assets: Vec<AssetId> = task
            .unique_assets()
            .into_iter()
            .filter(|a| only.map_or(true, |o| o == a))
            .collect();
        if assets.is_empty() {
            return Err(ValidationError::EmptyTargetSet.into());
        }

        let mut seen = HashSet::new();
        let hosts: Vec<HostConnection> = self
            .inventory
            .resolve(&assets)
            .await?
            .into_iter()
            .filter(|h| seen.insert(h.asset.clone()))
            .collect();
        if hosts.is_empty() {
            return Err(ValidationError::EmptyTargetSet.into());
        }
        Ok(hosts)
    }

    /// Record a new unfinished run.
    pub fn begin(&self, task: &RotationTask, hosts: &[HostConnection], rerun_of: Option<RunId>) -> Result<RunHistory> {
        let run = RunHistory::start(task, hosts, rerun_of);
        self.history.begin_run(&run)?;
        info!(
            run_id = %run.id,
            task = %task.name,
            username = %task.username,
            hosts = hosts.len(),
            executor = self.executor.name(),
            "Rotation run started"
        );
        Ok(run)
    }

    /// Validate, record and execute a run to completion.
    pub async fn run(&self, task: &RotationTask, cancel: CancellationToken) -> Result<RunHistory> {
        let hosts = self.prepare(task, None).await?;
        let run = self.begin(task, &hosts, None)?;
        self.execute(run, task, hosts, cancel).await
    }

    /// Execute a begun run.
    ///
    /// Cancellation is checked before each host is dispatched. Hosts already
    /// dispatched finish normally; the rest are recorded as skipped.
    ///
    /// If history cannot be written, no further hosts are dispatched, but
    /// running hosts still finish and the run is still closed before the
    /// first write error is returned.
    pub async fn execute(
        &self,
        mut run: RunHistory,
        task: &RotationTask,
        hosts: Vec<HostConnection>,
        cancel: CancellationToken,
    ) -> Result<RunHistory> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut join_set = JoinSet::new();
        let mut dispatched = Vec::new();
        let mut subtasks = Vec::with_capacity(hosts.len());
        // History write failures must not abandon hosts already in flight.
        let mut write_error: Option<WardenError> = None;

        for host in hosts {
            if write_error.is_some() || cancel.is_cancelled() {
                self.skip(run.id, &host, &mut subtasks, &mut write_error);
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.skip(run.id, &host, &mut subtasks, &mut write_error);
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                keep_first(&mut write_error, WardenError::Bug("worker pool closed".to_string()));
                self.skip(run.id, &host, &mut subtasks, &mut write_error);
                continue;
            };

            dispatched.push(host.clone());
            let engine = self.clone();
            let task = task.clone();
            let run_id = run.id;
            join_set.spawn(async move {
                let _permit = permit;
                engine.rotate_host(run_id, &task, host).await
            });

            // Record whatever already finished so history tracks progress.
            while let Some(joined) = join_set.try_join_next() {
                self.collect(joined, &mut subtasks, &mut write_error);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            self.collect(joined, &mut subtasks, &mut write_error);
        }

        // A worker that panicked leaves its host without a row.
        for host in &dispatched {
            if !subtasks.iter().any(|s| s.asset == host.asset) {
                let mut subtask = SubtaskHistory::pending(run.id, host);
                subtask.abort("module-error", Some("worker terminated unexpectedly".to_string()));
                self.record(subtask, &mut subtasks, &mut write_error);
            }
        }

        run.finish(&subtasks);
        if let Err(e) = self.history.finish_run(&run) {
            error!(run_id = %run.id, "Could not record run completion: {}", e);
            keep_first(&mut write_error, e);
        }

        info!(
            run_id = %run.id,
            task = %task.name,
            total = run.counts.total,
            success = run.counts.success,
            failed = run.counts.failed,
            skipped = run.counts.skipped,
            "Rotation run finished"
        );
        match write_error {
            Some(e) => Err(e),
            None => Ok(run),
        }
    }

    fn skip(
        &self,
        run_id: RunId,
        host: &HostConnection,
        subtasks: &mut Vec<SubtaskHistory>,
        write_error: &mut Option<WardenError>,
    ) {
        debug!(run_id = %run_id, asset = %host.asset, "Skipping host");
        self.record(SubtaskHistory::skipped(run_id, host), subtasks, write_error);
    }

    fn collect(
        &self,
        joined: std::result::Result<SubtaskHistory, tokio::task::JoinError>,
        subtasks: &mut Vec<SubtaskHistory>,
        write_error: &mut Option<WardenError>,
    ) {
        match joined {
            Ok(subtask) => self.record(subtask, subtasks, write_error),
            Err(e) => error!("Rotation worker failed: {}", e),
        }
    }

    /// Keep a finished subtask and write it to history.
    ///
    /// A failed write is logged with the sealed candidate so the host's new
    /// password stays recoverable.
    fn record(
        &self,
        subtask: SubtaskHistory,
        subtasks: &mut Vec<SubtaskHistory>,
        write_error: &mut Option<WardenError>,
    ) {
        if let Err(e) = self.history.record_subtask(&subtask) {
            error!(
                run_id = %subtask.run_id,
                asset = %subtask.asset,
                state = %subtask.state,
                reason = subtask.reason.as_deref().unwrap_or(""),
                new_secret = subtask.new_secret.as_ref().map(|s| s.as_token()).unwrap_or(""),
                "Could not record subtask: {}",
                e
            );
            keep_first(write_error, e);
        }
        subtasks.push(subtask);
    }

    /// Run the change/verify/commit protocol against one host.
    async fn rotate_host(&self, run_id: RunId, task: &RotationTask, host: HostConnection) -> SubtaskHistory {
        let mut subtask = SubtaskHistory::pending(run_id, &host);
        if let Err(e) = self.rotate_host_inner(task, &host, &mut subtask).await {
            error!(run_id = %run_id, asset = %host.asset, "Rotation failed: {}", e);
            if !subtask.state.is_terminal() {
                subtask.abort("module-error", Some(e.to_string()));
            }
        }
        subtask
    }

    async fn rotate_host_inner(
        &self,
        task: &RotationTask,
        host: &HostConnection,
        subtask: &mut SubtaskHistory,
    ) -> Result<()> {
        let username = &task.username;
        let previous = self.backend.get(&host.asset, username).await?;
        subtask.old_secret = previous.map(|r| r.secret);

        let candidate = self.generator.generate_material();
        subtask.new_secret = Some(self.codec.seal_material(&candidate)?);

        subtask.advance(SubtaskState::Changing)?;
        let change = self
            .step(
                host,
                ModuleInvocation::ChangePassword {
                    username: username.clone(),
                    secret: candidate.clone(),
                },
                AuthContext::Privileged,
            )
            .await;
        if !change.is_success() {
            warn!(asset = %host.asset, username = %username, outcome = %change.outcome, "Password change failed");
            return subtask.fail(
                SubtaskState::ChangeFailed,
                format!("change-failed: {}", change.outcome),
                change.failure().map(|f| f.to_string()),
            );
        }

        subtask.advance(SubtaskState::Verifying)?;
        let verify = self
            .step(
                host,
                ModuleInvocation::ConnectivityCheck,
                AuthContext::Account {
                    username: username.clone(),
                    secret: candidate.clone(),
                },
            )
            .await;
        if !verify.is_success() {
            warn!(asset = %host.asset, username = %username, outcome = %verify.outcome, "New password did not verify");
            return subtask.fail(
                SubtaskState::VerifyFailed,
                format!("verify-failed: {}", verify.outcome),
                verify.failure().map(|f| f.to_string()),
            );
        }

        self.commit(task, host, &candidate, subtask).await
    }

    async fn commit(
        &self,
        task: &RotationTask,
        host: &HostConnection,
        candidate: &SecretMaterial,
        subtask: &mut SubtaskHistory,
    ) -> Result<()> {
        let metadata = CredentialMetadata::new(
            format!("rotation:{}", task.name),
            format!("rotated by run {}", subtask.run_id),
        )
        .with_org(task.org_id.clone());

        let mut last_conflict = String::new();
        for attempt in 1..=self.config.store_retries {
            subtask.attempts = attempt;
            match self
                .backend
                .create(&host.asset, &task.username, candidate, &metadata)
                .await
            {
                Ok(record) => {
                    info!(
                        asset = %host.asset,
                        username = %task.username,
                        version = record.version_count,
                        "Rotated credential committed"
                    );
                    return subtask.commit();
                }
                Err(e) if e.is_conflict() => {
                    warn!(asset = %host.asset, attempt, "Credential store conflict: {}", e);
                    last_conflict = e.to_string();
                }
                Err(e) => {
                    error!(
                        asset = %host.asset,
                        username = %task.username,
                        "Host password changed but not stored: {}",
                        e
                    );
                    return subtask.fail(SubtaskState::VerifyFailed, "module-error", Some(e.to_string()));
                }
            }
        }

        error!(
            asset = %host.asset,
            username = %task.username,
            "Host password changed but not stored after {} attempts",
            self.config.store_retries
        );
        subtask.fail(SubtaskState::VerifyFailed, "store-conflict", Some(last_conflict))
    }

    /// One remote call against one host, bounded by the engine timeout.
    async fn step(&self, host: &HostConnection, invocation: ModuleInvocation, auth: AuthContext) -> StepReport {
        let options = ExecutionOptions {
            timeout: self.timeout(),
        };
        let call = self
            .executor
            .execute(std::slice::from_ref(host), &invocation, &auth, &options);

        match tokio::time::timeout(options.timeout, call).await {
            Ok(Ok(report)) => classify(report.host(&host.hostname)),
            Ok(Err(e)) => StepReport::from_error(e),
            Err(_) => StepReport::new(
                StepOutcome::Unreachable,
                format!("timed out after {}s", options.timeout.as_secs()),
            ),
        }
    }
}

fn keep_first(slot: &mut Option<WardenError>, error: WardenError) {
    if slot.is_none() {
        *slot = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_types::{
        BackendKind, CredentialFilter, CredentialRecord, RecordId, SealedSecret, Username,
    };

    fn config() -> EngineConfig {
        EngineConfig {
            timeout_secs: 1,
            ..Default::default()
        }
    }

    fn engine_with(
        backend: Arc<dyn CredentialBackend>,
        fleet: &Arc<FakeFleet>,
        task: &RotationTask,
        config: EngineConfig,
    ) -> RotationEngine {
        let catalog = catalog(vec![task.clone()], &[]);
        RotationEngine::new(
            backend,
            fleet.clone(),
            inventory(&catalog),
            codec(),
            Arc::new(HistoryStore::in_memory()),
            config,
        )
        .unwrap()
    }

    async fn seed(backend: &Arc<dyn CredentialBackend>, host: &str, pw: &str) {
        backend
            .create(
                &asset(host),
                &user("deploy"),
                &SecretMaterial::from_password(pw),
                &CredentialMetadata::new("seed", ""),
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_zero_store_retries_rejected() {
        let t = task("deploy", &["a"]);
        let catalog = catalog(vec![t], &[]);
        let result = RotationEngine::new(
            local_backend(),
            FakeFleet::new(),
            inventory(&catalog),
            codec(),
            Arc::new(HistoryStore::in_memory()),
            EngineConfig {
                store_retries: 0,
                ..config()
            },
        );
        assert!(matches!(result, Err(WardenError::Config(_))));
    }

    #[tokio::test]
    async fn test_reserved_account_creates_no_history() {
        let fleet = FakeFleet::new();
        let t = task("root", &["a"]);
        let engine = engine_with(local_backend(), &fleet, &t, config());

        let err = engine.run(&t, CancellationToken::new()).await.unwrap_err();
        match err {
            WardenError::Validation(e) => assert_eq!(e.code(), "disallowed-account"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(engine.history().runs_for_task(&t.id).is_empty());
        assert!(fleet.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_target_set() {
        let fleet = FakeFleet::new();
        let t = task("deploy", &[]);
        let engine = engine_with(local_backend(), &fleet, &t, config());
        let err = engine.run(&t, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WardenError::Validation(ValidationError::EmptyTargetSet)));

        // Assets unknown to the inventory resolve to nothing as well.
        let mut unknown = task("deploy", &[]);
        unknown.assets.push(asset("ghost"));
        let err = engine.run(&unknown, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WardenError::Validation(ValidationError::EmptyTargetSet)));
        assert!(engine.history().runs_for_task(&t.id).is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_scenario() {
        let fleet = FakeFleet::new();
        let backend = local_backend();
        let t = task("deploy", &["a", "b"]);
        let engine = engine_with(backend.clone(), &fleet, &t, config());
        seed(&backend, "a", "old-a").await;
        seed(&backend, "b", "old-b").await;
        let before_b = backend.get(&asset("b"), &user("deploy")).await.unwrap().unwrap();

        fleet.fault("b", Fault::LoginRejected);
        let run = engine.run(&t, CancellationToken::new()).await.unwrap();

        assert_eq!((run.counts.total, run.counts.success, run.counts.failed), (2, 1, 1));
        assert!(!run.success);
        assert!(run.is_finished());

        let a = backend.get(&asset("a"), &user("deploy")).await.unwrap().unwrap();
        assert_eq!(a.version_count, 2);
        assert_eq!(
            backend.reveal(&a).unwrap().password().map(str::to_string),
            fleet.password("a", "deploy")
        );
        assert_eq!(backend.get(&asset("b"), &user("deploy")).await.unwrap(), Some(before_b));

        let subtasks = engine.history().subtasks(&run.id).unwrap();
        assert_eq!(subtasks[0].hostname, "b");
        assert_eq!(subtasks[0].state, SubtaskState::VerifyFailed);
        assert_eq!(subtasks[0].reason.as_deref(), Some("verify-failed: auth-failure"));
        assert!(subtasks[0].detail.as_deref().unwrap().starts_with("auth-failure: "));
        assert_eq!(subtasks[1].state, SubtaskState::Committed);
        assert_eq!(subtasks[1].attempts, 1);
        assert!(subtasks[1].old_secret.is_some());
        let sealed_new = subtasks[1].new_secret.clone().unwrap();
        assert_eq!(
            codec().reveal_material(&sealed_new).unwrap().password().map(str::to_string),
            fleet.password("a", "deploy")
        );
    }

    #[tokio::test]
    async fn test_change_failures_leave_store_untouched() {
        let fleet = FakeFleet::new();
        let backend = local_backend();
        let t = task("deploy", &["down", "silent", "rejected", "slow"]);
        let engine = engine_with(backend.clone(), &fleet, &t, config());
        for host in ["down", "silent", "rejected", "slow"] {
            seed(&backend, host, "known-good").await;
        }
        fleet.fault("down", Fault::Down);
        fleet.fault("silent", Fault::Silent);
        fleet.fault("rejected", Fault::ChangeRejected);
        fleet.fault("slow", Fault::Hang);

        let run = engine.run(&t, CancellationToken::new()).await.unwrap();
        assert_eq!(run.counts.failed, 4);

        let reasons: std::collections::HashMap<String, Option<String>> = engine
            .history()
            .subtasks(&run.id)
            .unwrap()
            .into_iter()
            .map(|s| (s.hostname, s.reason))
            .collect();
        assert_eq!(reasons["down"].as_deref(), Some("change-failed: unreachable"));
        assert_eq!(reasons["silent"].as_deref(), Some("change-failed: unreachable"));
        assert_eq!(reasons["rejected"].as_deref(), Some("change-failed: module-error"));
        assert_eq!(reasons["slow"].as_deref(), Some("change-failed: unreachable"));

        for host in ["down", "silent", "rejected", "slow"] {
            let latest = backend.get(&asset(host), &user("deploy")).await.unwrap().unwrap();
            assert_eq!(latest.version_count, 1);
            assert_eq!(backend.reveal(&latest).unwrap().password(), Some("known-good"));
        }
    }

    #[tokio::test]
    async fn test_two_runs_add_two_versions() {
        let fleet = FakeFleet::new();
        let backend = local_backend();
        let t = task("deploy", &["a", "b"]);
        let engine = engine_with(backend.clone(), &fleet, &t, config());

        let first = engine.run(&t, CancellationToken::new()).await.unwrap();
        let second = engine.run(&t, CancellationToken::new()).await.unwrap();
        assert!(first.success && second.success);
        assert_eq!(engine.history().runs_for_task(&t.id).len(), 2);

        for host in ["a", "b"] {
            let all = backend
                .filter(&CredentialFilter::all().asset(asset(host)))
                .await
                .unwrap();
            assert_eq!(all.len(), 2);
            assert_eq!(all.iter().filter(|r| r.is_latest).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_cancellation_skips_undispatched_hosts() {
        let fleet = FakeFleet::new();
        let t = task("deploy", &["a", "b", "c"]);
        let engine = engine_with(
            local_backend(),
            &fleet,
            &t,
            EngineConfig {
                concurrency: 1,
                ..config()
            },
        );

        let cancel = CancellationToken::new();
        fleet.cancel_on_first_change(cancel.clone());
        let run = engine.run(&t, cancel).await.unwrap();

        assert_eq!(run.counts.total, 3);
        assert_eq!(run.counts.success, 1);
        assert_eq!(run.counts.skipped, 2);
        assert_eq!(run.counts.failed, 0);
        assert!(run.success);

        let subtasks = engine.history().subtasks(&run.id).unwrap();
        let skipped: Vec<&str> = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Skipped)
            .map(|s| s.hostname.as_str())
            .collect();
        assert_eq!(skipped.len(), 2);
        assert!(!skipped.contains(&"a"));
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let fleet = FakeFleet::new();
        fleet.set_delay(Duration::from_millis(20));
        let hosts: Vec<String> = (0..8).map(|i| format!("h{}", i)).collect();
        let names: Vec<&str> = hosts.iter().map(String::as_str).collect();
        let t = task("deploy", &names);
        let engine = engine_with(
            local_backend(),
            &fleet,
            &t,
            EngineConfig {
                concurrency: 3,
                ..config()
            },
        );

        let run = engine.run(&t, CancellationToken::new()).await.unwrap();
        assert_eq!(run.counts.success, 8);
        assert!(fleet.peak_concurrency() <= 3);
        assert!(fleet.peak_concurrency() >= 2);
    }

    #[tokio::test]
    async fn test_history_write_failure_lets_running_hosts_finish() {
        let dir = tempfile::TempDir::new().unwrap();
        let history = Arc::new(HistoryStore::open(dir.path()).unwrap());
        let fleet = FakeFleet::new();
        fleet.set_delay(Duration::from_millis(50));
        let backend = local_backend();
        let t = task("deploy", &["a", "b", "c"]);
        let catalog = catalog(vec![t.clone()], &[]);
        let engine = RotationEngine::new(
            backend.clone(),
            fleet.clone(),
            inventory(&catalog),
            codec(),
            history.clone(),
            EngineConfig {
                concurrency: 2,
                ..config()
            },
        )
        .unwrap();

        let hosts = engine.prepare(&t, None).await.unwrap();
        let run = engine.begin(&t, &hosts, None).unwrap();
        let runs_dir = dir.path().join("runs");
        std::fs::remove_dir_all(&runs_dir).unwrap();
        std::fs::write(&runs_dir, b"not a directory").unwrap();

        let run_id = run.id;
        assert!(engine.execute(run, &t, hosts, CancellationToken::new()).await.is_err());

        let finished = history.run(&run_id).unwrap();
        assert!(finished.is_finished());
        let subtasks = history.subtasks(&run_id).unwrap();
        assert_eq!(subtasks.len(), 3);

        for subtask in &subtasks {
            let host = subtask.hostname.as_str();
            match fleet.password(host, "deploy") {
                Some(on_host) => {
                    assert_eq!(subtask.state, SubtaskState::Committed);
                    let latest = backend.get(&asset(host), &user("deploy")).await.unwrap().unwrap();
                    assert_eq!(backend.reveal(&latest).unwrap().password(), Some(on_host.as_str()));
                }
                None => assert_eq!(subtask.state, SubtaskState::Skipped),
            }
        }
        assert!(subtasks.iter().any(|s| s.state == SubtaskState::Committed));
    }

    mock! {
        Backend {}

        #[async_trait]
        impl CredentialBackend for Backend {
            fn kind(&self) -> BackendKind;
            async fn get(&self, asset: &AssetId, username: &Username) -> Result<Option<CredentialRecord>>;
            async fn filter(&self, filter: &CredentialFilter) -> Result<Vec<CredentialRecord>>;
            async fn create(
                &self,
                asset: &AssetId,
                username: &Username,
                material: &SecretMaterial,
                metadata: &CredentialMetadata,
            ) -> Result<CredentialRecord>;
            fn reveal(&self, record: &CredentialRecord) -> Result<SecretMaterial>;
        }
    }

    fn record_for(asset: &AssetId, username: &Username, version: u64) -> CredentialRecord {
        let now = chrono::Utc::now();
        CredentialRecord {
            id: RecordId::new(),
            asset: asset.clone(),
            username: username.clone(),
            name: CredentialRecord::default_name(asset, username),
            secret: SealedSecret::from_token("sealed"),
            comment: String::new(),
            created_by: String::new(),
            org_id: String::new(),
            created_at: now,
            updated_at: now,
            is_latest: true,
            version_count: version,
        }
    }

    #[tokio::test]
    async fn test_store_conflict_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut backend = MockBackend::new();
        backend.expect_get().returning(|_, _| Ok(None));
        backend.expect_create().times(3).returning(move |a, u, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(WardenError::PersistenceConflict("busy".to_string()))
            } else {
                Ok(record_for(a, u, 1))
            }
        });

        let fleet = FakeFleet::new();
        let t = task("deploy", &["a"]);
        let engine = engine_with(Arc::new(backend), &fleet, &t, config());

        let run = engine.run(&t, CancellationToken::new()).await.unwrap();
        assert!(run.success);
        let subtasks = engine.history().subtasks(&run.id).unwrap();
        assert_eq!(subtasks[0].state, SubtaskState::Committed);
        assert_eq!(subtasks[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_store_conflict_exhausted() {
        let mut backend = MockBackend::new();
        backend.expect_get().returning(|_, _| Ok(None));
        backend
            .expect_create()
            .times(3)
            .returning(|_, _, _, _| Err(WardenError::PersistenceConflict("busy".to_string())));

        let fleet = FakeFleet::new();
        let t = task("deploy", &["a"]);
        let engine = engine_with(Arc::new(backend), &fleet, &t, config());

        let run = engine.run(&t, CancellationToken::new()).await.unwrap();
        assert_eq!(run.counts.failed, 1);
        let subtasks = engine.history().subtasks(&run.id).unwrap();
        assert_eq!(subtasks[0].state, SubtaskState::VerifyFailed);
        assert_eq!(subtasks[0].reason.as_deref(), Some("store-conflict"));
    }

    #[tokio::test]
    async fn test_backend_error_is_module_error() {
        let mut backend = MockBackend::new();
        backend
            .expect_get()
            .returning(|_, _| Err(WardenError::Backend("vault sealed".to_string())));

        let fleet = FakeFleet::new();
        let t = task("deploy", &["a"]);
        let engine = engine_with(Arc::new(backend), &fleet, &t, config());

        let run = engine.run(&t, CancellationToken::new()).await.unwrap();
        assert_eq!(run.counts.failed, 1);
        let subtasks = engine.history().subtasks(&run.id).unwrap();
        assert_eq!(subtasks[0].reason.as_deref(), Some("module-error"));
        assert!(fleet.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_runs_keep_one_latest() {
        let fleet = FakeFleet::new();
        let backend = local_backend();
        let t = task("deploy", &["a"]);
        let engine = engine_with(backend.clone(), &fleet, &t, config());

        let (first, second) = tokio::join!(
            engine.run(&t, CancellationToken::new()),
            engine.run(&t, CancellationToken::new())
        );
        let committed = [first.unwrap(), second.unwrap()]
            .iter()
            .map(|r| r.counts.success)
            .sum::<usize>();

        let all = backend
            .filter(&CredentialFilter::all().asset(asset("a")))
            .await
            .unwrap();
        assert_eq!(all.len(), committed);
        assert_eq!(all.iter().filter(|r| r.is_latest).count(), 1);
        let versions: Vec<u64> = all.iter().map(|r| r.version_count).collect();
        assert_eq!(versions, (1..=committed as u64).collect::<Vec<_>>());
    }
}
