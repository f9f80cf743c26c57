//! Scripted collaborators for engine and service tests.

use crate::catalog::{AssetEntry, StaticInventory, TaskCatalog};
use crate::task::RotationTask;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use warden_credentials::{CredentialStore, LocalBackend};
use warden_secrets::AesGcmCodec;
use warden_types::{
    AssetId, AuthContext, CredentialBackend, ExecutionOptions, ExecutionReport, HostConnection,
    HostResult, ModuleInvocation, RemoteExecutor, Result, SecretCodec, Username,
};

/// How a simulated host misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never answers
    Down,
    /// Change module fails
    ChangeRejected,
    /// Accepts the change but refuses logins with the new password
    LoginRejected,
    /// Left out of the executor report entirely
    Silent,
    /// Answers slower than any reasonable timeout
    Hang,
}

/// A fleet of simulated hosts that tracks each account's real password.
#[derive(Default)]
pub struct FakeFleet {
    passwords: Mutex<HashMap<(String, String), String>>,
    faults: Mutex<HashMap<String, Fault>>,
    calls: Mutex<Vec<(String, &'static str)>>,
    cancel_on_first_change: Mutex<Option<CancellationToken>>,
    delay: Mutex<Option<Duration>>,
    in_flight: Mutex<(usize, usize)>,
}

impl FakeFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fault(&self, hostname: &str, fault: Fault) {
        self.faults.lock().insert(hostname.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    pub fn password(&self, hostname: &str, username: &str) -> Option<String> {
        self.passwords
            .lock()
            .get(&(hostname.to_string(), username.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<(String, &'static str)> {
        self.calls.lock().clone()
    }

    pub fn cancel_on_first_change(&self, token: CancellationToken) {
        *self.cancel_on_first_change.lock() = Some(token);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.in_flight.lock().1
    }

    fn run_one(&self, host: &HostConnection, invocation: &ModuleInvocation, auth: &AuthContext) -> Option<HostResult> {
        let fault = self.faults.lock().get(&host.hostname).copied();
        match fault {
            Some(Fault::Silent) => return None,
            Some(Fault::Down) => return Some(HostResult::unreachable("Connection timed out")),
            _ => {}
        }

        match invocation {
            ModuleInvocation::ChangePassword { username, secret } => {
                if fault == Some(Fault::ChangeRejected) {
                    return Some(HostResult::failed("passwd: Authentication token manipulation error"));
                }
                self.passwords.lock().insert(
                    (host.hostname.clone(), username.to_string()),
                    secret.password().unwrap_or_default().to_string(),
                );
                Some(HostResult::ok("changed"))
            }
            ModuleInvocation::ConnectivityCheck => match auth {
                AuthContext::Privileged => Some(HostResult::ok("pong")),
                AuthContext::Account { username, secret } => {
                    let current = self.password(&host.hostname, username.as_str());
                    if fault == Some(Fault::LoginRejected) || current.as_deref() != secret.password() {
                        Some(HostResult::unreachable("Invalid/incorrect password: Permission denied"))
                    } else {
                        Some(HostResult::ok("pong"))
                    }
                }
            },
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeFleet {
    async fn execute(
        &self,
        hosts: &[HostConnection],
        invocation: &ModuleInvocation,
        auth: &AuthContext,
        _options: &ExecutionOptions,
    ) -> Result<ExecutionReport> {
        {
            let mut in_flight = self.in_flight.lock();
            in_flight.0 += 1;
            in_flight.1 = in_flight.1.max(in_flight.0);
        }

        if matches!(invocation, ModuleInvocation::ChangePassword { .. }) {
            if let Some(token) = self.cancel_on_first_change.lock().take() {
                token.cancel();
            }
        }

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let hang = hosts
            .iter()
            .any(|h| self.faults.lock().get(&h.hostname) == Some(&Fault::Hang));
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let mut report = ExecutionReport::new();
        for host in hosts {
            self.calls.lock().push((host.hostname.clone(), invocation.name()));
            if let Some(result) = self.run_one(host, invocation, auth) {
                report.insert(host.hostname.clone(), result);
            }
        }

        self.in_flight.lock().0 -= 1;
        Ok(report)
    }

    fn name(&self) -> &str {
        "fake-fleet"
    }
}

pub fn codec() -> Arc<dyn SecretCodec> {
    Arc::new(AesGcmCodec::new(&[9u8; 32]))
}

pub fn local_backend() -> Arc<dyn CredentialBackend> {
    Arc::new(LocalBackend::new(Arc::new(CredentialStore::in_memory(codec()))))
}

pub fn asset(name: &str) -> AssetId {
    AssetId::new(name).unwrap()
}

pub fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

pub fn asset_entry(name: &str) -> AssetEntry {
    AssetEntry {
        id: asset(name),
        hostname: None,
        address: format!("{}.internal", name),
        port: 22,
        protocol: "ssh".to_string(),
        admin_user: user("admin"),
    }
}

pub fn task(username: &str, assets: &[&str]) -> RotationTask {
    RotationTask::new("nightly", user(username), assets.iter().map(|a| asset(a)).collect())
}

/// Catalog with one asset entry per name in `assets` plus `extra`.
pub fn catalog(tasks: Vec<RotationTask>, extra: &[&str]) -> Arc<TaskCatalog> {
    let mut names: HashSet<String> = extra.iter().map(|s| s.to_string()).collect();
    for t in &tasks {
        names.extend(t.assets.iter().map(|a| a.to_string()));
    }
    let mut names: Vec<String> = names.into_iter().collect();
    names.sort();
    let assets = names.iter().map(|n| asset_entry(n)).collect();
    Arc::new(TaskCatalog::in_memory(assets, tasks))
}

pub fn inventory(catalog: &Arc<TaskCatalog>) -> Arc<StaticInventory> {
    Arc::new(StaticInventory::new(catalog.clone()))
}
