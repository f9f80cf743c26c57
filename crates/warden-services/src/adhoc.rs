//! Remote executor backed by an `ansible`-compatible ad-hoc runner.
//!
//! Each call writes a private YAML inventory and extra-vars file, runs
//! `<program> all -i <inventory> -m <module> -a <args> -e @<vars>` with the
//! JSON stdout callback, and maps the per-host results into an
//! [`ExecutionReport`]. Secrets only ever travel through those files, never
//! through the command line.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;
use warden_core::util::process::{redact_secrets, run_async_with_env};
use warden_types::config::ExecutorConfig;
use warden_types::{
    AuthContext, ExecutionOptions, ExecutionReport, HostConnection, HostResult, ModuleInvocation,
    RemoteExecutor, RemoteFailure, Result, WardenError,
};
use zeroize::Zeroizing;

/// Ad-hoc runner executor.
#[derive(Debug, Clone)]
pub struct AdHocExecutor {
    program: String,
    extra_args: Vec<String>,
}

impl AdHocExecutor {
    /// Create an executor from configuration.
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            program: config.program.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    fn module_for(invocation: &ModuleInvocation) -> (&'static str, &'static str) {
        match invocation {
            ModuleInvocation::ChangePassword { .. } => (
                "ansible.builtin.user",
                "name={{ warden_username }} password={{ warden_password | password_hash('sha512') }} update_password=always",
            ),
            ModuleInvocation::ConnectivityCheck => ("ansible.builtin.ping", ""),
        }
    }

    /// Inventory document: one host entry per connection, keyed by hostname.
    fn inventory(hosts: &[HostConnection], auth: &AuthContext) -> Value {
        let mut entries = Map::new();
        for host in hosts {
            let mut vars = Map::new();
            vars.insert("ansible_host".into(), json!(host.address));
            vars.insert("ansible_port".into(), json!(host.port));
            vars.insert("ansible_connection".into(), json!(connection_plugin(&host.protocol)));

            match auth {
                AuthContext::Privileged => {
                    vars.insert("ansible_user".into(), json!(host.admin_user.as_str()));
                    vars.insert("ansible_become".into(), json!(true));
                    if let Some(password) = host.admin_secret.as_ref().and_then(|s| s.password()) {
                        vars.insert("ansible_password".into(), json!(password));
                        vars.insert("ansible_become_password".into(), json!(password));
                    }
                }
                AuthContext::Account { username, secret } => {
                    vars.insert("ansible_user".into(), json!(username.as_str()));
                    if let Some(password) = secret.password() {
                        vars.insert("ansible_password".into(), json!(password));
                    }
                }
            }

            entries.insert(host.hostname.clone(), Value::Object(vars));
        }

        json!({ "all": { "hosts": entries } })
    }

    fn extra_vars(invocation: &ModuleInvocation) -> Value {
        match invocation {
            ModuleInvocation::ChangePassword { username, secret } => json!({
                "warden_username": username.as_str(),
                "warden_password": secret.password().unwrap_or_default(),
            }),
            ModuleInvocation::ConnectivityCheck => json!({}),
        }
    }

    fn secrets_of<'a>(
        hosts: &'a [HostConnection],
        invocation: &'a ModuleInvocation,
        auth: &'a AuthContext,
    ) -> Vec<&'a str> {
        let mut secrets: Vec<&str> = hosts
            .iter()
            .filter_map(|h| h.admin_secret.as_ref().and_then(|s| s.password()))
            .collect();
        if let ModuleInvocation::ChangePassword { secret, .. } = invocation {
            secrets.extend(secret.password());
        }
        if let AuthContext::Account { secret, .. } = auth {
            secrets.extend(secret.password());
        }
        secrets
    }
}

fn connection_plugin(protocol: &str) -> &str {
    match protocol {
        "" | "ssh" => "ssh",
        "winrm" | "rdp" => "winrm",
        other => other,
    }
}

fn private_file(contents: &Value) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("warden-")
        .suffix(".yml")
        .tempfile()?;
    let bytes = Zeroizing::new(serde_json::to_vec(contents)?);
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(file)
}

#[derive(Debug, Deserialize)]
struct CallbackOutput {
    #[serde(default)]
    plays: Vec<Play>,
}

#[derive(Debug, Deserialize)]
struct Play {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct Task {
    #[serde(default)]
    hosts: HashMap<String, HostOutput>,
}

#[derive(Debug, Deserialize)]
struct HostOutput {
    #[serde(default)]
    unreachable: bool,
    #[serde(default)]
    failed: bool,
    #[serde(default)]
    msg: Option<Value>,
    #[serde(default)]
    stderr: Option<String>,
}

impl HostOutput {
    fn message(&self) -> String {
        let msg = match &self.msg {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        match &self.stderr {
            Some(stderr) if msg.is_empty() => stderr.trim().to_string(),
            _ => msg,
        }
    }
}

/// Map JSON callback output onto a report. Hosts absent from the output
/// are left out and count as unreachable downstream.
fn parse_report(stdout: &str) -> Result<ExecutionReport> {
    // The callback prints warnings before the document on some versions.
    let start = stdout.find('{').unwrap_or(0);
    let output: CallbackOutput = serde_json::from_str(&stdout[start..])?;

    let mut report = ExecutionReport::new();
    for task in output.plays.iter().flat_map(|p| p.tasks.iter()) {
        for (hostname, host) in &task.hosts {
            let result = if host.unreachable {
                HostResult::unreachable(host.message())
            } else if host.failed {
                HostResult::failed(host.message())
            } else {
                HostResult::ok(host.message())
            };
            report.insert(hostname.clone(), result);
        }
    }
    Ok(report)
}

#[async_trait]
impl RemoteExecutor for AdHocExecutor {
    async fn execute(
        &self,
        hosts: &[HostConnection],
        invocation: &ModuleInvocation,
        auth: &AuthContext,
        options: &ExecutionOptions,
    ) -> Result<ExecutionReport> {
        if hosts.is_empty() {
            return Ok(ExecutionReport::new());
        }

        let inventory = private_file(&Self::inventory(hosts, auth))?;
        let vars = private_file(&Self::extra_vars(invocation))?;
        let (module, module_args) = Self::module_for(invocation);

        let mut args = vec![
            "all".to_string(),
            "-i".to_string(),
            inventory.path().to_string_lossy().to_string(),
            "-m".to_string(),
            module.to_string(),
            "-e".to_string(),
            format!("@{}", vars.path().to_string_lossy()),
            "-T".to_string(),
            options.timeout.as_secs().max(1).to_string(),
        ];
        if !module_args.is_empty() {
            args.push("-a".to_string());
            args.push(module_args.to_string());
        }
        args.extend(self.extra_args.iter().cloned());

        let mut env = HashMap::new();
        env.insert("ANSIBLE_STDOUT_CALLBACK".to_string(), "json".to_string());
        env.insert("ANSIBLE_LOAD_CALLBACK_PLUGINS".to_string(), "1".to_string());
        env.insert("ANSIBLE_HOST_KEY_CHECKING".to_string(), "False".to_string());

        tracing::debug!(
            program = %self.program,
            module = invocation.name(),
            hosts = hosts.len(),
            "Running ad-hoc command"
        );

        let run = run_async_with_env(&self.program, &args, &env);
        let (stdout, code, stderr) = match tokio::time::timeout(options.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    module = invocation.name(),
                    timeout = ?options.timeout,
                    "Ad-hoc command timed out"
                );
                return Ok(ExecutionReport::new());
            }
        };

        let secrets = Self::secrets_of(hosts, invocation, auth);
        match parse_report(&stdout) {
            Ok(report) => {
                tracing::debug!(code, reported = report.per_host.len(), "Ad-hoc command finished");
                Ok(report)
            }
            Err(e) => Err(WardenError::Remote(RemoteFailure::ModuleError(format!(
                "{} exited with {} and unparseable output ({}): {}",
                self.program,
                code,
                e,
                redact_secrets(stderr.trim(), &secrets)
            )))),
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_types::{AssetId, SecretMaterial, Username};

    fn host(name: &str) -> HostConnection {
        HostConnection {
            asset: AssetId::new(name).unwrap(),
            hostname: name.to_string(),
            address: "10.0.0.5".to_string(),
            port: 22,
            protocol: "ssh".to_string(),
            admin_user: Username::new("admin").unwrap(),
            admin_secret: Some(SecretMaterial::from_password("admin-pw")),
        }
    }

    #[test]
    fn test_parse_report() {
        let stdout = r#"[WARNING]: something
{"plays":[{"tasks":[{"hosts":{
  "web-01":{"changed":true,"msg":""},
  "web-02":{"unreachable":true,"msg":"Failed to connect to the host via ssh: Connection timed out"},
  "web-03":{"failed":true,"msg":"usermod: user 'deploy' does not exist"}
}}]}],"stats":{}}"#;

        let report = parse_report(stdout).unwrap();
        assert!(report.host("web-01").unwrap().module_result.success);
        assert!(report.host("web-02").unwrap().unreachable);
        let failed = report.host("web-03").unwrap();
        assert!(failed.contacted && !failed.module_result.success);
        assert!(failed.module_result.message.contains("does not exist"));
    }

    #[test]
    fn test_inventory_privileged_uses_admin() {
        let inventory = AdHocExecutor::inventory(&[host("web-01")], &AuthContext::Privileged);
        let vars = &inventory["all"]["hosts"]["web-01"];
        assert_eq!(vars["ansible_user"], "admin");
        assert_eq!(vars["ansible_become"], true);
        assert_eq!(vars["ansible_port"], 22);
    }

    #[test]
    fn test_inventory_account_uses_candidate() {
        let auth = AuthContext::Account {
            username: Username::new("deploy").unwrap(),
            secret: SecretMaterial::from_password("candidate"),
        };
        let inventory = AdHocExecutor::inventory(&[host("web-01")], &auth);
        let vars = &inventory["all"]["hosts"]["web-01"];
        assert_eq!(vars["ansible_user"], "deploy");
        assert_eq!(vars["ansible_password"], "candidate");
        assert!(vars.get("ansible_become").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unparseable_output_is_error_without_secret() {
        let executor = AdHocExecutor::new(&ExecutorConfig {
            program: "sh".to_string(),
            extra_args: Vec::new(),
        });
        // `sh all ...` fails to open the script `all`.
        let err = executor
            .execute(
                &[host("web-01")],
                &ModuleInvocation::ConnectivityCheck,
                &AuthContext::Privileged,
                &ExecutionOptions {
                    timeout: Duration::from_secs(5),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Remote(RemoteFailure::ModuleError(_))));
        assert!(!err.to_string().contains("admin-pw"));
    }

    #[tokio::test]
    async fn test_no_hosts_is_empty_report() {
        let executor = AdHocExecutor::new(&ExecutorConfig::default());
        let report = executor
            .execute(
                &[],
                &ModuleInvocation::ConnectivityCheck,
                &AuthContext::Privileged,
                &ExecutionOptions::default(),
            )
            .await
            .unwrap();
        assert!(report.per_host.is_empty());
    }
}
