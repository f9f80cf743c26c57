//! Process execution utilities.

use std::collections::HashMap;
use std::process::Stdio;
use warden_types::Result;

/// Execute a command asynchronously with environment variables.
///
/// Returns `(stdout, exit code, stderr)`. The child is killed if the
/// returned future is dropped, so callers can bound it with a timeout.
pub async fn run_async_with_env(
    command: &str,
    args: &[String],
    env_vars: &HashMap<String, String>,
) -> Result<(String, i32, String)> {
    let mut cmd = tokio::process::Command::new(command);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in env_vars {
        cmd.env(key, value);
    }

    let output = cmd.output().await?;

    Ok((
        String::from_utf8_lossy(&output.stdout).to_string(),
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stderr).to_string(),
    ))
}

/// Redact secrets from command output.
pub fn redact_secrets(output: &str, secrets: &[&str]) -> String {
    let mut redacted = output.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            redacted = redacted.replace(secret, "***REDACTED***");
        }
    }
    redacted
}
