//! Rotation commands.

use super::history::{print_run, print_subtasks};
use super::Context;
use crate::ui::progress::spinner;
use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use warden_rotation::RotationService;
use warden_types::{AssetId, RunId};

pub async fn execute(ctx: &Context, task: &str, summary: bool) -> Result<()> {
    let service = ctx.service()?;
    let task = service.catalog().find(task)?;

    println!(
        "{} {} on {} assets for: {}",
        "Rotating".yellow().bold(),
        task.username.to_string().cyan(),
        task.unique_assets().len(),
        task.name.cyan()
    );

    let run_id = service.trigger(&task.id).await.context("Failed to start rotation")?;
    println!("  Run: {}", run_id.to_string().cyan());

    follow(&service, run_id, summary).await
}

pub async fn rerun(ctx: &Context, run: &str, asset: &str) -> Result<()> {
    let previous: RunId = run.parse().context("Invalid run id")?;
    let asset = AssetId::new(asset).context("Invalid asset id")?;
    let service = ctx.service()?;

    println!("{} {} from run {}", "Re-running".yellow().bold(), asset.to_string().cyan(), previous);

    let run_id = service
        .rerun_subtask(&previous, &asset)
        .await
        .context("Failed to start rotation")?;
    println!("  Run: {}", run_id.to_string().cyan());

    follow(&service, run_id, true).await
}

/// Runs live in this process, so the command stays until the run finishes.
/// Ctrl-C cancels the hosts that have not been dispatched yet.
async fn follow(service: &RotationService, run_id: RunId, summary: bool) -> Result<()> {
    let pb = spinner("Rotating passwords");

    let run = tokio::select! {
        run = service.wait(&run_id) => run?,
        _ = tokio::signal::ctrl_c() => {
            pb.set_message("Cancelling; waiting for in-flight hosts");
            service.cancel(&run_id)?;
            service.wait(&run_id).await?
        }
    };
    pb.finish_and_clear();

    print_run(&run);
    if summary {
        let subtasks = service.get_subtask_history(&run_id)?;
        print_subtasks(&subtasks);
    }

    if !run.success {
        bail!("{} of {} hosts failed", run.counts.failed, run.counts.total);
    }
    Ok(())
}
