//! Run and subtask history.

use super::Context;
use anyhow::{Context as _, Result};
use colored::Colorize;
use console::{pad_str, Alignment};
use warden_core::time::{fuzzy_time, pretty_duration};
use warden_rotation::{RunHistory, SubtaskHistory};
use warden_types::{RunId, SubtaskState};

pub fn runs(ctx: &Context, task: &str, limit: Option<usize>) -> Result<()> {
    let service = ctx.service()?;
    let task = service.catalog().find(task)?;
    let runs = service.get_run_history(&task.id);

    println!("{} for: {}", "Runs".green().bold(), task.name.cyan());

    if runs.is_empty() {
        println!("  No runs recorded");
        return Ok(());
    }

    for run in runs.iter().take(limit.unwrap_or(usize::MAX)) {
        print_run(run);
    }
    Ok(())
}

pub fn subtasks(ctx: &Context, run: &str) -> Result<()> {
    let run_id: RunId = run.parse().context("Invalid run id")?;
    let service = ctx.service()?;
    let subtasks = service.get_subtask_history(&run_id)?;

    println!("{} for run: {}", "Hosts".green().bold(), run_id.to_string().cyan());
    print_subtasks(&subtasks);
    Ok(())
}

/// One line per run: status, id, age, tallies.
pub fn print_run(run: &RunHistory) {
    let status = if !run.is_finished() {
        "unfinished".yellow().bold()
    } else if run.success {
        "ok".green().bold()
    } else {
        "failed".red().bold()
    };

    let mut line = format!(
        "  {} {}  {}  {}/{} committed",
        pad_str(&status.to_string(), 10, Alignment::Left, None),
        run.id,
        fuzzy_time(run.started_at),
        run.counts.success,
        run.counts.total,
    );
    if run.counts.failed > 0 {
        line.push_str(&format!(", {} failed", run.counts.failed));
    }
    if run.counts.skipped > 0 {
        line.push_str(&format!(", {} skipped", run.counts.skipped));
    }
    if run.is_finished() {
        line.push_str(&format!(
            " in {}",
            pretty_duration(chrono::Duration::milliseconds(run.duration_ms as i64))
        ));
    }
    if let Some(previous) = run.rerun_of {
        line.push_str(&format!(" (re-run of {})", previous));
    }
    println!("{}", line);
}

/// Subtasks as given; callers pass them in display order.
pub fn print_subtasks(subtasks: &[SubtaskHistory]) {
    if subtasks.is_empty() {
        println!("  No hosts recorded");
        return;
    }

    let width = subtasks.iter().map(|s| s.hostname.len()).max().unwrap_or(0);
    for subtask in subtasks {
        let state = match subtask.state {
            SubtaskState::Committed => subtask.state.to_string().green(),
            SubtaskState::Skipped => subtask.state.to_string().dimmed(),
            state if state.is_failure() => state.to_string().red(),
            state => state.to_string().yellow(),
        };
        let mut line = format!(
            "  {} {}  {}",
            pad_str(&state.to_string(), 14, Alignment::Left, None),
            pad_str(&subtask.hostname, width, Alignment::Left, None),
            subtask.asset,
        );
        if let Some(reason) = &subtask.reason {
            line.push_str(&format!("  {}", reason));
        }
        if subtask.attempts > 1 {
            line.push_str(&format!(" ({} store attempts)", subtask.attempts));
        }
        println!("{}", line);
        if let Some(detail) = &subtask.detail {
            println!("      {}", detail.dimmed());
        }
    }
}
