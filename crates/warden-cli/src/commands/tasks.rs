//! Catalog listing.

use super::Context;
use anyhow::Result;
use colored::Colorize;
use warden_core::time::fuzzy_time;

pub fn list(ctx: &Context) -> Result<()> {
    let service = ctx.service()?;
    let tasks = service.catalog().tasks();

    println!("{} in {}", "Tasks".green().bold(), ctx.config.catalog_path.display());

    if tasks.is_empty() {
        println!("  No tasks defined");
        return Ok(());
    }

    for task in tasks {
        let last_run = task
            .date_last_run
            .map(fuzzy_time)
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {} {} ({} on {} assets, last run {})",
            task.name.cyan().bold(),
            task.id.to_string().dimmed(),
            task.username,
            task.unique_assets().len(),
            last_run
        );
        if !task.comment.is_empty() {
            println!("      {}", task.comment);
        }
    }
    Ok(())
}
