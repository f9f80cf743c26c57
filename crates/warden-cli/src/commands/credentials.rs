//! Credential store commands.

use super::{operator, Context};
use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use dialoguer::Password;
use warden_core::time::{fuzzy_time, to_local};
use warden_types::{AssetId, CredentialFilter, CredentialMetadata, SecretMaterial, Username};

pub async fn list(ctx: &Context, asset: Option<&str>, username: Option<&str>, latest: bool) -> Result<()> {
    let mut filter = CredentialFilter::all();
    if let Some(asset) = asset {
        filter = filter.asset(AssetId::new(asset).context("Invalid asset id")?);
    }
    if let Some(username) = username {
        filter = filter.username(Username::new(username).context("Invalid username")?);
    }
    if latest {
        filter = filter.latest_only();
    }

    let records = ctx.backend.filter(&filter).await?;

    println!("{} ({} backend)", "Credentials".green().bold(), ctx.backend.kind());

    if records.is_empty() {
        println!("  No credentials found");
        return Ok(());
    }

    for record in &records {
        let marker = if record.is_latest { "*".green().bold() } else { " ".normal() };
        println!(
            "  {} {} v{}  {}  by {}{}",
            marker,
            record.name.cyan(),
            record.version_count,
            fuzzy_time(record.created_at),
            record.created_by,
            if record.comment.is_empty() {
                String::new()
            } else {
                format!("  {}", record.comment.dimmed())
            }
        );
    }
    Ok(())
}

pub async fn show(ctx: &Context, asset: &str, username: &str, reveal: bool) -> Result<()> {
    let asset = AssetId::new(asset).context("Invalid asset id")?;
    let username = Username::new(username).context("Invalid username")?;

    let Some(record) = ctx.backend.get(&asset, &username).await? else {
        bail!("No credential stored for {}@{}", username, asset);
    };
    let view = ctx.backend.to_view(&record, reveal)?;

    println!("{} {}", "Credential".green().bold(), view.name.cyan());
    println!("  Id:       {}", view.id);
    println!("  Version:  {}", view.version_count);
    println!(
        "  Created:  {} by {}",
        to_local(view.created_at).format("%Y-%m-%d %H:%M:%S"),
        view.created_by
    );
    if !view.org_id.is_empty() {
        println!("  Org:      {}", view.org_id);
    }
    if !view.comment.is_empty() {
        println!("  Comment:  {}", view.comment);
    }

    if let Some(secret) = &view.secret {
        if let Some(password) = secret.password() {
            println!("  Password: {}", password);
        }
        if let Some(public_key) = secret.public_key() {
            println!("  Public key:\n{}", public_key);
        }
        if secret.private_key().is_some() {
            println!("  Private key: {}", "(stored)".dimmed());
        }
    }
    Ok(())
}

pub async fn set(ctx: &Context, asset: &str, username: &str, comment: &str) -> Result<()> {
    let asset = AssetId::new(asset).context("Invalid asset id")?;
    let username = Username::new(username).context("Invalid username")?;

    let password = Password::new()
        .with_prompt(format!("Password for {}@{}", username, asset))
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;
    if password.is_empty() {
        bail!("Refusing to store an empty password");
    }

    let material = SecretMaterial::from_password(password);
    let metadata = CredentialMetadata::new(operator(), comment);
    let record = ctx
        .backend
        .create(&asset, &username, &material, &metadata)
        .await
        .context("Failed to store credential")?;

    println!(
        "{} Stored {} version {}",
        "✓".green().bold(),
        record.name.cyan(),
        record.version_count
    );
    Ok(())
}
