//! Effective configuration.

use anyhow::Result;
use warden_core::WardenConfig;

pub fn show(config: &WardenConfig) -> Result<()> {
    print!("{}", serde_yaml::to_string(&config.redacted())?);
    Ok(())
}
