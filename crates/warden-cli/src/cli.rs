//! CLI structure and command definitions.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use warden_core::WardenConfig;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Credential versioning and password rotation for managed hosts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ~/.warden/config)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a rotation task
    Rotate {
        /// Task name or id
        task: String,

        /// Print the per-host summary when the run finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Re-run one host of an earlier run
    Rerun {
        /// Run id
        run: String,

        /// Asset to rotate again
        asset: String,
    },

    /// List the runs of a task
    History {
        /// Task name or id
        task: String,

        /// Show only the most recent N runs
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// List the per-host outcomes of a run
    Subtasks {
        /// Run id
        run: String,
    },

    /// Manage stored credentials
    #[command(subcommand)]
    Credentials(CredentialCommands),

    /// List catalog tasks
    Tasks,

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// List credential versions
    List {
        /// Only this asset
        #[arg(short, long)]
        asset: Option<String>,

        /// Only this account
        #[arg(short, long)]
        username: Option<String>,

        /// Only the latest version of each identity
        #[arg(short, long)]
        latest: bool,
    },

    /// Show the latest credential of an account
    Show {
        /// Asset id
        asset: String,

        /// Account name
        username: String,

        /// Print the secret material
        #[arg(long)]
        reveal: bool,
    },

    /// Store a new credential version for an account
    Set {
        /// Asset id
        asset: String,

        /// Account name
        username: String,

        /// Comment recorded with the version
        #[arg(short = 'm', long, default_value = "")]
        comment: String,
    },
}

impl Cli {
    /// Load configuration from `--config` or the default location.
    pub fn load_config(&self) -> Result<WardenConfig> {
        let path = self.config.clone().unwrap_or_else(WardenConfig::default_path);
        WardenConfig::load_from(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    /// Default tracing directive for the verbosity flags.
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "warden=trace"
        } else if self.verbose {
            "warden=debug"
        } else if self.quiet {
            "warden=error"
        } else {
            "warden=info"
        }
    }

    pub async fn execute(&self, config: WardenConfig) -> Result<()> {
        use crate::commands::*;

        match &self.command {
            Commands::Rotate { task, wait } => {
                let ctx = Context::open(config)?;
                rotate::execute(&ctx, task, *wait).await
            }
            Commands::Rerun { run, asset } => {
                let ctx = Context::open(config)?;
                rotate::rerun(&ctx, run, asset).await
            }
            Commands::History { task, limit } => {
                let ctx = Context::open(config)?;
                history::runs(&ctx, task, *limit)
            }
            Commands::Subtasks { run } => {
                let ctx = Context::open(config)?;
                history::subtasks(&ctx, run)
            }
            Commands::Credentials(command) => {
                let ctx = Context::open(config)?;
                match command {
                    CredentialCommands::List { asset, username, latest } => {
                        credentials::list(&ctx, asset.as_deref(), username.as_deref(), *latest).await
                    }
                    CredentialCommands::Show { asset, username, reveal } => {
                        credentials::show(&ctx, asset, username, *reveal).await
                    }
                    CredentialCommands::Set { asset, username, comment } => {
                        credentials::set(&ctx, asset, username, comment).await
                    }
                }
            }
            Commands::Tasks => {
                let ctx = Context::open(config)?;
                tasks::list(&ctx)
            }
            Commands::Config => {
                config::show(&config)
            }
        }
    }
}
