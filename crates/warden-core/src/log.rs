//! Logging system for Warden.
//!
//! Provides structured logging with multiple outputs and configurable
//! levels and formats. `RUST_LOG` overrides the default directive.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};
use warden_types::config::{LogConfig, LogFormat};
use warden_types::{LogLevel, Result, WardenError};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the logging system with a single stderr output.
pub fn init_default(default_directive: &str) -> Result<Vec<WorkerGuard>> {
    init(&[], default_directive)
}

/// Initialize logging from configuration.
///
/// Each entry adds one output. With no entries a pretty stderr output is
/// used. The returned guards flush buffered output when dropped and must be
/// held for the life of the process.
pub fn init(configs: &[LogConfig], default_directive: &str) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    for config in configs {
        let (writer, guard) = match &config.path {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path.file_name().ok_or_else(|| {
                    WardenError::Config(format!("Log path has no file name: {:?}", path))
                })?;
                std::fs::create_dir_all(dir)?;
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };
        guards.push(guard);

        let level = level_filter(config.level);
        let ansi = config.path.is_none();
        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(level)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_ansi(ansi)
                .with_writer(writer)
                .with_filter(level)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_ansi(ansi)
                .with_target(false)
                .with_writer(writer)
                .with_filter(level)
                .boxed(),
        };
        layers.push(layer);
    }

    if layers.is_empty() {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| WardenError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(guards)
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::None => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}
