//! jobstore - maintenance CLI for the persistent job registry.

use clap::Parser;
use tracing::{debug, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jobstore_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

mod cli;
mod cmd_jobs;

use cli::Cli;

/// Console logging, plus a daily rolling file when `logging.log_dir` is set.
/// `RUST_LOG` takes precedence over `logging.level`.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = match &logging.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("jobstore")
                .filename_suffix("log")
                .max_log_files(logging.max_log_files)
                .build(log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer alive for the life of the process.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = ConfigLoader::load_or_default(&cli.config)?;
    if let Some(data_dir) = &cli.data_dir {
        config.store.data_dir = ConfigLoader::expand_pathbuf(data_dir);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Validate before logging is up so a bad level is reported plainly.
    let warnings = ConfigValidator::validate(&config)?.into_result()?;

    init_tracing(&config.logging)?;
    for warning in warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    debug!("Using jobs file {:?}", config.store.jobs_file());

    cmd_jobs::handle_command(cli.command, &config.store).await
}
