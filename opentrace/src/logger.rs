use crate::config::AppConfig;
use std::io::IsTerminal;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "opentrace.log";

// RUST_LOG wins, then the config's log_level, then "info".
fn resolve_filter(config: &AppConfig) -> Result<(EnvFilter, String), Box<dyn std::error::Error>> {
    let filter_str = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| format!("Failed to parse log filter '{}': {}", filter_str, e))?;
    Ok((filter, filter_str))
}

/// Installs the global subscriber. With a `log_directory` events go to a daily
/// rolling file and the returned guard must live until exit.
pub fn init_logging(config: &AppConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let (env_filter, filter_str) = resolve_filter(config)?;

    let Some(log_directory) = config.log_directory.as_deref() else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(std::io::stdout().is_terminal())
            .try_init()
            .map_err(|e| format!("Failed to initialize tracing subscriber: {}", e))?;
        return Ok(None);
    };

    let guard = init_file_logging(log_directory, env_filter)?;
    tracing::info!(
        "Logging system initialized. Log directory: {}",
        log_directory.display()
    );
    tracing::info!("Log level configured as '{}'", filter_str);
    Ok(Some(guard))
}

fn init_file_logging(
    log_directory: &Path,
    env_filter: EnvFilter,
) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let file_appender = tracing_appender::rolling::daily(log_directory, LOG_FILE_PREFIX);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing subscriber: {}", e))?;

    Ok(guard)
}
