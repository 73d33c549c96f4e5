use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

// Owns the config path and swaps in a freshly parsed config on reload.
pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
    config_path: Option<PathBuf>,
    probe_override: Option<Vec<String>>,
}

impl ConfigManager {
    pub fn new(config: Arc<RwLock<AppConfig>>, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            probe_override: None,
        }
    }

    /// Probes named on the command line replace the file's probe map on every reload.
    pub fn with_probe_override(mut self, probes: Vec<String>) -> Self {
        if !probes.is_empty() {
            self.probe_override = Some(probes);
        }
        self
    }

    pub fn shared(&self) -> Arc<RwLock<AppConfig>> {
        Arc::clone(&self.config)
    }

    /// Re-reads the config file. The current config stays in place if the new
    /// one fails to load or validate.
    pub async fn reload_config(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            info!("ConfigManager: No config file in use, keeping built-in defaults.");
            return Ok(());
        };
        info!("ConfigManager: Reloading configuration from {:?}", path);

        // Parse outside the lock.
        let load_start = std::time::Instant::now();
        let mut new_config = match AppConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("ConfigManager: Failed to reload configuration: {}", e);
                return Err(e).context("reloading configuration");
            }
        };
        debug!(
            elapsed_ms = load_start.elapsed().as_millis() as u64,
            "ConfigManager: load_from_file completed"
        );
        if let Some(probes) = &self.probe_override {
            new_config.only_probes(probes.iter().cloned());
        }

        let mut guard = tokio::time::timeout(WRITE_LOCK_TIMEOUT, self.config.write())
            .await
            .context("timed out waiting for the config write lock")?;
        *guard = new_config;
        info!("ConfigManager: Configuration reloaded successfully.");
        Ok(())
    }
}
