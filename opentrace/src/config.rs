use crate::channel::{MAX_CAPACITY, MIN_CAPACITY};
use opentrace_common::RING_BYTE_SIZE;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FILE_OPEN_PROBE: &str = "file_open";
pub const SYNTHETIC_PROBE: &str = "synthetic";
pub const HEARTBEAT_PROBE: &str = "heartbeat";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(
        "channel.capacity_bytes = {0} must be a power of two within {min}..={max}",
        min = MIN_CAPACITY,
        max = MAX_CAPACITY
    )]
    Capacity(usize),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

// Top-level config

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: Option<String>,
    pub log_directory: Option<PathBuf>,
    /// Probe name -> should it run. Reconciled on start and on SIGHUP.
    pub probes: BTreeMap<String, bool>,
    pub channel: ChannelConfig,
    pub synthetic: SyntheticConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub capacity_bytes: usize,
    pub poll_interval_ms: u64,
    /// Warn once the head record has stayed uncommitted this long.
    pub stall_warn_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub interval_ms: u64,
    pub processes: Vec<SyntheticProcess>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SyntheticProcess {
    pub pid: u32,
    pub comm: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            log_directory: None,
            probes: BTreeMap::from([(FILE_OPEN_PROBE.to_string(), true)]),
            channel: ChannelConfig::default(),
            synthetic: SyntheticConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: RING_BYTE_SIZE as usize,
            poll_interval_ms: 100,
            stall_warn_ms: 1000,
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            processes: vec![
                SyntheticProcess {
                    pid: 100,
                    comm: "ls".into(),
                },
                SyntheticProcess {
                    pid: 200,
                    comm: "cat".into(),
                },
                SyntheticProcess {
                    pid: 300,
                    comm: "vim".into(),
                },
            ],
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl AppConfig {
    pub fn load_from_file(config_file_path: &Path) -> Result<Self, ConfigError> {
        let config_content =
            fs::read_to_string(config_file_path).map_err(|source| ConfigError::Read {
                path: config_file_path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&config_content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let loaded_config: AppConfig = serde_yaml::from_str(content)?;
        loaded_config.validate()?;
        Ok(loaded_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.channel.capacity_bytes;
        if !capacity.is_power_of_two() || !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(ConfigError::Capacity(capacity));
        }
        if self.channel.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("channel.poll_interval_ms"));
        }
        if self.synthetic.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("synthetic.interval_ms"));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("heartbeat.interval_secs"));
        }
        Ok(())
    }

    /// Replaces the probe map so that exactly `names` run.
    pub fn only_probes<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probes = names.into_iter().map(|n| (n.into(), true)).collect();
    }
}
