use crate::{
    config::AppConfig,
    event_bus::TraceEvent,
    probe::{Probe, ProbeFactory},
    publisher::BusPublisher,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe {0} not found in registry")]
    NotRegistered(String),
    #[error("probe {name} failed to load: {cause:#}")]
    Load { name: String, cause: anyhow::Error },
    #[error("probe {0} panicked")]
    Panicked(String),
}

struct ActiveProbe {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

// Starts and stops probes so the running set matches the config's probe map.
pub struct ProbeManager {
    registry: HashMap<String, ProbeFactory>,
    active: HashMap<String, ActiveProbe>,
    event_sender: broadcast::Sender<TraceEvent>,
}

impl ProbeManager {
    pub fn new(event_sender: broadcast::Sender<TraceEvent>) -> Self {
        Self {
            registry: HashMap::new(),
            active: HashMap::new(),
            event_sender,
        }
    }

    pub fn with_builtin_probes(event_sender: broadcast::Sender<TraceEvent>) -> Self {
        let mut manager = Self::new(event_sender);
        for (name, factory) in crate::probe::builtin_factories() {
            manager.register(name, factory);
        }
        manager
    }

    pub fn register(&mut self, name: &str, factory: ProbeFactory) {
        self.registry.insert(name.to_string(), factory);
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn active_probe_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.keys().cloned().collect();
        names.sort();
        names
    }

    /// Brings the running probes in line with `config.probes`.
    ///
    /// Probes that should run and are not running are started; probes that
    /// are running but disabled (or no longer listed) are stopped; running
    /// probes are left alone. Failures (including probes found to have
    /// panicked) are logged and returned, the rest of the map is still applied.
    pub async fn reconcile(&mut self, config: &AppConfig) -> Vec<ProbeError> {
        info!("ProbeManager: Starting reconciliation...");
        let mut failures = Vec::new();

        // Probes whose task has already exited count as not running.
        let finished: Vec<String> = self
            .active
            .iter()
            .filter(|(_, probe)| probe.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in finished {
            let Some(probe) = self.active.remove(&name) else {
                continue;
            };
            match probe.handle.await {
                Err(e) if e.is_panic() => {
                    error!("ProbeManager: Probe '{}' panicked", name);
                    failures.push(ProbeError::Panicked(name));
                }
                _ => warn!("ProbeManager: Probe '{}' exited on its own", name),
            }
        }

        let to_stop: Vec<String> = self
            .active
            .keys()
            .filter(|name| !config.probes.get(*name).copied().unwrap_or(false))
            .cloned()
            .collect();
        for name in to_stop {
            if let Err(e) = self.stop_probe(&name).await {
                failures.push(e);
            }
        }

        for (name, should_run) in &config.probes {
            if *should_run && !self.active.contains_key(name) {
                if let Err(e) = self.start_probe(name, config).await {
                    error!("ProbeManager: {}", e);
                    failures.push(e);
                }
            }
        }

        info!(
            active = self.active.len(),
            failed = failures.len(),
            "ProbeManager: Reconciliation completed."
        );
        failures
    }

    async fn start_probe(&mut self, name: &str, config: &AppConfig) -> Result<(), ProbeError> {
        let factory = self
            .registry
            .get(name)
            .ok_or_else(|| ProbeError::NotRegistered(name.to_string()))?;

        let mut probe: Box<dyn Probe> = factory(config);
        probe.load().await.map_err(|cause| ProbeError::Load {
            name: name.to_string(),
            cause,
        })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let publisher = BusPublisher::new(self.event_sender.clone());
        let probe_name = name.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = probe.run(shutdown_rx, publisher).await {
                error!("ProbeManager: Probe '{}' failed: {:#}", probe_name, e);
            }
            if let Err(e) = probe.close().await {
                warn!("ProbeManager: Probe '{}' failed to close: {:#}", probe_name, e);
            }
        });

        self.active
            .insert(name.to_string(), ActiveProbe { shutdown, handle });
        info!("ProbeManager: Probe '{}' started", name);
        Ok(())
    }

    async fn stop_probe(&mut self, name: &str) -> Result<(), ProbeError> {
        let Some(probe) = self.active.remove(name) else {
            return Ok(());
        };
        let _ = probe.shutdown.send(true);
        let mut handle = probe.handle;
        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!("ProbeManager: Probe '{}' stopped", name),
            Ok(Err(e)) if e.is_panic() => {
                error!("ProbeManager: Probe '{}' panicked", name);
                return Err(ProbeError::Panicked(name.to_string()));
            }
            Ok(Err(e)) => warn!("ProbeManager: Probe '{}' task was cancelled: {}", name, e),
            Err(_) => {
                warn!(
                    "ProbeManager: Probe '{}' did not stop within {:?}, aborting",
                    name, STOP_TIMEOUT
                );
                handle.abort();
            }
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        info!("ProbeManager: Shutting down all probes...");
        let names: Vec<String> = self.active.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop_probe(&name).await {
                error!("ProbeManager: {}", e);
            }
        }
        info!("ProbeManager: All probes stopped.");
    }
}
