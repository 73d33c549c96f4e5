use super::Probe;
use crate::config::{HeartbeatConfig, HEARTBEAT_PROBE};
use crate::event_bus::{EventPayload, TraceEvent};
use crate::publisher::{BusPublisher, Publisher};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Emits a liveness message on a fixed interval.
pub struct HeartbeatProbe {
    config: HeartbeatConfig,
}

impl HeartbeatProbe {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Probe for HeartbeatProbe {
    fn name(&self) -> &'static str {
        HEARTBEAT_PROBE
    }

    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>, publisher: BusPublisher) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        // The first tick fires immediately; skip it so beats are spaced evenly.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Local::now().format("%H:%M:%S");
                    let event = TraceEvent::new(HEARTBEAT_PROBE, EventPayload::Message(format!("heartbeat: {now}")));
                    if publisher.publish(event).is_err() {
                        debug!("[Heartbeat] No subscriber listening");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
