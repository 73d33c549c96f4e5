use super::Probe;
use crate::capture::{capture_openat, Capture, TaskContext};
use crate::channel::{self, Consumer, Producer};
use crate::config::{ChannelConfig, SyntheticConfig, SYNTHETIC_PROBE};
use crate::drainer::ChannelDrainer;
use crate::publisher::BusPublisher;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Runs the capture hook against the in-process channel.
///
/// Each configured process becomes one producer task that "opens a file"
/// every `interval_ms`; a [`ChannelDrainer`] consumes the other end.
pub struct SyntheticProbe {
    config: SyntheticConfig,
    channel_config: ChannelConfig,
    channel: Option<(Producer, Consumer)>,
}

impl SyntheticProbe {
    pub fn new(config: SyntheticConfig, channel_config: ChannelConfig) -> Self {
        Self {
            config,
            channel_config,
            channel: None,
        }
    }
}

#[async_trait]
impl Probe for SyntheticProbe {
    fn name(&self) -> &'static str {
        SYNTHETIC_PROBE
    }

    async fn load(&mut self) -> Result<()> {
        let pair = channel::bounded(self.channel_config.capacity_bytes)
            .context("creating synthetic event channel")?;
        info!(
            capacity = self.channel_config.capacity_bytes,
            producers = self.config.processes.len(),
            "[Synthetic] Channel created."
        );
        self.channel = Some(pair);
        Ok(())
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>, publisher: BusPublisher) -> Result<()> {
        let (producer, consumer) = self
            .channel
            .take()
            .ok_or_else(|| anyhow!("synthetic probe run before load"))?;

        let (drain_tx, drain_rx) = watch::channel(false);
        let drainer = ChannelDrainer::new(SYNTHETIC_PROBE, consumer, publisher, &self.channel_config);
        let drainer_handle = tokio::spawn(drainer.run(drain_rx));

        let interval = Duration::from_millis(self.config.interval_ms);
        let mut workers = Vec::with_capacity(self.config.processes.len());
        for process in &self.config.processes {
            let ctx = TaskContext::new(process.pid, &process.comm);
            let producer = producer.clone();
            let mut shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if capture_openat(&producer, &ctx) == Capture::Dropped {
                                debug!(pid = ctx.tgid, "[Synthetic] Reservation failed, event dropped");
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        if workers.is_empty() {
            info!("[Synthetic] No processes configured, idling until shutdown.");
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("[Synthetic] Producer task ended abnormally: {}", e);
            }
        }

        // Producers are detached; let the drainer flush what they committed.
        let _ = drain_tx.send(true);
        let consumer = drainer_handle
            .await
            .context("synthetic drainer task failed")?;
        self.channel = Some((producer, consumer));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((producer, _)) = self.channel.take() {
            let stats = producer.stats();
            info!(
                dropped = stats.dropped,
                leftover_bytes = stats.unconsumed_bytes,
                "[Synthetic] Channel released."
            );
        }
        Ok(())
    }
}
