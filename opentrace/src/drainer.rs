use crate::channel::Consumer;
use crate::config::ChannelConfig;
use crate::event_bus::{EventPayload, TraceEvent};
use crate::publisher::Publisher;
use opentrace_common::OpenatEvent;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Periodically drains a [`Consumer`] and forwards decoded records to a publisher.
pub struct ChannelDrainer<P> {
    probe: String,
    consumer: Consumer,
    publisher: P,
    poll_interval: Duration,
    stall_warn: Duration,
    reported_drops: u64,
    stall_reported: bool,
}

impl<P: Publisher> ChannelDrainer<P> {
    pub fn new(probe: &str, consumer: Consumer, publisher: P, config: &ChannelConfig) -> Self {
        Self {
            probe: probe.to_string(),
            consumer,
            publisher,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stall_warn: Duration::from_millis(config.stall_warn_ms),
            reported_drops: 0,
            stall_reported: false,
        }
    }

    /// Polls until `shutdown` flips to true (or its sender goes away), then
    /// drains whatever was committed before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Consumer {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let tail = self.drain_once();
        info!(
            probe = %self.probe,
            final_records = tail,
            "[Drainer] Channel drained after detach."
        );
        self.consumer
    }

    /// One poll/drain/acknowledge pass. Returns the number of records published.
    pub fn drain_once(&mut self) -> usize {
        let mut delivered = 0;
        for raw in self.consumer.drain() {
            let Some(event) = OpenatEvent::from_bytes(&raw) else {
                warn!(
                    probe = %self.probe,
                    len = raw.len(),
                    "[Drainer] Skipping record with unexpected length"
                );
                continue;
            };
            if let Err(e) = self.publisher.publish(TraceEvent::file_open(&self.probe, &event)) {
                debug!(probe = %self.probe, "[Drainer] No subscriber for event: {}", e);
            }
            delivered += 1;
        }

        self.report_drops();
        self.report_stall();
        delivered
    }

    fn report_drops(&mut self) {
        let dropped = self.consumer.stats().dropped;
        if dropped <= self.reported_drops {
            return;
        }
        warn!(
            probe = %self.probe,
            new = dropped - self.reported_drops,
            total = dropped,
            "[Drainer] Channel full, events dropped"
        );
        self.reported_drops = dropped;
        let _ = self.publisher.publish(TraceEvent::new(
            &self.probe,
            EventPayload::Dropped { total: dropped },
        ));
    }

    fn report_stall(&mut self) {
        match self.consumer.stalled_for() {
            Some(waited) if waited >= self.stall_warn => {
                if !self.stall_reported {
                    warn!(
                        probe = %self.probe,
                        waited_ms = waited.as_millis() as u64,
                        "[Drainer] Oldest reservation is still uncommitted; consumption is blocked"
                    );
                    self.stall_reported = true;
                }
            }
            Some(_) => {}
            None => self.stall_reported = false,
        }
    }
}
