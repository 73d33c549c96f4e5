use super::Subscriber;
use crate::event_bus::{EventPayload, TraceEvent};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Writes every bus event to the log, one line per event.
pub struct EventPrinter {
    event_rx: broadcast::Receiver<TraceEvent>,
    printed: u64,
}

impl EventPrinter {
    pub fn new(event_rx: broadcast::Receiver<TraceEvent>) -> Self {
        Self {
            event_rx,
            printed: 0,
        }
    }

    /// Consumes events until every sender is gone.
    pub async fn run(mut self) -> u64 {
        loop {
            match self.event_rx.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "opentrace_event",
                        skipped, "EventPrinter: Fell behind the event bus, events skipped"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
        self.printed
    }
}

#[async_trait]
impl Subscriber for EventPrinter {
    async fn handle_event(&mut self, event: TraceEvent) {
        match &event.payload {
            EventPayload::Dropped { .. } => warn!(target: "opentrace_event", "{}", event),
            _ => info!(target: "opentrace_event", "{}", event),
        }
        self.printed += 1;
    }
}
