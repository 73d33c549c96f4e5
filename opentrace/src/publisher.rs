use crate::event_bus::TraceEvent;
use tokio::sync::broadcast;

pub trait Publisher: Send + Sync {
    fn publish(&self, event: TraceEvent) -> Result<usize, broadcast::error::SendError<TraceEvent>>;
}

/// Publishes straight onto the event bus.
#[derive(Clone)]
pub struct BusPublisher {
    tx: broadcast::Sender<TraceEvent>,
}

impl BusPublisher {
    pub fn new(tx: broadcast::Sender<TraceEvent>) -> Self {
        Self { tx }
    }
}

impl Publisher for BusPublisher {
    fn publish(&self, event: TraceEvent) -> Result<usize, broadcast::error::SendError<TraceEvent>> {
        self.tx.send(event)
    }
}
