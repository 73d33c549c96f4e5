use chrono::{DateTime, Utc};
use opentrace_common::OpenatEvent;
use std::fmt;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    /// A process entered openat.
    FileOpen { pid: u32, comm: String },
    /// Total events the producer side has refused so far.
    Dropped { total: u64 },
    Message(String),
}

#[derive(Clone, Debug)]
pub struct TraceEvent {
    pub probe: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl TraceEvent {
    pub fn new(probe: &str, payload: EventPayload) -> Self {
        Self {
            probe: probe.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn file_open(probe: &str, event: &OpenatEvent) -> Self {
        Self::new(
            probe,
            EventPayload::FileOpen {
                pid: event.pid,
                comm: String::from_utf8_lossy(event.comm_bytes()).into_owned(),
            },
        )
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::FileOpen { pid, comm } => {
                write!(f, "[{}] PID: {}, Command: {}", self.probe, pid, comm)
            }
            EventPayload::Dropped { total } => {
                write!(f, "[{}] dropped events so far: {}", self.probe, total)
            }
            EventPayload::Message(msg) => write!(f, "[{}] {}", self.probe, msg),
        }
    }
}

pub fn create_event_sender() -> broadcast::Sender<TraceEvent> {
    let (tx, _rx_initial) = broadcast::channel(CHANNEL_CAPACITY);
    tx
}
