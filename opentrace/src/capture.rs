//! User-space rendition of the `sys_enter_openat` capture hook.
//!
//! Mirrors `opentrace-ebpf`: reserve one record, fill it from the calling
//! task, commit. The task facts come from a [`ProcessContext`] instead of the
//! kernel helpers so the same path can be driven from tests and the
//! synthetic probe.

use crate::channel::Producer;
use opentrace_common::{OpenatEvent, COMM_LEN, EVENT_SIZE};

/// Read-only view of the task that entered the syscall.
pub trait ProcessContext {
    /// Combined id as `bpf_get_current_pid_tgid` returns it: tgid in the high
    /// 32 bits, thread id in the low 32 bits.
    fn pid_tgid(&self) -> u64;

    /// Kernel short name, NUL padded.
    fn comm(&self) -> [u8; COMM_LEN];

    /// The process id (thread group id) of the caller.
    fn pid(&self) -> u32 {
        (self.pid_tgid() >> 32) as u32
    }
}

/// A fixed task identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub tgid: u32,
    pub tid: u32,
    pub comm: [u8; COMM_LEN],
}

impl TaskContext {
    /// Single-threaded process: thread id equals the process id.
    pub fn new(pid: u32, name: &str) -> Self {
        Self::with_thread(pid, pid, name)
    }

    pub fn with_thread(tgid: u32, tid: u32, name: &str) -> Self {
        Self {
            tgid,
            tid,
            comm: OpenatEvent::new(0, name.as_bytes()).comm,
        }
    }
}

impl ProcessContext for TaskContext {
    fn pid_tgid(&self) -> u64 {
        (u64::from(self.tgid) << 32) | u64::from(self.tid)
    }

    fn comm(&self) -> [u8; COMM_LEN] {
        self.comm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Published,
    /// No room in the channel; counted in `ChannelStats::dropped`.
    Dropped,
}

/// Records one openat entry by `ctx`. Never blocks and never retries.
pub fn capture_openat<C>(producer: &Producer, ctx: &C) -> Capture
where
    C: ProcessContext + ?Sized,
{
    let Some(mut slot) = producer.reserve(EVENT_SIZE) else {
        return Capture::Dropped;
    };

    let event = OpenatEvent {
        pid: ctx.pid(),
        comm: ctx.comm(),
    };
    slot.as_mut_slice().copy_from_slice(&event.to_bytes());
    slot.commit();
    Capture::Published
}
