use super::Probe;
use crate::config::FILE_OPEN_PROBE;
use crate::event_bus::{EventPayload, TraceEvent};
use crate::publisher::{BusPublisher, Publisher};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aya::maps::{MapData, PerCpuArray, RingBuf};
use aya::programs::TracePoint;
use aya::Ebpf;
use nix::sys::resource::{setrlimit, Resource, RLIM_INFINITY};
use opentrace_common::{OpenatEvent, DROPPED_MAP, EVENTS_MAP, PROGRAM_NAME, RING_BYTE_SIZE};
use std::time::Duration;
use tokio::{io::unix::AsyncFd, sync::watch};
use tracing::{debug, info, warn};

const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Loads `opentrace-ebpf`, attaches it to `syscalls/sys_enter_openat` and
/// drains its ring buffer.
///
/// The kernel ring is sized at compile time and read on readiness, so the
/// `channel` config section does not apply here.
#[derive(Default)]
pub struct FileOpenProbe {
    bpf: Option<Ebpf>,
}

impl FileOpenProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dropped_total(dropped: &PerCpuArray<MapData, u64>) -> Result<u64> {
    let per_cpu = dropped.get(&0, 0)?;
    Ok(per_cpu.iter().sum())
}

#[async_trait]
impl Probe for FileOpenProbe {
    fn name(&self) -> &'static str {
        FILE_OPEN_PROBE
    }

    async fn load(&mut self) -> Result<()> {
        info!("[FileOpen] Loading the openat capture program...");

        // Kernels before 5.11 charge BPF maps against RLIMIT_MEMLOCK.
        if let Err(e) = setrlimit(Resource::RLIMIT_MEMLOCK, RLIM_INFINITY, RLIM_INFINITY) {
            debug!("[FileOpen] Could not lift RLIMIT_MEMLOCK: {}", e);
        }

        let mut bpf = Ebpf::load(aya::include_bytes_aligned!(concat!(
            env!("OUT_DIR"),
            "/opentrace"
        )))
        .context("loading eBPF object")?;
        if let Err(e) = aya_log::EbpfLogger::init(&mut bpf) {
            // The program only logs on rare paths; carry on without it.
            warn!("[FileOpen] Failed to initialize eBPF logger: {}", e);
        }

        let program: &mut TracePoint = bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| anyhow!("Program '{}' not found", PROGRAM_NAME))?
            .try_into()?;
        program.load()?;
        program.attach("syscalls", "sys_enter_openat")?;
        info!("[FileOpen] Tracepoint syscalls/sys_enter_openat attached.");

        self.bpf = Some(bpf);
        Ok(())
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>, publisher: BusPublisher) -> Result<()> {
        let bpf = self
            .bpf
            .as_mut()
            .ok_or_else(|| anyhow!("file_open probe run before load"))?;

        let ring = RingBuf::try_from(
            bpf.take_map(EVENTS_MAP)
                .ok_or_else(|| anyhow!("Failed to take ownership of '{}' map", EVENTS_MAP))?,
        )?;
        let dropped: PerCpuArray<MapData, u64> = PerCpuArray::try_from(
            bpf.take_map(DROPPED_MAP)
                .ok_or_else(|| anyhow!("Failed to take ownership of '{}' map", DROPPED_MAP))?,
        )?;

        let mut async_ring = AsyncFd::new(ring)?;
        let mut drop_ticker = tokio::time::interval(DROP_REPORT_INTERVAL);
        let mut reported_drops = 0u64;
        let mut malformed = 0u64;
        info!(
            ring_bytes = RING_BYTE_SIZE,
            "[FileOpen] Ring buffer reader started (readiness driven)."
        );

        loop {
            tokio::select! {
                readable = async_ring.readable_mut() => {
                    let mut guard = readable?;
                    let ring = guard.get_inner_mut();
                    while let Some(item) = ring.next() {
                        match OpenatEvent::from_bytes(&item) {
                            Some(event) => {
                                if publisher.publish(TraceEvent::file_open(FILE_OPEN_PROBE, &event)).is_err() {
                                    debug!("[FileOpen] No subscriber for pid {}", event.pid);
                                }
                            }
                            None => malformed += 1,
                        }
                    }
                    guard.clear_ready();
                }
                _ = drop_ticker.tick() => {
                    let total = dropped_total(&dropped)?;
                    if total > reported_drops {
                        warn!(new = total - reported_drops, total, "[FileOpen] Kernel ring buffer full, events dropped");
                        reported_drops = total;
                        let _ = publisher.publish(TraceEvent::new(FILE_OPEN_PROBE, EventPayload::Dropped { total }));
                    }
                    if malformed > 0 {
                        warn!(malformed, "[FileOpen] Records with unexpected length skipped");
                        malformed = 0;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Detach first so no new records arrive, then flush the rest.
        self.bpf = None;
        let ring = async_ring.get_mut();
        let mut flushed = 0usize;
        while let Some(item) = ring.next() {
            if let Some(event) = OpenatEvent::from_bytes(&item) {
                let _ = publisher.publish(TraceEvent::file_open(FILE_OPEN_PROBE, &event));
                flushed += 1;
            }
        }
        info!(flushed, "[FileOpen] Ring buffer drained after detach.");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.bpf.take().is_some() {
            info!("[FileOpen] Program detached.");
        }
        Ok(())
    }
}
