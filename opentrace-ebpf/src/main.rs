#![cfg_attr(feature = "build-ebpf", no_std)]
#![cfg_attr(feature = "build-ebpf", no_main)]

// Keep the kernel side in one cfg'd module instead of sprinkling #[cfg(...)]
#[cfg(feature = "build-ebpf")]
mod ebpf {
    use aya_ebpf::{
        helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid},
        macros::{map, tracepoint},
        maps::{PerCpuArray, RingBuf},
        programs::TracePointContext,
    };
    use aya_log_ebpf::debug;
    use opentrace_common::{OpenatEvent, RING_BYTE_SIZE};

    #[map]
    static EVENTS: RingBuf = RingBuf::with_byte_size(RING_BYTE_SIZE, 0);

    // Reservation failures, one slot per CPU. The loader sums them.
    #[map]
    static DROPPED: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

    #[tracepoint]
    pub fn opentrace_openat(ctx: TracePointContext) -> u32 {
        match try_opentrace_openat(&ctx) {
            Ok(ret) => ret,
            Err(ret) => ret,
        }
    }

    fn try_opentrace_openat(ctx: &TracePointContext) -> Result<u32, u32> {
        let Some(mut entry) = EVENTS.reserve::<OpenatEvent>(0) else {
            count_drop();
            return Ok(0);
        };

        let comm = match bpf_get_current_comm() {
            Ok(comm) => comm,
            Err(_) => {
                entry.discard(0);
                debug!(ctx, "comm unavailable, record discarded");
                return Ok(0);
            }
        };

        entry.write(OpenatEvent {
            pid: (bpf_get_current_pid_tgid() >> 32) as u32,
            comm,
        });
        entry.submit(0);
        Ok(0)
    }

    #[inline(always)]
    fn count_drop() {
        if let Some(slot) = DROPPED.get_ptr_mut(0) {
            // Per-CPU slot, no other writer can race this increment.
            unsafe { *slot += 1 };
        }
    }

    #[cfg(not(test))]
    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        loop {}
    }
}

// Host builds without the eBPF feature get a plain std main so the workspace still builds.
#[cfg(not(feature = "build-ebpf"))]
fn main() {
    eprintln!("opentrace-ebpf built without 'build-ebpf' feature; skipping eBPF program");
}
