#![cfg_attr(not(test), no_std)]

/// Kernel short name length (TASK_COMM_LEN).
pub const COMM_LEN: usize = 16;

/// Bytes one record occupies on the wire: u32 pid + comm.
pub const EVENT_SIZE: usize = 4 + COMM_LEN;

/// Byte size of the kernel ring buffer. Must stay a power of two.
pub const RING_BYTE_SIZE: u32 = 1 << 24;

pub const PROGRAM_NAME: &str = "opentrace_openat";
pub const EVENTS_MAP: &str = "EVENTS";
pub const DROPPED_MAP: &str = "DROPPED";

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenatEvent {
    pub pid: u32,
    pub comm: [u8; COMM_LEN], // NUL padded, no terminator when the name fills all 16 bytes
}

const _: () = assert!(core::mem::size_of::<OpenatEvent>() == EVENT_SIZE);

impl OpenatEvent {
    /// Builds a record from an arbitrary name, truncating to 16 bytes and NUL padding the rest.
    pub fn new(pid: u32, name: &[u8]) -> Self {
        let mut comm = [0u8; COMM_LEN];
        let len = name.len().min(COMM_LEN);
        comm[..len].copy_from_slice(&name[..len]);
        Self { pid, comm }
    }

    /// The name bytes up to the first NUL.
    pub fn comm_bytes(&self) -> &[u8] {
        let end = self
            .comm
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMM_LEN);
        &self.comm[..end]
    }

    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut out = [0u8; EVENT_SIZE];
        out[..4].copy_from_slice(&self.pid.to_le_bytes());
        out[4..].copy_from_slice(&self.comm);
        out
    }

    /// Decodes a wire record. Returns `None` unless `bytes` is exactly `EVENT_SIZE` long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != EVENT_SIZE {
            return None;
        }
        let mut pid = [0u8; 4];
        pid.copy_from_slice(&bytes[..4]);
        let mut comm = [0u8; COMM_LEN];
        comm.copy_from_slice(&bytes[4..]);
        Some(Self {
            pid: u32::from_le_bytes(pid),
            comm,
        })
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for OpenatEvent {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_name_is_nul_padded() {
        let event = OpenatEvent::new(100, b"ls");
        let bytes = event.to_bytes();
        assert_eq!(&bytes[..4], &100u32.to_le_bytes());
        assert_eq!(&bytes[4..6], b"ls");
        assert!(bytes[6..].iter().all(|&b| b == 0));
        assert_eq!(event.comm_bytes(), b"ls");
    }

    #[test]
    fn sixteen_byte_name_has_no_terminator() {
        let event = OpenatEvent::new(7, b"abcdefghijklmnopqrst");
        assert_eq!(&event.comm, b"abcdefghijklmnop");
        assert_eq!(event.comm_bytes().len(), COMM_LEN);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(OpenatEvent::from_bytes(&[0u8; EVENT_SIZE - 1]).is_none());
        assert!(OpenatEvent::from_bytes(&[0u8; EVENT_SIZE + 1]).is_none());
    }

    proptest! {
        #[test]
        fn round_trip_keeps_pid_and_truncated_comm(
            pid in any::<u32>(),
            name in proptest::collection::vec(any::<u8>(), 0..40),
        ) {
            let decoded = OpenatEvent::from_bytes(&OpenatEvent::new(pid, &name).to_bytes()).unwrap();
            prop_assert_eq!(decoded.pid, pid);
            let kept = name.len().min(COMM_LEN);
            prop_assert_eq!(&decoded.comm[..kept], &name[..kept]);
            prop_assert!(decoded.comm[kept..].iter().all(|&b| b == 0));
        }
    }
}
