//! Bounded multi-producer / single-consumer byte ring.
//!
//! This is the user-space twin of the kernel `BPF_MAP_TYPE_RINGBUF` that the
//! capture program writes into. Producers on any thread reserve a contiguous
//! range, fill it and commit it; a single [`Consumer`] drains committed
//! records in the order they joined the contiguous committed prefix.
//!
//! # Memory layout
//!
//! ```text
//! | hdr (8) | payload (len, padded to 8) | hdr (8) | payload ... | pad hdr | ... wrap
//! ```
//!
//! Every record starts with an 8-byte header word:
//!
//! ```text
//! bit 61 WRITTEN  header has been stored for this lap
//! bit 62 DISCARD  consumer skips the payload
//! bit 63 BUSY     reserved, not committed yet
//! bits 0..32      payload length
//! ```
//!
//! A record never straddles the end of the arena. When it would, the producer
//! claims the tail end as well and stamps it with a committed DISCARD header.
//!
//! # Cursors
//!
//! `producer_pos` and `consumer_pos` are u64 and only ever increase. The
//! physical offset is `pos & mask`. Used space is `producer_pos - consumer_pos`.
//!
//! # Atomics
//!
//! Producers claim space with a CAS loop on `producer_pos` after an Acquire
//! load of `consumer_pos`. Headers are stored with Release and loaded by the
//! consumer with Acquire, so a committed header makes the payload visible.
//! The consumer zeroes every byte it releases before its Release store of
//! `consumer_pos`; a header word of 0 therefore always means "claimed but not
//! stamped yet" and never a stale header from a previous lap.

use bytes::Bytes;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Size of the per-record header word.
pub const HEADER_LEN: usize = 8;

/// Smallest arena accepted by [`bounded`].
pub const MIN_CAPACITY: usize = 64;

/// Largest arena accepted by [`bounded`]; lengths live in 32 header bits.
pub const MAX_CAPACITY: usize = 1 << 31;

const WRITTEN_BIT: u64 = 1 << 61;
const DISCARD_BIT: u64 = 1 << 62;
const BUSY_BIT: u64 = 1 << 63;
const LEN_MASK: u64 = u32::MAX as u64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel capacity {0} is not a power of two")]
    NotPowerOfTwo(usize),
    #[error("channel capacity {capacity} is outside {min}..={max} bytes")]
    OutOfRange {
        capacity: usize,
        min: usize,
        max: usize,
    },
}

/// Bytes a record with `len` payload bytes occupies in the arena.
///
/// Saturates instead of wrapping, so an absurd `len` never looks small.
pub const fn record_span(len: usize) -> usize {
    (len.saturating_add(7) & !7).saturating_add(HEADER_LEN)
}

/// Counters shared by both ends of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    /// Reservations refused because the arena was full.
    pub dropped: u64,
    /// Reserved or committed bytes (headers and padding included) not yet released.
    pub unconsumed_bytes: usize,
}

struct Shared {
    // u64 words keep every header 8-byte aligned.
    arena: Box<[UnsafeCell<u64>]>,
    capacity: u64,
    mask: u64,
    producer_pos: AtomicU64,
    consumer_pos: AtomicU64,
    dropped: AtomicU64,
}

// Safety: arena bytes are only touched by the producer that exclusively claimed
// them through the CAS on producer_pos, or by the single consumer after the
// owning header was committed. Cursor atomics order the hand-offs.
unsafe impl Sync for Shared {}

impl Shared {
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.arena.as_ptr()).cast::<u8>()
    }

    fn header(&self, pos: u64) -> &AtomicU64 {
        let offset = (pos & self.mask) as usize;
        // Safety: offset is 8-aligned (all spans are multiples of 8) and inside
        // the arena; the word is only ever accessed atomically while live.
        unsafe { AtomicU64::from_ptr(self.base().add(offset).cast::<u64>()) }
    }

    fn payload_ptr(&self, pos: u64) -> *mut u8 {
        let offset = ((pos + HEADER_LEN as u64) & self.mask) as usize;
        // Safety: records never straddle the end, so offset + len <= capacity.
        unsafe { self.base().add(offset) }
    }

    fn stats(&self) -> ChannelStats {
        let tail = self.consumer_pos.load(Ordering::Acquire);
        let head = self.producer_pos.load(Ordering::Acquire);
        ChannelStats {
            capacity: self.capacity as usize,
            dropped: self.dropped.load(Ordering::Relaxed),
            unconsumed_bytes: head.saturating_sub(tail) as usize,
        }
    }

    fn reserve(&self, len: usize) -> Option<Reservation<'_>> {
        // capacity <= MAX_CAPACITY, so this also keeps len inside LEN_MASK.
        if len as u64 > LEN_MASK || len >= self.capacity as usize {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let span = record_span(len) as u64;
        if span > self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let (head, pad) = loop {
            // Load the tail first: any head observed afterwards is >= it.
            let tail = self.consumer_pos.load(Ordering::Acquire);
            let head = self.producer_pos.load(Ordering::Relaxed);
            let offset = head & self.mask;
            let pad = if offset + span > self.capacity {
                self.capacity - offset
            } else {
                0
            };
            if head - tail + pad + span > self.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            if self
                .producer_pos
                .compare_exchange_weak(
                    head,
                    head + pad + span,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break (head, pad);
            }
        };

        if pad > 0 {
            self.header(head).store(
                WRITTEN_BIT | DISCARD_BIT | (pad - HEADER_LEN as u64),
                Ordering::Release,
            );
        }
        let pos = head + pad;
        self.header(pos)
            .store(WRITTEN_BIT | BUSY_BIT | len as u64, Ordering::Release);

        Some(Reservation {
            shared: self,
            pos,
            len,
            finished: false,
        })
    }

    /// Zeroes `[from, to)` and hands it back to producers.
    fn release(&self, from: u64, to: u64) {
        let mut pos = from;
        while pos < to {
            let offset = pos & self.mask;
            let chunk = (to - pos).min(self.capacity - offset);
            // Safety: the range was fully committed and drained; no producer
            // can claim it until the store below publishes the new tail.
            unsafe { std::ptr::write_bytes(self.base().add(offset as usize), 0, chunk as usize) };
            pos += chunk;
        }
        self.consumer_pos.store(to, Ordering::Release);
    }
}

/// Creates a channel over a `capacity`-byte arena.
///
/// # Errors
///
/// Fails when `capacity` is not a power of two or lies outside
/// [`MIN_CAPACITY`]..=[`MAX_CAPACITY`].
pub fn bounded(capacity: usize) -> Result<(Producer, Consumer), ChannelError> {
    if !capacity.is_power_of_two() {
        return Err(ChannelError::NotPowerOfTwo(capacity));
    }
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
        return Err(ChannelError::OutOfRange {
            capacity,
            min: MIN_CAPACITY,
            max: MAX_CAPACITY,
        });
    }

    let words = capacity / 8;
    let arena: Box<[UnsafeCell<u64>]> = (0..words).map(|_| UnsafeCell::new(0)).collect();
    let shared = Arc::new(Shared {
        arena,
        capacity: capacity as u64,
        mask: capacity as u64 - 1,
        producer_pos: AtomicU64::new(0),
        consumer_pos: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });

    Ok((
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer {
            shared,
            blocked: None,
        },
    ))
}

/// Write side. Cheap to clone; every clone may reserve concurrently.
#[derive(Clone)]
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// Claims `len` contiguous bytes.
    ///
    /// Returns `None` (and counts a drop) when the arena cannot hold the
    /// record without overwriting unconsumed data. Never blocks or retries.
    pub fn reserve(&self, len: usize) -> Option<Reservation<'_>> {
        self.shared.reserve(len)
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.stats()
    }
}

/// An exclusive, not yet visible byte range.
///
/// Dropping it without [`Reservation::commit`] discards it, so a producer that
/// unwinds mid-write never leaves a gap that blocks the consumer.
pub struct Reservation<'a> {
    shared: &'a Shared,
    pos: u64,
    len: usize,
    finished: bool,
}

impl Reservation<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Logical offset of the record header, mostly useful in tests.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: [pos, pos + span) was claimed by this reservation alone and
        // is not readable by the consumer until the header loses BUSY.
        unsafe { std::slice::from_raw_parts_mut(self.shared.payload_ptr(self.pos), self.len) }
    }

    /// Publishes the record to the consumer.
    pub fn commit(mut self) {
        self.finish(0);
    }

    /// Releases the range without publishing anything.
    pub fn discard(mut self) {
        self.finish(DISCARD_BIT);
    }

    fn finish(&mut self, flags: u64) {
        self.finished = true;
        self.shared
            .header(self.pos)
            .store(WRITTEN_BIT | flags | self.len as u64, Ordering::Release);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(DISCARD_BIT);
        }
    }
}

/// Read side. There is exactly one per channel.
pub struct Consumer {
    shared: Arc<Shared>,
    // Header position the last drain stopped at because it was still BUSY.
    blocked: Option<(u64, Instant)>,
}

impl Consumer {
    /// Number of committed records ready to drain, stopping at the first gap.
    pub fn poll(&self) -> usize {
        let shared = &*self.shared;
        let head = shared.producer_pos.load(Ordering::Acquire);
        let mut pos = shared.consumer_pos.load(Ordering::Relaxed);
        let mut ready = 0;
        while pos < head {
            let header = shared.header(pos).load(Ordering::Acquire);
            if header & WRITTEN_BIT == 0 || header & BUSY_BIT != 0 {
                break;
            }
            if header & DISCARD_BIT == 0 {
                ready += 1;
            }
            pos += record_span((header & LEN_MASK) as usize) as u64;
        }
        ready
    }

    /// Lazily copies out committed records in publication order.
    ///
    /// Space is acknowledged when the returned iterator is dropped. An empty
    /// drain changes nothing.
    pub fn drain(&mut self) -> Drain<'_> {
        let pos = self.shared.consumer_pos.load(Ordering::Relaxed);
        Drain {
            consumer: self,
            start: pos,
            pos,
        }
    }

    /// How long the oldest unconsumed record has been reserved but not
    /// committed, as observed by previous drains.
    pub fn stalled_for(&self) -> Option<Duration> {
        self.blocked.map(|(_, since)| since.elapsed())
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.stats()
    }

    fn note_blocked(&mut self, pos: u64) {
        match self.blocked {
            Some((at, _)) if at == pos => {}
            _ => self.blocked = Some((pos, Instant::now())),
        }
    }
}

/// Iterator returned by [`Consumer::drain`].
pub struct Drain<'a> {
    consumer: &'a mut Consumer,
    start: u64,
    pos: u64,
}

impl Iterator for Drain<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            let shared = &*self.consumer.shared;
            let head = shared.producer_pos.load(Ordering::Acquire);
            if self.pos >= head {
                self.consumer.blocked = None;
                return None;
            }

            let header = shared.header(self.pos).load(Ordering::Acquire);
            if header & WRITTEN_BIT == 0 || header & BUSY_BIT != 0 {
                let pos = self.pos;
                self.consumer.note_blocked(pos);
                return None;
            }

            let len = (header & LEN_MASK) as usize;
            let record = self.pos;
            self.pos += record_span(len) as u64;
            if header & DISCARD_BIT != 0 {
                continue;
            }

            // Safety: the Acquire load above saw the committed header, so the
            // producer's payload writes are visible and nobody writes it now.
            let payload =
                unsafe { std::slice::from_raw_parts(shared.payload_ptr(record), len) };
            self.consumer.blocked = None;
            return Some(Bytes::copy_from_slice(payload));
        }
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        if self.pos > self.start {
            self.consumer.shared.release(self.start, self.pos);
        }
    }
}
