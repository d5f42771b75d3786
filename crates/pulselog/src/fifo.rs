//! Lock-free single-producer/single-consumer byte ring.
//!
//! ## Design
//!
//! - Heap-allocated with runtime capacity, rounded up to a power of 2 for
//!   bitmask indexing
//! - Cache-padded monotonic producer/consumer indices prevent false sharing
//! - Acquire/Release memory ordering for lock-free operation
//! - Overwrite on overflow: the producer never blocks or fails; the oldest
//!   bytes are discarded and surfaced as a lost count on the next `obtain`
//!
//! Because the producer may lap the consumer, bytes handed out by
//! [`ByteFifo::obtain`] can be overwritten while the consumer copies them.
//! Consumers must treat copied bytes as untrusted until frame-level
//! consistency checks pass.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// A wrapper that pads a value to a cache line boundary to prevent false
/// sharing.
#[repr(C, align(64))]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Creates a new cache-padded value.
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// A contiguous readable region inside the ring, as an offset/length pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Iovec {
    /// Byte offset of the region within the ring storage.
    pub offset: usize,
    /// Length of the region in bytes.
    pub len: usize,
}

/// A lock-free single-producer/single-consumer byte ring with
/// overwrite-on-overflow semantics.
///
/// # Safety
///
/// The ring is safe to share between threads, but the operations carry an
/// SPSC discipline: exactly one thread may call [`write`](Self::write) and
/// exactly one thread may call [`obtain`](Self::obtain)/
/// [`release`](Self::release)/[`copy_out`](Self::copy_out). Violating the
/// discipline yields garbage bytes (caught downstream by frame consistency
/// checks), never memory unsafety outside the byte storage.
pub struct ByteFifo {
    /// Ring storage.
    buffer: Box<[UnsafeCell<u8>]>,

    /// Capacity mask for fast modulo (capacity - 1).
    mask: usize,

    /// Producer index; monotonic byte count, never wrapped.
    rear: CachePadded<AtomicUsize>,

    /// Consumer index; monotonic byte count, never wrapped.
    front: CachePadded<AtomicUsize>,
}

// SAFETY: the byte storage is plain data; index handoff uses Acquire/Release.
unsafe impl Send for ByteFifo {}
// SAFETY: see the SPSC discipline documented on the type.
unsafe impl Sync for ByteFifo {}

impl ByteFifo {
    /// Creates a new ring with the given byte capacity.
    ///
    /// The capacity is clamped to `[MIN_BUFFER_SIZE, MAX_BUFFER_SIZE]` and
    /// rounded up to the next power of 2.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");

        let capacity = capacity
            .clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
            .next_power_of_two();

        let buffer: Vec<UnsafeCell<u8>> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            rear: CachePadded::new(AtomicUsize::new(0)),
            front: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the byte capacity of the ring.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Appends `bytes` to the ring (producer side).
    ///
    /// Always commits the whole slice in one step: older unread bytes are
    /// overwritten when the ring is full. Writes larger than the capacity
    /// are dropped.
    pub fn write(&self, bytes: &[u8]) {
        let n = bytes.len();
        if n == 0 || n > self.capacity() {
            return;
        }

        let rear = self.rear.load(Ordering::Relaxed);
        let idx = rear & self.mask;
        let first = n.min(self.capacity() - idx);

        // SAFETY: single-producer contract. The consumer never trusts bytes
        // at or past `rear`, and overwritten head bytes are reported as lost
        // by the next `obtain`. Mutation through the shared reference goes
        // through UnsafeCell.
        unsafe {
            let base = self.buffer.as_ptr();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), (*base.add(idx)).get(), first);
            std::ptr::copy_nonoverlapping(bytes.as_ptr().add(first), (*base).get(), n - first);
        }

        // Publish the bytes by advancing the producer index
        self.rear.store(rear + n, Ordering::Release);
    }

    /// Peeks at the readable bytes without consuming them (consumer side).
    ///
    /// Returns up to two contiguous regions summing to at most `max` bytes,
    /// plus the count of bytes lost to producer overrun since the last
    /// `obtain`. Lost bytes are skipped; the returned regions start at the
    /// oldest byte still present.
    #[must_use]
    pub fn obtain(&self, max: usize) -> ([Iovec; 2], u64) {
        let rear = self.rear.load(Ordering::Acquire);
        let mut front = self.front.load(Ordering::Relaxed);

        let mut lost = 0u64;
        let filled = rear.wrapping_sub(front);
        if filled > self.capacity() {
            let overrun = filled - self.capacity();
            lost = overrun as u64;
            front += overrun;
            self.front.store(front, Ordering::Relaxed);
        }

        let avail = rear.wrapping_sub(front).min(max);
        if avail == 0 {
            return ([Iovec::default(); 2], lost);
        }

        let idx = front & self.mask;
        let first = avail.min(self.capacity() - idx);
        (
            [
                Iovec {
                    offset: idx,
                    len: first,
                },
                Iovec {
                    offset: 0,
                    len: avail - first,
                },
            ],
            lost,
        )
    }

    /// Copies a region previously returned by [`obtain`](Self::obtain) into
    /// `dst` (consumer side).
    ///
    /// # Panics
    ///
    /// Panics if `dst` is shorter than the region or the region is out of
    /// bounds.
    pub fn copy_out(&self, region: Iovec, dst: &mut [u8]) {
        assert!(region.offset + region.len <= self.capacity());
        assert!(dst.len() >= region.len);
        if region.len == 0 {
            return;
        }

        // SAFETY: in-bounds read of plain bytes. A racing producer overwrite
        // leaves garbage in `dst`, which the snapshot layer detects.
        unsafe {
            let src = (*self.buffer.as_ptr().add(region.offset)).get();
            std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), region.len);
        }
    }

    /// Advances the consumer index by `n` bytes.
    pub fn release(&self, n: usize) {
        let front = self.front.load(Ordering::Relaxed);
        self.front.store(front + n, Ordering::Release);
    }
}

impl std::fmt::Debug for ByteFifo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteFifo")
            .field("capacity", &self.capacity())
            .field("rear", &self.rear.load(Ordering::Relaxed))
            .field("front", &self.front.load(Ordering::Relaxed))
            .finish()
    }
}
