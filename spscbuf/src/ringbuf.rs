use crate::error::RingError;
use crate::memory::{page_size, Memory};
use crossbeam_utils::CachePadded;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A contiguous view into the buffer. Because the backing memory is double
/// mapped, a span may extend past the physical capacity without a split.
#[derive(Clone, Copy, Debug)]
pub struct Span {
    ptr: *mut u8,
    len: usize,
}

impl Span {
    pub(crate) fn new(ptr: *mut u8, len: usize) -> Self {
        Span { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> *mut u8 {
        unsafe { self.ptr.add(self.len) }
    }

    pub(crate) fn empty() -> Self {
        Span {
            ptr: std::ptr::null_mut(),
            len: 0,
        }
    }
}

/// Lock-free single-producer single-consumer byte queue over a mirrored
/// memory mapping.
///
/// The producer owns `nwritten`, the consumer owns `nread_plus_capacity`
/// (the read cursor biased by +capacity so free space is a single
/// subtraction); each side only ever loads the other's cursor. The producer
/// additionally keeps plain cached copies of both cursors so the
/// speculative path can size-check without touching an atomic.
///
/// Exactly one thread may call the write-side methods and exactly one
/// thread the read-side methods at any time.
pub struct RingBuffer {
    nwritten: CachePadded<AtomicUsize>,
    nread_plus_capacity: CachePadded<AtomicUsize>,
    dropped: CachePadded<AtomicUsize>,
    wr_nwritten: Cell<usize>,
    wr_nread_plus_capacity: Cell<usize>,
    memory: Memory,
}

// SAFETY: the two atomic cursors carry all cross-thread synchronization.
// The `Cell` fields are producer-private cursor caches and are only touched
// by the single producer thread, per the SPSC contract above.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Creates a buffer of at least `min_capacity` bytes. The capacity is
    /// rounded up to the next power of two and then to the page size; a
    /// zero request is rejected rather than rounded.
    pub fn new(min_capacity: usize) -> Result<Self, RingError> {
        if min_capacity == 0 {
            return Err(RingError::CapacityZero);
        }
        let len = min_capacity.next_power_of_two().max(page_size());
        let memory = Memory::new(len)?;

        Ok(RingBuffer {
            nwritten: CachePadded::new(AtomicUsize::new(0)),
            nread_plus_capacity: CachePadded::new(AtomicUsize::new(len)),
            dropped: CachePadded::new(AtomicUsize::new(0)),
            wr_nwritten: Cell::new(0),
            wr_nread_plus_capacity: Cell::new(len),
            memory,
        })
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    fn mask(&self) -> usize {
        self.capacity() - 1
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.memory.as_ptr().as_ptr()
    }

    /// One past the physically-backed first mapping; spans may extend past
    /// this into the mirror, record starts may not.
    pub fn end_ptr(&self) -> *mut u8 {
        unsafe { self.base_ptr().add(self.capacity()) }
    }

    fn write_pos_span(&self, len: usize) -> Span {
        let offset = self.wr_nwritten.get() & self.mask();
        Span::new(unsafe { self.base_ptr().add(offset) }, len)
    }

    /// Returns the writable region using the cached free-space estimate,
    /// without a fresh atomic load. The span may understate the space that
    /// is actually free; callers fall back to [`write_span`] or
    /// [`try_write_span`] when it is too small.
    ///
    /// [`write_span`]: RingBuffer::write_span
    /// [`try_write_span`]: RingBuffer::try_write_span
    pub fn write_span_spec(&self) -> Span {
        let sz = self.wr_nread_plus_capacity.get() - self.wr_nwritten.get();
        self.write_pos_span(sz)
    }

    /// Returns a writable span of at least `min` bytes, spinning until the
    /// consumer has freed enough space.
    pub fn write_span(&self, min: usize) -> Span {
        debug_assert!(min <= self.capacity());
        loop {
            self.wr_nread_plus_capacity
                .set(self.nread_plus_capacity.load(Ordering::Acquire));
            let sz = self.wr_nread_plus_capacity.get() - self.wr_nwritten.get();
            if sz >= min {
                return self.write_pos_span(sz);
            }
            std::hint::spin_loop();
        }
    }

    /// Non-blocking variant of [`write_span`]: if fewer than `min` bytes
    /// are free the drop counter is incremented and an empty span returned.
    ///
    /// [`write_span`]: RingBuffer::write_span
    pub fn try_write_span(&self, min: usize) -> Span {
        debug_assert!(min <= self.capacity());
        self.wr_nread_plus_capacity
            .set(self.nread_plus_capacity.load(Ordering::Acquire));
        let sz = self.wr_nread_plus_capacity.get() - self.wr_nwritten.get();
        if sz < min {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Span::empty();
        }
        self.write_pos_span(sz)
    }

    /// Publishes the first `n` bytes of the last returned write span.
    pub fn reduce_writable(&self, n: usize) {
        debug_assert!(n <= self.wr_nread_plus_capacity.get() - self.wr_nwritten.get());
        self.wr_nwritten.set(self.wr_nwritten.get() + n);
        self.nwritten.fetch_add(n, Ordering::Release);
    }

    /// Returns the readable region.
    pub fn read_span(&self) -> Span {
        let nread = self.nread_plus_capacity.load(Ordering::Relaxed) - self.capacity();
        let sz = self.nwritten.load(Ordering::Acquire) - nread;
        Span::new(unsafe { self.base_ptr().add(nread & self.mask()) }, sz)
    }

    /// Retires `n` consumed bytes.
    pub fn reduce_readable(&self, n: usize) {
        self.nread_plus_capacity.fetch_add(n, Ordering::Release);
        debug_assert!(
            self.nread_plus_capacity.load(Ordering::Relaxed)
                - self.nwritten.load(Ordering::Relaxed)
                <= self.capacity()
        );
    }

    /// Returns the number of records dropped since the last call and resets
    /// the counter.
    pub fn dropped_count(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Resets all cursors. Producer-side only, and only once the consumer
    /// no longer references the buffer.
    pub fn clear(&self) {
        self.nwritten.store(0, Ordering::Relaxed);
        self.nread_plus_capacity
            .store(self.capacity(), Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.wr_nwritten.set(0);
        self.wr_nread_plus_capacity.set(self.capacity());
    }
}
