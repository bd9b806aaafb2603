//! # spscbuf - Mirrored Single-Producer Single-Consumer Ring Buffer
//!
//! A byte queue for exactly one producer and one consumer thread, built on
//! a double virtual-memory mapping: the backing pages are mapped twice at
//! adjacent addresses, so any in-use region is readable and writable as one
//! contiguous span even when it wraps past the physical end of the buffer.
//! Neither side ever special-cases wraparound.
//!
//! Synchronization is two release/acquire cursors, one owned by each side.
//! There are no locks and no blocking syscalls; the blocking write path
//! spins with a pause hint until the consumer frees space.
//!
//! ## Writing
//!
//! ```rust
//! use spscbuf::RingBuffer;
//!
//! let ring = RingBuffer::new(4096)?;
//! let data = b"hello";
//!
//! let span = ring.write_span(data.len());
//! unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), span.as_ptr(), data.len()) };
//! ring.reduce_writable(data.len());
//! # Ok::<(), spscbuf::RingError>(())
//! ```
//!
//! `try_write_span` is the non-blocking variant: it returns an empty span
//! and increments the drop counter instead of spinning. `write_span_spec`
//! re-checks the producer's cached free-space estimate without an atomic
//! load, for callers that want to probe before committing.
//!
//! ## Reading
//!
//! ```rust
//! # use spscbuf::RingBuffer;
//! # let ring = RingBuffer::new(4096)?;
//! let span = ring.read_span();
//! if !span.is_empty() {
//!     let data = unsafe { std::slice::from_raw_parts(span.as_ptr(), span.len()) };
//!     // process data...
//!     ring.reduce_readable(span.len());
//! }
//! # Ok::<(), spscbuf::RingError>(())
//! ```

pub use error::RingError;
pub use ringbuf::{RingBuffer, Span};

pub mod error;
pub(crate) mod memory;
pub mod ringbuf;
