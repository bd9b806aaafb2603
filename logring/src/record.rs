//! The record codec.
//!
//! Every entry in a sink's queue is a self-describing record: a dispatch
//! function pointer, followed by a monomorphized closure holding the
//! captured arguments, optionally followed by an inline string table. The
//! consumer knows nothing about individual call sites; it reads the pointer
//! at the current position, invokes it, and continues at the address the
//! dispatch function returns. The dispatch function reads the closure out
//! of the buffer by value, so captured state is dropped exactly once.
//!
//! Argument capture is resolved at the call site by method-probe order:
//! `Wrap(arg).shelve(table)` picks [`ShelveString`] (copy into the string
//! table) for string-like arguments and falls back to [`ShelveValue`]
//! (capture by value) for anything `Copy + Display`. Shelved strings are
//! stored as offsets from the record base, which the mirrored mapping keeps
//! contiguous across wraparound.

use crate::consumer::ConsumerState;
use protocol::Level;
use spscbuf::RingBuffer;
use std::any::Any;
use std::fmt::{self, Display, Write as _};
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Consumer-side entry point stored at the start of every record.
pub type DispatchFn = unsafe fn(&mut DispatchCtx<'_>, *mut u8) -> *mut u8;

pub(crate) const HEADER_SIZE: usize = mem::size_of::<DispatchFn>();

/// Marker substituted for a string argument that could not be captured.
pub const TRUNCATED: &str = "<truncated>";

#[inline]
pub(crate) fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Everything a record needs while it executes on the consumer thread.
pub struct DispatchCtx<'a> {
    pub(crate) mbuf: &'a mut String,
    pub(crate) state: &'a mut ConsumerState,
    pub(crate) ts: &'a str,
    pub(crate) name: &'a mut String,
}

impl DispatchCtx<'_> {
    /// Formats one line and hands it to the output capability. Formatting
    /// failures, short writes and write errors are routed to the error
    /// capability; none of them escape to the consumer loop.
    #[doc(hidden)]
    pub fn print(
        &mut self,
        level: Level,
        f: impl FnOnce(&mut String, &'static str, &str, &str) -> fmt::Result,
    ) {
        self.mbuf.clear();
        let style = (self.state.lstyle)(level);
        let result = catch_unwind(AssertUnwindSafe(|| {
            f(self.mbuf, style, self.ts, self.name)
        }));
        match result {
            Ok(Ok(())) => {
                let len = self.mbuf.len();
                match (self.state.out)(level, self.mbuf.as_bytes()) {
                    Ok(n) if n == len => {}
                    Ok(_) => self.report_error("Short write"),
                    Err(_) => self.report_error("Write error"),
                }
            }
            Ok(Err(_)) => self.report_error("Format error"),
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                // Borrowed reasons may point into the payload.
                let reason = reason.to_string();
                self.report_error(&reason);
            }
        }
    }

    pub(crate) fn report_error(&mut self, reason: &str) {
        self.mbuf.clear();
        let style = (self.state.lstyle)(Level::Error);
        let _ = writeln!(
            self.mbuf,
            "{}{} {}: Error: {}",
            style, self.ts, self.name, reason
        );
        (self.state.err)(self.mbuf.as_bytes());
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "Format error"
    }
}

/// Record layout with a compile-time-derivable size: the total is a pure
/// function of the closure type and the record base address.
pub(crate) fn fixed_record_layout<F>(base: usize) -> (usize, usize) {
    let func_pos = align_up(base + HEADER_SIZE, mem::align_of::<F>());
    let total = align_up(func_pos + mem::size_of::<F>(), HEADER_SIZE) - base;
    (func_pos, total)
}

/// Record layout with an explicit size field and trailing string table:
/// returns (closure position, first string byte).
pub(crate) fn sized_record_prefix<F>(base: usize) -> (usize, usize) {
    let size_pos = base + HEADER_SIZE;
    let func_pos = align_up(size_pos + mem::size_of::<usize>(), mem::align_of::<F>());
    (func_pos, func_pos + mem::size_of::<F>())
}

/// # Safety
///
/// `pos` must point at a committed fixed-shape record whose closure type is
/// exactly `F`.
pub(crate) unsafe fn invoke_fixed<F>(ctx: &mut DispatchCtx<'_>, pos: *mut u8) -> *mut u8
where
    F: FnOnce(&mut DispatchCtx<'_>, *const u8) + Send + 'static,
{
    let (func_pos, total) = fixed_record_layout::<F>(pos as usize);
    let f = (func_pos as *mut F).read();
    f(ctx, pos as *const u8);
    pos.add(total)
}

/// # Safety
///
/// `pos` must point at a committed sized-shape record whose closure type is
/// exactly `F`.
pub(crate) unsafe fn invoke_sized<F>(ctx: &mut DispatchCtx<'_>, pos: *mut u8) -> *mut u8
where
    F: FnOnce(&mut DispatchCtx<'_>, *const u8) + Send + 'static,
{
    let total = ((pos as usize + HEADER_SIZE) as *const usize).read();
    let (func_pos, _) = sized_record_prefix::<F>(pos as usize);
    let f = (func_pos as *mut F).read();
    f(ctx, pos as *const u8);
    pos.add(total)
}

/// A string captured into the record's inline table, as an offset from the
/// record base. `u32::MAX` marks a capture that had to be truncated.
#[derive(Clone, Copy, Debug)]
pub struct StrRef {
    off: u32,
    len: u32,
}

impl StrRef {
    pub(crate) fn truncated() -> Self {
        StrRef {
            off: u32::MAX,
            len: 0,
        }
    }
}

/// A string argument captured by reference instead of by copy. The caller
/// is responsible for the referenced memory staying valid until the
/// consumer has processed the record.
#[derive(Clone, Copy, Debug)]
pub struct NoCopy {
    ptr: *const u8,
    len: usize,
}

// SAFETY: the pointee is either 'static (`nocopy`) or guaranteed by the
// caller of `nocopy_unchecked` to outlive the record.
unsafe impl Send for NoCopy {}

/// Passes a static string to a log macro by reference, skipping the string
/// table copy.
pub fn nocopy(s: &'static str) -> NoCopy {
    NoCopy {
        ptr: s.as_ptr(),
        len: s.len(),
    }
}

/// Non-'static variant of [`nocopy`].
///
/// # Safety
///
/// The string must remain valid and unmodified until every record capturing
/// it has been consumed; `Sink::sync` provides that barrier.
pub unsafe fn nocopy_unchecked(s: &str) -> NoCopy {
    NoCopy {
        ptr: s.as_ptr(),
        len: s.len(),
    }
}

/// Builds the record's inline string table, growing the reservation while
/// the consumer frees space. Used through the log macros.
pub struct TableWriter<'a> {
    base: *mut u8,
    cur: *mut u8,
    end: *mut u8,
    buf: &'a RingBuffer,
    nonblocking: bool,
}

impl<'a> TableWriter<'a> {
    pub(crate) fn new(
        base: *mut u8,
        cur: *mut u8,
        end: *mut u8,
        buf: &'a RingBuffer,
        nonblocking: bool,
    ) -> Self {
        TableWriter {
            base,
            cur,
            end,
            buf,
            nonblocking,
        }
    }

    pub(crate) fn table_end(&self) -> *mut u8 {
        self.cur
    }

    fn push_str(&mut self, s: &str) -> StrRef {
        let len = s.len();
        if len > u32::MAX as usize {
            return StrRef::truncated();
        }
        loop {
            let avail = self.end as usize - self.cur as usize;
            if avail >= len {
                break;
            }
            // The span already covers the whole buffer: the string can
            // never fit, give up rather than wait forever.
            let span_len = self.end as usize - self.base as usize;
            if self.nonblocking || span_len >= self.buf.capacity() {
                return StrRef::truncated();
            }
            std::hint::spin_loop();
            self.end = self.buf.write_span(0).end();
        }
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), self.cur, len);
        }
        let off = (self.cur as usize - self.base as usize) as u32;
        self.cur = unsafe { self.cur.add(len) };
        StrRef {
            off,
            len: len as u32,
        }
    }
}

/// Wrapper the log macros put around every argument so method-probe order
/// can pick the capture strategy.
pub struct Wrap<T>(pub T);

/// Capture strategy for string-like arguments: copy into the record's
/// string table (or pass through a [`NoCopy`] token).
pub trait ShelveString {
    type Shelved;
    fn shelve(self, table: &mut TableWriter<'_>) -> Self::Shelved;
}

impl<'a> ShelveString for Wrap<&'a str> {
    type Shelved = StrRef;

    fn shelve(self, table: &mut TableWriter<'_>) -> StrRef {
        table.push_str(self.0)
    }
}

impl<'a> ShelveString for Wrap<&'a String> {
    type Shelved = StrRef;

    fn shelve(self, table: &mut TableWriter<'_>) -> StrRef {
        table.push_str(self.0.as_str())
    }
}

impl ShelveString for Wrap<String> {
    type Shelved = StrRef;

    fn shelve(self, table: &mut TableWriter<'_>) -> StrRef {
        table.push_str(&self.0)
    }
}

impl ShelveString for Wrap<NoCopy> {
    type Shelved = NoCopy;

    fn shelve(self, _table: &mut TableWriter<'_>) -> NoCopy {
        self.0
    }
}

/// Fallback capture strategy: anything `Copy + Display` is stored by value.
/// The `'static` bound rejects captures of borrowed data at compile time.
pub trait ShelveValue {
    type Shelved;
    fn shelve(&self, table: &mut TableWriter<'_>) -> Self::Shelved;
}

impl<T: Copy + Display + Send + 'static> ShelveValue for Wrap<T> {
    type Shelved = Val<T>;

    fn shelve(&self, _table: &mut TableWriter<'_>) -> Val<T> {
        Val(self.0)
    }
}

/// A by-value capture.
pub struct Val<T>(T);

/// Turns a shelved capture back into something displayable, given the
/// record base address.
pub trait Resolve {
    type Out<'a>: Display
    where
        Self: 'a;

    fn resolve<'a>(&'a self, base: *const u8) -> Self::Out<'a>;
}

impl<T: Display> Resolve for Val<T> {
    type Out<'a>
        = &'a T
    where
        Self: 'a;

    fn resolve<'a>(&'a self, _base: *const u8) -> &'a T {
        &self.0
    }
}

impl Resolve for StrRef {
    type Out<'a>
        = &'a str
    where
        Self: 'a;

    fn resolve<'a>(&'a self, base: *const u8) -> &'a str {
        if self.off == u32::MAX {
            return TRUNCATED;
        }
        // SAFETY: the bytes were copied verbatim from a &str into the
        // record's table and stay untouched until the record is retired.
        unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(
                base.add(self.off as usize),
                self.len as usize,
            ))
        }
    }
}

impl Resolve for NoCopy {
    type Out<'a>
        = &'a str
    where
        Self: 'a;

    fn resolve<'a>(&'a self, _base: *const u8) -> &'a str {
        // SAFETY: validity until consumption is the nocopy contract.
        unsafe { std::str::from_utf8_unchecked(std::slice::from_raw_parts(self.ptr, self.len)) }
    }
}
