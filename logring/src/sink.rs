use crate::consumer::SinkEntry;
use crate::error::LogringError;
use crate::record::{
    fixed_record_layout, invoke_fixed, invoke_sized, sized_record_prefix, DispatchCtx, DispatchFn,
    TableWriter, HEADER_SIZE,
};
use protocol::Level;
use spscbuf::RingBuffer;
use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

pub(crate) const DEFAULT_SINK_CAPACITY: usize = 64 * 1024;

/// Producer/consumer shared state for one sink: the queue and the level
/// filter. The level uses relaxed ordering; it is an advisory filter, not a
/// synchronization point.
pub(crate) struct SinkShared {
    pub(crate) buf: RingBuffer,
    level: AtomicU8,
}

impl SinkShared {
    pub(crate) fn new(capacity: usize) -> Result<Self, LogringError> {
        Ok(SinkShared {
            buf: RingBuffer::new(capacity)?,
            level: AtomicU8::new(Level::Info.as_u32() as u8),
        })
    }

    pub(crate) fn level(&self) -> Level {
        Level::from_u32(self.level.load(Ordering::Relaxed) as u32).unwrap_or(Level::Info)
    }

    pub(crate) fn set_level(&self, level: Level) {
        self.level.store(level.as_u32() as u8, Ordering::Relaxed);
    }
}

/// Handle through which one thread writes log records.
///
/// Each sink owns a dedicated queue to the logger's consumer thread. Sinks
/// are not thread safe with the exception of [`level`] and [`set_level`];
/// to log from another thread, clone the sink (the clone registers a fresh
/// queue under the same name).
///
/// [`level`]: Sink::level
/// [`set_level`]: Sink::set_level
pub struct Sink {
    pub(crate) shared: Arc<SinkShared>,
    pub(crate) open: bool,
}

impl Sink {
    /// Creates a sink that is not yet connected to a logger. Connect it
    /// with `Logger::register_sink`.
    pub fn unattached() -> Result<Self, LogringError> {
        Ok(Sink {
            shared: Arc::new(SinkShared::new(DEFAULT_SINK_CAPACITY)?),
            open: false,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Current level threshold. Safe to call from any thread.
    pub fn level(&self) -> Level {
        self.shared.level()
    }

    /// Sets the level threshold. Safe to call from any thread; takes effect
    /// for subsequent log calls, records already enqueued are unaffected.
    pub fn set_level(&self, level: Level) {
        self.shared.set_level(level);
    }

    /// Blocks until every record previously written through this sink has
    /// been rendered and the back-end flush and sync capabilities have run.
    pub fn sync(&self) {
        if self.open {
            self.sync_inner(false);
        }
    }

    /// Closes the sink: drains it, deregisters it from the consumer and
    /// resets the queue. A closed sink can be re-registered under a new
    /// name; its level setting is preserved.
    pub fn close(&mut self) {
        if self.open {
            self.sync_inner(true);
            self.open = false;
            self.shared.buf.clear();
        }
    }

    /// Replaces the sink's display name on the consumer side.
    pub fn set_name(&self, name: impl Into<String>) {
        if !self.open {
            return;
        }
        let name = name.into();
        self.post(move |ctx, _| {
            *ctx.name = name;
        });
        self.sync();
    }

    /// The one blocking wait a producer can perform: a record that flushes,
    /// syncs and then signals a condvar once the consumer dispatches it.
    pub(crate) fn sync_inner(&self, destroy: bool) {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let tx = Arc::clone(&done);
        self.post(move |ctx, _| {
            ctx.state.destroy = destroy;
            (ctx.state.flush)();
            (ctx.state.sync)();
            let (lock, cv) = &*tx;
            *lock.lock().unwrap() = true;
            cv.notify_one();
        });
        let (lock, cv) = &*done;
        let mut signalled = lock.lock().unwrap();
        while !*signalled {
            signalled = cv.wait(signalled).unwrap();
        }
    }

    /// Posts a control closure into this sink's queue, blocking until queue
    /// space is available.
    pub(crate) fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut DispatchCtx<'_>, *const u8) + Send + 'static,
    {
        self.__log_fixed(false, f);
    }

    /// Writes a fixed-shape record. Used through the log macros.
    #[doc(hidden)]
    pub fn __log_fixed<F>(&self, nonblocking: bool, f: F)
    where
        F: FnOnce(&mut DispatchCtx<'_>, *const u8) + Send + 'static,
    {
        let buf = &self.shared.buf;
        let mut span = buf.write_span_spec();
        let (_, total) = fixed_record_layout::<F>(span.as_ptr() as usize);
        if span.len() < total {
            span = if nonblocking {
                buf.try_write_span(total)
            } else {
                buf.write_span(total)
            };
            if span.is_empty() {
                return;
            }
        }

        let base = span.as_ptr();
        let (func_pos, total) = fixed_record_layout::<F>(base as usize);
        unsafe {
            (base as *mut DispatchFn).write(invoke_fixed::<F> as DispatchFn);
            (func_pos as *mut F).write(f);
        }
        buf.reduce_writable(total);
    }

    /// Writes a sized-shape record carrying an inline string table. The
    /// `shelve` stage copies string arguments into the table and returns
    /// the closure to store. Used through the log macros.
    #[doc(hidden)]
    pub fn __log_with_table<S, F>(&self, nonblocking: bool, shelve: S)
    where
        S: FnOnce(&mut TableWriter<'_>) -> F,
        F: FnOnce(&mut DispatchCtx<'_>, *const u8) + Send + 'static,
    {
        let buf = &self.shared.buf;
        let mut span = buf.write_span_spec();
        let (_, str_pos) = sized_record_prefix::<F>(span.as_ptr() as usize);
        let prefix = str_pos - span.as_ptr() as usize;
        if span.len() < prefix {
            span = if nonblocking {
                buf.try_write_span(prefix)
            } else {
                buf.write_span(prefix)
            };
            if span.is_empty() {
                return;
            }
        }

        let base = span.as_ptr();
        let (func_pos, str_pos) = sized_record_prefix::<F>(base as usize);
        let mut table = TableWriter::new(base, str_pos as *mut u8, span.end(), buf, nonblocking);
        let f = shelve(&mut table);
        let total = crate::record::align_up(table.table_end() as usize - base as usize, HEADER_SIZE);
        unsafe {
            (base as *mut DispatchFn).write(invoke_sized::<F> as DispatchFn);
            ((base as usize + HEADER_SIZE) as *mut usize).write(total);
            (func_pos as *mut F).write(f);
        }
        buf.reduce_writable(total);
    }
}

impl Clone for Sink {
    /// Cloning a sink creates an independent queue and registers it with
    /// the same logger under the source sink's current name. The level
    /// setting is copied.
    fn clone(&self) -> Self {
        let shared = Arc::new(
            SinkShared::new(self.shared.buf.capacity()).expect("failed to allocate sink buffer"),
        );
        shared.set_level(self.shared.level());
        if self.open {
            let registered = Arc::clone(&shared);
            self.post(move |ctx, _| {
                let name = ctx.name.clone();
                ctx.state.pending_sinks.push(SinkEntry::new(registered, name));
            });
        }
        Sink {
            shared,
            open: self.open,
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.close();
    }
}

const _: () = assert!(mem::size_of::<DispatchFn>() == mem::size_of::<usize>());
