use crate::consumer::{ClockFn, Consumer, ConsumerState, ErrorFn, HookFn, OutputFn, ReopenFn, SinkEntry};
use crate::error::LogringError;
use crate::paths::default_command_path;
use crate::record::DispatchCtx;
use crate::sink::Sink;
use crate::style::{default_level_style, LevelStyle};
use protocol::Level;
use std::fs::OpenOptions;
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

/// The output side of a logger: six independent capabilities, all invoked
/// only from the consumer thread. `write` and `error` are required, the
/// rest default to no-ops.
pub struct Backend {
    pub(crate) out: OutputFn,
    pub(crate) err: ErrorFn,
    pub(crate) flush: HookFn,
    pub(crate) sync: HookFn,
    pub(crate) reopen: ReopenFn,
    pub(crate) close: HookFn,
}

impl Backend {
    pub fn new(
        out: impl FnMut(Level, &[u8]) -> io::Result<usize> + Send + 'static,
        err: impl FnMut(&[u8]) + Send + 'static,
    ) -> Self {
        Backend {
            out: Box::new(out),
            err: Box::new(err),
            flush: Box::new(|| {}),
            sync: Box::new(|| {}),
            reopen: Box::new(|| Ok(())),
            close: Box::new(|| {}),
        }
    }

    pub fn with_flush(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.flush = Box::new(f);
        self
    }

    pub fn with_sync(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.sync = Box::new(f);
        self
    }

    pub fn with_reopen(mut self, f: impl FnMut() -> io::Result<()> + Send + 'static) -> Self {
        self.reopen = Box::new(f);
        self
    }

    pub fn with_close(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.close = Box::new(f);
        self
    }
}

/// Configures and starts a [`Logger`].
pub struct LoggerBuilder {
    command_path: Option<String>,
    level_style: LevelStyle,
    clock: ClockFn,
}

impl LoggerBuilder {
    /// Path for the command socket. Defaults to [`default_command_path`];
    /// pass [`NULL_COMMAND_PATH`] to disable the command channel.
    ///
    /// [`NULL_COMMAND_PATH`]: crate::NULL_COMMAND_PATH
    pub fn command_path(mut self, path: impl Into<String>) -> Self {
        self.command_path = Some(path.into());
        self
    }

    pub fn level_style(mut self, style: LevelStyle) -> Self {
        self.level_style = style;
        self
    }

    /// Clock used for the consumer-rendered timestamps of the basic log
    /// macros.
    pub fn clock(mut self, clock: impl FnMut() -> SystemTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Logs to the file at `path`, opened in append mode and created if
    /// missing. The `reopen` command reopens the same path, for rotation.
    /// Errors go to stderr.
    pub fn open_path(self, path: impl AsRef<Path>) -> Result<Logger, LogringError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        let file = Arc::new(Mutex::new(file));

        let out = {
            let file = Arc::clone(&file);
            move |_level: Level, buf: &[u8]| file.lock().unwrap().write(buf)
        };
        let flush = {
            let file = Arc::clone(&file);
            move || {
                let _ = file.lock().unwrap().flush();
            }
        };
        let sync = {
            let file = Arc::clone(&file);
            move || {
                let _ = file.lock().unwrap().sync_all();
            }
        };
        let reopen = {
            let file = Arc::clone(&file);
            move || {
                let reopened = OpenOptions::new().append(true).create(true).open(&path)?;
                *file.lock().unwrap() = reopened;
                Ok(())
            }
        };

        self.open_backend(
            Backend::new(out, stderr_error)
                .with_flush(flush)
                .with_sync(sync)
                .with_reopen(reopen),
        )
    }

    /// Logs to an owned writer. Errors go to stderr; `sync` and `reopen`
    /// are no-ops.
    pub fn open_writer<W: io::Write + Send + 'static>(
        self,
        writer: W,
    ) -> Result<Logger, LogringError> {
        let writer = Arc::new(Mutex::new(writer));
        let out = {
            let writer = Arc::clone(&writer);
            move |_level: Level, buf: &[u8]| writer.lock().unwrap().write(buf)
        };
        let flush = move || {
            let _ = writer.lock().unwrap().flush();
        };
        self.open_backend(Backend::new(out, stderr_error).with_flush(flush))
    }

    /// Logs through a fully custom [`Backend`].
    pub fn open_backend(self, backend: Backend) -> Result<Logger, LogringError> {
        let LoggerBuilder {
            command_path,
            level_style,
            clock,
        } = self;

        let control = Sink::unattached()?;
        let state = ConsumerState {
            out: backend.out,
            err: backend.err,
            flush: backend.flush,
            sync: backend.sync,
            reopen: backend.reopen,
            close: backend.close,
            lstyle: level_style,
            destroy: false,
            pending_sinks: Vec::new(),
            pending_command_path: None,
        };
        let entry = SinkEntry::new(Arc::clone(&control.shared), "control".to_string());
        let consumer = Consumer::new(state, entry, clock);

        let thread = thread::Builder::new()
            .name("logring-consumer".to_string())
            .spawn(move || consumer.run())?;

        let mut logger = Logger {
            control,
            thread: Some(thread),
            control_mutex: Mutex::new(()),
        };
        logger.control.open = true;
        logger.set_command_path(command_path.unwrap_or_else(default_command_path));
        Ok(logger)
    }
}

fn stderr_error(buf: &[u8]) {
    let _ = io::stderr().write_all(buf);
}

/// The logger. Constructing one spawns the background consumer thread that
/// performs all formatting and I/O; producers write through [`Sink`]s
/// created with [`get_sink`].
///
/// Dropping the logger blocks until the consumer thread terminates, which
/// in turn waits for every sink to disconnect.
///
/// [`get_sink`]: Logger::get_sink
pub struct Logger {
    control: Sink,
    thread: Option<JoinHandle<()>>,
    control_mutex: Mutex<()>,
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder {
            command_path: None,
            level_style: default_level_style,
            clock: Box::new(SystemTime::now),
        }
    }

    /// Shorthand for `Logger::builder().open_path(path)`.
    pub fn to_path(path: impl AsRef<Path>) -> Result<Logger, LogringError> {
        Logger::builder().open_path(path)
    }

    /// Shorthand for `Logger::builder().open_writer(writer)`.
    pub fn to_writer<W: io::Write + Send + 'static>(writer: W) -> Result<Logger, LogringError> {
        Logger::builder().open_writer(writer)
    }

    /// Creates a sink with the given display name. Names need not be
    /// unique; repeated calls create separate sinks sharing the name.
    pub fn get_sink(&self, name: impl Into<String>) -> Result<Sink, LogringError> {
        let mut sink = Sink::unattached()?;
        self.register_sink(&mut sink, name);
        Ok(sink)
    }

    /// Registers a closed sink under the given display name. Re-registering
    /// a previously closed sink is permitted; its level setting carries
    /// over, the name does not.
    pub fn register_sink(&self, sink: &mut Sink, name: impl Into<String>) {
        assert!(!sink.open, "sink must be closed before registering");
        let shared = Arc::clone(&sink.shared);
        let name = name.into();
        let _guard = self.control_mutex.lock().unwrap();
        self.control.post(move |ctx, _| {
            ctx.state.pending_sinks.push(SinkEntry::new(shared, name));
        });
        sink.open = true;
    }

    /// Replaces the output function. The previous back-end is flushed and
    /// closed first.
    pub fn set_output_fn(
        &self,
        f: impl FnMut(Level, &[u8]) -> io::Result<usize> + Send + 'static,
    ) {
        let f: OutputFn = Box::new(f);
        self.post_and_sync(move |ctx, _| {
            (ctx.state.flush)();
            (ctx.state.close)();
            ctx.state.out = f;
        });
    }

    pub fn set_error_fn(&self, f: impl FnMut(&[u8]) + Send + 'static) {
        let f: ErrorFn = Box::new(f);
        self.post_and_sync(move |ctx, _| {
            ctx.state.err = f;
        });
    }

    pub fn set_flush_fn(&self, f: impl FnMut() + Send + 'static) {
        let f: HookFn = Box::new(f);
        self.post_and_sync(move |ctx, _| {
            ctx.state.flush = f;
        });
    }

    pub fn set_sync_fn(&self, f: impl FnMut() + Send + 'static) {
        let f: HookFn = Box::new(f);
        self.post_and_sync(move |ctx, _| {
            ctx.state.sync = f;
        });
    }

    pub fn set_reopen_fn(&self, f: impl FnMut() -> io::Result<()> + Send + 'static) {
        let f: ReopenFn = Box::new(f);
        self.post_and_sync(move |ctx, _| {
            ctx.state.reopen = f;
        });
    }

    pub fn set_close_fn(&self, f: impl FnMut() + Send + 'static) {
        let f: HookFn = Box::new(f);
        self.post_and_sync(move |ctx, _| {
            ctx.state.close = f;
        });
    }

    /// Moves the command socket to a new path; an empty path closes the
    /// channel.
    pub fn set_command_path(&self, path: impl Into<String>) {
        let path = path.into();
        self.post_and_sync(move |ctx, _| {
            ctx.state.pending_command_path = Some(path);
        });
    }

    pub fn set_level_style(&self, style: LevelStyle) {
        self.post_and_sync(move |ctx, _| {
            ctx.state.lstyle = style;
        });
    }

    /// Posts a control operation and blocks until the consumer has applied
    /// it. The mutex serializes producers on the control sink's queue.
    fn post_and_sync<F>(&self, f: F)
    where
        F: FnOnce(&mut DispatchCtx<'_>, *const u8) + Send + 'static,
    {
        let _guard = self.control_mutex.lock().unwrap();
        self.control.post(f);
        self.control.sync_inner(false);
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.control.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
