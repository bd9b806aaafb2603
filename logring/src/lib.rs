//! # logring - low-latency logging transport
//!
//! Application threads hand formatted-log requests to a background
//! consumer thread that performs all expensive work (timestamp rendering,
//! text formatting, I/O) off the hot path. Each [`Sink`] owns a dedicated
//! lock-free byte queue ([`spscbuf`]) into which log calls are encoded as
//! self-describing records; the consumer executes them generically through
//! a dispatch pointer stored at the front of every record.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use logring::{log, logl, Level, Logger};
//!
//! let logger = Logger::to_path("/var/log/app.log")?;
//! let sink = logger.get_sink("worker")?;
//!
//! log!(sink, "connected to {} on port {}", "example.org", 443);
//! logl!(Level::Debug, sink, "retry budget {}", 3);
//! # Ok::<(), logring::LogringError>(())
//! ```
//!
//! A sink is owned by one thread; to log from another thread clone it,
//! which registers an independent queue under the same name. `set_level`
//! and `level` are the only sink operations safe to call concurrently.
//!
//! By default a log call blocks while its sink's queue is full. The
//! `try_` macro variants drop the record instead and count it; the count
//! is reported as one warning line when the sink next drains.
//!
//! ## The command channel
//!
//! Unless disabled, every logger binds a seqpacket socket (see
//! [`default_command_path`]) over which a controller can inspect sink
//! state, change levels by name pattern and trigger log rotation at
//! runtime; [`CtlClient`] speaks the protocol.

pub use crate::ctl::{CtlClient, CtlError};
pub use crate::error::LogringError;
pub use crate::logger::{Backend, Logger, LoggerBuilder};
pub use crate::paths::{default_command_path, NULL_COMMAND_PATH};
pub use crate::record::{nocopy, nocopy_unchecked, NoCopy, TRUNCATED};
pub use crate::sink::Sink;
pub use crate::style::{default_level_style, systemd_level_style, LevelStyle};
pub use crate::timestamp::Timestamp;
pub use protocol::{Level, Pattern, PatternKind, SinkInfo};

pub mod ctl;
pub(crate) mod consumer;
pub(crate) mod dispatcher;
pub mod error;
pub mod logger;
mod macros;
pub(crate) mod matcher;
pub mod paths;
#[doc(hidden)]
pub mod record;
pub mod sink;
pub mod style;
pub mod timestamp;
