//! Wire protocol for the logring command channel.
//!
//! Every frame is a fixed-size little-endian struct beginning with a 4-byte
//! frame id. One frame per datagram; a frame whose length does not match
//! the expected size for its id is rejected before any handler runs.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest frame the dispatcher or a client will ever read or write.
pub const MAX_FRAME_SIZE: usize = 512;

pub const NAME_LEN: usize = 128;
pub const REASON_LEN: usize = 256;
pub const PATTERN_TEXT_LEN: usize = 256;

pub const FRAME_STATUS: u32 = 0;
pub const FRAME_SET_LEVEL: u32 = 1;
pub const FRAME_SINK_INFO: u32 = 2;
pub const FRAME_SUCCESS: u32 = 3;
pub const FRAME_ERROR: u32 = 4;
pub const FRAME_REOPEN: u32 = 5;

const PATTERN_WIRE_LEN: usize = 2 + PATTERN_TEXT_LEN;

pub const STATUS_LEN: usize = 4 + PATTERN_WIRE_LEN;
pub const SET_LEVEL_LEN: usize = 4 + 4 + PATTERN_WIRE_LEN;
pub const REOPEN_LEN: usize = 4;
pub const SINK_INFO_LEN: usize = 4 + 4 + 8 * 3 + NAME_LEN;
pub const SUCCESS_LEN: usize = 4;
pub const ERROR_LEN: usize = 4 + REASON_LEN;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("short frame: {0} bytes")]
    ShortFrame(usize),

    #[error("invalid frame id: {0}")]
    UnknownFrameId(u32),

    #[error("invalid frame length: expected {expected} bytes for frame id {frame_id}, got {actual}")]
    InvalidLength {
        frame_id: u32,
        expected: usize,
        actual: usize,
    },

    #[error("invalid log level: {0}")]
    InvalidLevel(u32),

    #[error("invalid pattern kind: {0}")]
    InvalidPatternKind(u8),
}

/// Log level threshold, ordered by verbosity: a sink set to `Info` passes
/// everything up to and including `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Level {
    None = 0,
    Fatal = 1,
    Error = 2,
    Warning = 3,
    Info = 4,
    Debug = 5,
}

impl Level {
    pub fn from_u32(value: u32) -> Option<Level> {
        match value {
            0 => Some(Level::None),
            1 => Some(Level::Fatal),
            2 => Some(Level::Error),
            3 => Some(Level::Warning),
            4 => Some(Level::Info),
            5 => Some(Level::Debug),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::None => "none",
            Level::Fatal => "fatal",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Level::None),
            "fatal" => Ok(Level::Fatal),
            "error" => Ok(Level::Error),
            "warning" => Ok(Level::Warning),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            _ => Err(ProtocolError::InvalidLevel(u32::MAX)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PatternKind {
    None = 0,
    ExtendedRegex = 1,
    BasicRegex = 2,
    Wildcard = 3,
}

impl PatternKind {
    fn from_u8(value: u8) -> Result<PatternKind, ProtocolError> {
        match value {
            0 => Ok(PatternKind::None),
            1 => Ok(PatternKind::ExtendedRegex),
            2 => Ok(PatternKind::BasicRegex),
            3 => Ok(PatternKind::Wildcard),
            _ => Err(ProtocolError::InvalidPatternKind(value)),
        }
    }
}

/// Sink-name selector carried by `status` and `set_level` requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub kind: PatternKind,
    pub ignore_case: bool,
    pub text: String,
}

impl Pattern {
    pub fn none() -> Self {
        Pattern {
            kind: PatternKind::None,
            ignore_case: false,
            text: String::new(),
        }
    }

    pub fn wildcard(text: impl Into<String>) -> Self {
        Pattern {
            kind: PatternKind::Wildcard,
            ignore_case: false,
            text: text.into(),
        }
    }

    pub fn extended_regex(text: impl Into<String>) -> Self {
        Pattern {
            kind: PatternKind::ExtendedRegex,
            ignore_case: false,
            text: text.into(),
        }
    }

    pub fn basic_regex(text: impl Into<String>) -> Self {
        Pattern {
            kind: PatternKind::BasicRegex,
            ignore_case: false,
            text: text.into(),
        }
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.kind as u8;
        buf[1] = self.ignore_case as u8;
        put_ctext(&mut buf[2..2 + PATTERN_TEXT_LEN], &self.text);
    }

    fn decode(buf: &[u8]) -> Result<Pattern, ProtocolError> {
        Ok(Pattern {
            kind: PatternKind::from_u8(buf[0])?,
            ignore_case: buf[1] != 0,
            text: get_ctext(&buf[2..2 + PATTERN_TEXT_LEN]),
        })
    }
}

/// A command sent by a controller to the consumer thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status {
        pattern: Pattern,
    },
    /// The level is carried raw so an out-of-range value survives decoding
    /// and can be rejected with an error reply instead of a parse failure.
    SetLevel {
        level: u32,
        pattern: Pattern,
    },
    Reopen,
}

/// Per-sink state reported in reply to `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkInfo {
    pub level: Level,
    pub buf_capacity: u64,
    pub buf_nbytes: u64,
    pub dropped_count: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    SinkInfo(SinkInfo),
    Success,
    Error { reason: String },
}

/// Expected wire size for a request frame id, used to validate a frame's
/// length before decoding it.
pub fn request_len(frame_id: u32) -> Option<usize> {
    match frame_id {
        FRAME_STATUS => Some(STATUS_LEN),
        FRAME_SET_LEVEL => Some(SET_LEVEL_LEN),
        FRAME_REOPEN => Some(REOPEN_LEN),
        _ => None,
    }
}

/// Expected wire size for a response frame id.
pub fn response_len(frame_id: u32) -> Option<usize> {
    match frame_id {
        FRAME_SINK_INFO => Some(SINK_INFO_LEN),
        FRAME_SUCCESS => Some(SUCCESS_LEN),
        FRAME_ERROR => Some(ERROR_LEN),
        _ => None,
    }
}

pub fn frame_id(buf: &[u8]) -> Result<u32, ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::ShortFrame(buf.len()));
    }
    Ok(get_u32(buf, 0))
}

impl Request {
    pub fn frame_id(&self) -> u32 {
        match self {
            Request::Status { .. } => FRAME_STATUS,
            Request::SetLevel { .. } => FRAME_SET_LEVEL,
            Request::Reopen => FRAME_REOPEN,
        }
    }

    /// Writes the frame into `buf` and returns its wire size.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        put_u32(buf, 0, self.frame_id());
        match self {
            Request::Status { pattern } => {
                pattern.encode(&mut buf[4..]);
                STATUS_LEN
            }
            Request::SetLevel { level, pattern } => {
                put_u32(buf, 4, *level);
                pattern.encode(&mut buf[8..]);
                SET_LEVEL_LEN
            }
            Request::Reopen => REOPEN_LEN,
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Request, ProtocolError> {
        let id = frame_id(buf)?;
        let expected = request_len(id).ok_or(ProtocolError::UnknownFrameId(id))?;
        if buf.len() != expected {
            return Err(ProtocolError::InvalidLength {
                frame_id: id,
                expected,
                actual: buf.len(),
            });
        }
        match id {
            FRAME_STATUS => Ok(Request::Status {
                pattern: Pattern::decode(&buf[4..])?,
            }),
            FRAME_SET_LEVEL => Ok(Request::SetLevel {
                level: get_u32(buf, 4),
                pattern: Pattern::decode(&buf[8..])?,
            }),
            FRAME_REOPEN => Ok(Request::Reopen),
            _ => unreachable!("request_len admitted the id"),
        }
    }
}

impl Response {
    pub fn frame_id(&self) -> u32 {
        match self {
            Response::SinkInfo(_) => FRAME_SINK_INFO,
            Response::Success => FRAME_SUCCESS,
            Response::Error { .. } => FRAME_ERROR,
        }
    }

    /// Writes the frame into `buf` and returns its wire size.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        put_u32(buf, 0, self.frame_id());
        match self {
            Response::SinkInfo(info) => {
                put_u32(buf, 4, info.level.as_u32());
                put_u64(buf, 8, info.buf_capacity);
                put_u64(buf, 16, info.buf_nbytes);
                put_u64(buf, 24, info.dropped_count);
                put_ctext(&mut buf[32..32 + NAME_LEN], &info.name);
                SINK_INFO_LEN
            }
            Response::Success => SUCCESS_LEN,
            Response::Error { reason } => {
                put_ctext(&mut buf[4..4 + REASON_LEN], reason);
                ERROR_LEN
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Response, ProtocolError> {
        let id = frame_id(buf)?;
        let expected = response_len(id).ok_or(ProtocolError::UnknownFrameId(id))?;
        if buf.len() != expected {
            return Err(ProtocolError::InvalidLength {
                frame_id: id,
                expected,
                actual: buf.len(),
            });
        }
        match id {
            FRAME_SINK_INFO => {
                let level_raw = get_u32(buf, 4);
                let level =
                    Level::from_u32(level_raw).ok_or(ProtocolError::InvalidLevel(level_raw))?;
                Ok(Response::SinkInfo(SinkInfo {
                    level,
                    buf_capacity: get_u64(buf, 8),
                    buf_nbytes: get_u64(buf, 16),
                    dropped_count: get_u64(buf, 24),
                    name: get_ctext(&buf[32..32 + NAME_LEN]),
                }))
            }
            FRAME_SUCCESS => Ok(Response::Success),
            FRAME_ERROR => Ok(Response::Error {
                reason: get_ctext(&buf[4..4 + REASON_LEN]),
            }),
            _ => unreachable!("response_len admitted the id"),
        }
    }
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

/// Truncating NUL-padded copy into a fixed field; truncation lands on a
/// character boundary.
fn put_ctext(field: &mut [u8], text: &str) {
    let mut n = text.len().min(field.len() - 1);
    while !text.is_char_boundary(n) {
        n -= 1;
    }
    field[..n].copy_from_slice(&text.as_bytes()[..n]);
    field[n..].fill(0);
}

fn get_ctext(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
