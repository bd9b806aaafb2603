use nix::sys::socket::{connect, recv, send, socket, AddressFamily, MsgFlags, SockFlag, SockType, UnixAddr};
use protocol::{Level, Pattern, ProtocolError, Request, Response, SinkInfo, MAX_FRAME_SIZE};
use std::os::fd::{AsRawFd, OwnedFd};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CtlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system error: {0}")]
    Nix(#[from] nix::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Remote(String),

    #[error("unexpected reply frame")]
    UnexpectedReply,
}

/// Client side of the command channel. Each call opens a fresh connection,
/// sends one request frame and collects reply frames until the logger
/// disconnects.
pub struct CtlClient {
    path: String,
}

impl CtlClient {
    pub fn new(path: impl Into<String>) -> Self {
        CtlClient { path: path.into() }
    }

    /// Queries every sink whose name matches the pattern, in registration
    /// order.
    pub fn status(&self, pattern: &Pattern) -> Result<Vec<SinkInfo>, CtlError> {
        let replies = self.roundtrip(&Request::Status {
            pattern: pattern.clone(),
        })?;
        replies
            .into_iter()
            .map(|reply| match reply {
                Response::SinkInfo(info) => Ok(info),
                Response::Error { reason } => Err(CtlError::Remote(reason)),
                Response::Success => Err(CtlError::UnexpectedReply),
            })
            .collect()
    }

    /// Sets the level of every sink whose name matches the pattern.
    pub fn set_level(&self, level: Level, pattern: &Pattern) -> Result<(), CtlError> {
        self.expect_success(&Request::SetLevel {
            level: level.as_u32(),
            pattern: pattern.clone(),
        })
    }

    /// Asks the logger to reopen its backing file, e.g. after rotation.
    pub fn reopen(&self) -> Result<(), CtlError> {
        self.expect_success(&Request::Reopen)
    }

    fn expect_success(&self, request: &Request) -> Result<(), CtlError> {
        let replies = self.roundtrip(request)?;
        match replies.as_slice() {
            [Response::Success] => Ok(()),
            [Response::Error { reason }] => Err(CtlError::Remote(reason.clone())),
            _ => Err(CtlError::UnexpectedReply),
        }
    }

    fn roundtrip(&self, request: &Request) -> Result<Vec<Response>, CtlError> {
        let fd = self.connect()?;
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = request.encode(&mut buf);
        send(fd.as_raw_fd(), &buf[..n], MsgFlags::empty())?;

        let mut replies = Vec::new();
        loop {
            let n = recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty())?;
            if n == 0 {
                return Ok(replies);
            }
            replies.push(Response::decode(&buf[..n])?);
        }
    }

    fn connect(&self) -> Result<OwnedFd, CtlError> {
        let fd = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;
        let addr = UnixAddr::new(self.path.as_str())?;
        connect(fd.as_raw_fd(), &addr)?;
        Ok(fd)
    }
}
