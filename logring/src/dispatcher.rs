use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{
    accept4, bind, listen, recv, send, socket, AddressFamily, Backlog, MsgFlags, SockFlag,
    SockType, UnixAddr,
};
use protocol::{frame_id, request_len, Request, Response, MAX_FRAME_SIZE};
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use tracing::{debug, warn};

/// One accepted control connection. After a frame has been read the
/// connection only waits for writability; once its reply queue drains it is
/// disconnected.
struct Conn {
    fd: OwnedFd,
    interest: PollFlags,
    outq: VecDeque<Vec<u8>>,
    dead: bool,
}

/// Readiness-multiplexed reactor over the command socket. Pumped with zero
/// timeout from the consumer loop; never blocks the consumer.
pub(crate) struct CommandDispatcher {
    listener: OwnedFd,
    path: String,
    conns: Vec<Conn>,
}

impl CommandDispatcher {
    pub(crate) fn new(path: &str) -> io::Result<Self> {
        let _ = std::fs::remove_file(path);
        let fd = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(io::Error::from)?;
        let addr = UnixAddr::new(path).map_err(io::Error::from)?;
        bind(fd.as_raw_fd(), &addr).map_err(io::Error::from)?;
        listen(&fd, Backlog::MAXCONN).map_err(io::Error::from)?;
        debug!(path = %path, "command socket listening");

        Ok(CommandDispatcher {
            listener: fd,
            path: path.to_string(),
            conns: Vec::new(),
        })
    }

    /// Accepts pending connections, reads at most one frame per readable
    /// connection, invokes the handler for every valid request, and writes
    /// as much queued reply data as the sockets accept.
    pub(crate) fn pump(&mut self, handler: &mut dyn FnMut(Request, &mut Vec<Response>)) {
        let mut pollfds = Vec::with_capacity(1 + self.conns.len());
        pollfds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for conn in &self.conns {
            pollfds.push(PollFd::new(conn.fd.as_fd(), conn.interest));
        }
        if poll(&mut pollfds, PollTimeout::ZERO).is_err() {
            return;
        }
        let revents: Vec<PollFlags> = pollfds
            .iter()
            .map(|p| p.revents().unwrap_or(PollFlags::empty()))
            .collect();
        drop(pollfds);

        if revents[0].contains(PollFlags::POLLIN) {
            match accept4(
                self.listener.as_raw_fd(),
                SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            ) {
                Ok(fd) => {
                    debug!("controller connected");
                    self.conns.push(Conn {
                        fd: unsafe { OwnedFd::from_raw_fd(fd) },
                        interest: PollFlags::POLLIN,
                        outq: VecDeque::new(),
                        dead: false,
                    });
                }
                Err(Errno::EAGAIN) => {}
                Err(e) => warn!(error = %e, "failed to accept command connection"),
            }
        }

        for (idx, revent) in revents.iter().enumerate().skip(1) {
            // Connections accepted this pump have no revents entry yet.
            let Some(conn) = self.conns.get_mut(idx - 1) else {
                break;
            };
            if revent.contains(PollFlags::POLLOUT) {
                flush_replies(conn);
            } else if revent.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
                read_frame(conn, handler);
            }
        }

        self.conns.retain(|c| !c.dead);
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_frame(conn: &mut Conn, handler: &mut dyn FnMut(Request, &mut Vec<Response>)) {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let n = match recv(conn.fd.as_raw_fd(), &mut buf, MsgFlags::empty()) {
        Ok(n) => n,
        Err(Errno::EAGAIN) => return,
        Err(e) => {
            warn!(error = %e, "failed to read command frame");
            conn.dead = true;
            return;
        }
    };
    if n == 0 {
        conn.dead = true;
        return;
    }

    // One request per connection: whatever happens next, the connection
    // only flushes replies and disconnects.
    conn.interest = PollFlags::POLLOUT;

    let frame = &buf[..n];
    let Ok(id) = frame_id(frame) else {
        queue_error(conn, "Incomplete frame header");
        return;
    };
    let Some(expected) = request_len(id) else {
        queue_error(conn, "Invalid frame id");
        return;
    };
    if n != expected {
        queue_error(conn, "Invalid frame length");
        return;
    }
    match Request::decode(frame) {
        Ok(request) => {
            let mut replies = Vec::new();
            handler(request, &mut replies);
            for reply in &replies {
                queue_reply(conn, reply);
            }
        }
        Err(e) => queue_error(conn, &e.to_string()),
    }
}

fn flush_replies(conn: &mut Conn) {
    while let Some(front) = conn.outq.front() {
        match send(conn.fd.as_raw_fd(), front, MsgFlags::MSG_NOSIGNAL) {
            Ok(_) => {
                conn.outq.pop_front();
            }
            Err(Errno::EAGAIN) => return,
            Err(e) => {
                warn!(error = %e, "failed to write command reply");
                conn.dead = true;
                return;
            }
        }
    }
    conn.dead = true;
}

fn queue_reply(conn: &mut Conn, reply: &Response) {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let n = reply.encode(&mut buf);
    conn.outq.push_back(buf[..n].to_vec());
}

fn queue_error(conn: &mut Conn, reason: &str) {
    queue_reply(
        conn,
        &Response::Error {
            reason: reason.to_string(),
        },
    );
}
