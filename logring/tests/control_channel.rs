use eyre::Result;
use logring::{log, Backend, CtlClient, CtlError, Level, Logger, Pattern, Sink};
use nix::sys::socket::{connect, recv, send, socket, AddressFamily, MsgFlags, SockFlag, SockType, UnixAddr};
use rstest::*;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

struct ControlHarness {
    logger: Logger,
    socket_path: String,
    output: Arc<Mutex<Vec<u8>>>,
    reopened: Arc<AtomicBool>,
    _temp_dir: TempDir,
}

impl ControlHarness {
    fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let socket_path = temp_dir
            .path()
            .join("logring.sock")
            .to_string_lossy()
            .into_owned();

        let output = Arc::new(Mutex::new(Vec::new()));
        let reopened = Arc::new(AtomicBool::new(false));

        let out = {
            let output = Arc::clone(&output);
            move |_level: Level, buf: &[u8]| {
                output.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
        };
        let reopen = {
            let reopened = Arc::clone(&reopened);
            move || {
                reopened.store(true, Ordering::Relaxed);
                Ok(())
            }
        };

        let logger = Logger::builder()
            .command_path(socket_path.clone())
            .open_backend(Backend::new(out, |_| {}).with_reopen(reopen))?;

        let harness = ControlHarness {
            logger,
            socket_path,
            output,
            reopened,
            _temp_dir: temp_dir,
        };
        harness.wait_for_socket();
        Ok(harness)
    }

    fn wait_for_socket(&self) {
        for _ in 0..100 {
            if std::path::Path::new(&self.socket_path).exists() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("command socket did not appear at {}", self.socket_path);
    }

    fn client(&self) -> CtlClient {
        CtlClient::new(self.socket_path.clone())
    }

    fn sinks(&self, names: &[&str]) -> Vec<Sink> {
        names
            .iter()
            .map(|name| self.logger.get_sink(*name).unwrap())
            .collect()
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
    }

    /// Sends one raw frame and returns the raw reply frames.
    fn send_raw(&self, frame: &[u8]) -> Vec<Vec<u8>> {
        let fd = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .unwrap();
        let addr = UnixAddr::new(self.socket_path.as_str()).unwrap();
        connect(fd.as_raw_fd(), &addr).unwrap();
        send(fd.as_raw_fd(), frame, MsgFlags::empty()).unwrap();

        let mut replies = Vec::new();
        let mut buf = [0u8; protocol::MAX_FRAME_SIZE];
        loop {
            let n = recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty()).unwrap();
            if n == 0 {
                return replies;
            }
            replies.push(buf[..n].to_vec());
        }
    }
}

#[fixture]
fn harness() -> ControlHarness {
    ControlHarness::new().expect("failed to start logger with command socket")
}

#[rstest]
fn test_status_wildcard_matches_in_registration_order(harness: ControlHarness) {
    let sinks = harness.sinks(&["Foo", "FooBar", "FobFar", "Baz"]);
    // Drain the registration queue before asking.
    sinks[0].sync();

    let infos = harness.client().status(&Pattern::wildcard("Foo*")).unwrap();
    let names: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["Foo", "FooBar"]);
    for info in &infos {
        assert_eq!(info.level, Level::Info);
        assert_eq!(info.buf_capacity, 64 * 1024);
        assert_eq!(info.dropped_count, 0);
    }
}

#[rstest]
fn test_status_without_pattern_includes_control_sink(harness: ControlHarness) {
    let sinks = harness.sinks(&["Alpha"]);
    sinks[0].sync();

    let infos = harness.client().status(&Pattern::none()).unwrap();
    let names: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["control", "Alpha"]);
}

#[rstest]
fn test_set_level_applies_to_matching_sinks(harness: ControlHarness) {
    let sinks = harness.sinks(&["Foo", "FooBar", "Baz"]);
    sinks[0].sync();

    harness
        .client()
        .set_level(Level::Debug, &Pattern::wildcard("Foo*"))
        .unwrap();

    // Level changes are immediately visible to the producers.
    assert_eq!(sinks[0].level(), Level::Debug);
    assert_eq!(sinks[1].level(), Level::Debug);
    assert_eq!(sinks[2].level(), Level::Info);
}

#[rstest]
fn test_set_level_case_insensitive(harness: ControlHarness) {
    let sinks = harness.sinks(&["Foo"]);
    sinks[0].sync();

    harness
        .client()
        .set_level(Level::Error, &Pattern::wildcard("foo*").ignore_case())
        .unwrap();
    assert_eq!(sinks[0].level(), Level::Error);
}

#[rstest]
fn test_invalid_level_rejected_without_side_effects(harness: ControlHarness) {
    let sinks = harness.sinks(&["Foo"]);
    sinks[0].sync();

    let mut frame = [0u8; protocol::MAX_FRAME_SIZE];
    let n = protocol::Request::SetLevel {
        level: 9,
        pattern: Pattern::none(),
    }
    .encode(&mut frame);

    let replies = harness.send_raw(&frame[..n]);
    assert_eq!(replies.len(), 1);
    match protocol::Response::decode(&replies[0]).unwrap() {
        protocol::Response::Error { reason } => assert_eq!(reason, "Invalid level"),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(sinks[0].level(), Level::Info);
}

#[rstest]
fn test_invalid_pattern_returns_error_reply(harness: ControlHarness) {
    let err = harness
        .client()
        .status(&Pattern::extended_regex("(["))
        .unwrap_err();
    match err {
        CtlError::Remote(reason) => assert!(!reason.is_empty()),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[rstest]
fn test_reopen_invokes_capability(harness: ControlHarness) {
    harness.client().reopen().unwrap();
    assert!(harness.reopened.load(Ordering::Relaxed));
}

#[rstest]
fn test_short_frame_yields_error(harness: ControlHarness) {
    let replies = harness.send_raw(&[0x01, 0x02]);
    assert_eq!(replies.len(), 1);
    match protocol::Response::decode(&replies[0]).unwrap() {
        protocol::Response::Error { reason } => assert_eq!(reason, "Incomplete frame header"),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[rstest]
fn test_unknown_frame_id_yields_error(harness: ControlHarness) {
    let replies = harness.send_raw(&99u32.to_le_bytes());
    assert_eq!(replies.len(), 1);
    match protocol::Response::decode(&replies[0]).unwrap() {
        protocol::Response::Error { reason } => assert_eq!(reason, "Invalid frame id"),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[rstest]
fn test_wrong_frame_length_yields_error(harness: ControlHarness) {
    let mut frame = [0u8; 10];
    frame[..4].copy_from_slice(&protocol::FRAME_STATUS.to_le_bytes());
    let replies = harness.send_raw(&frame);
    assert_eq!(replies.len(), 1);
    match protocol::Response::decode(&replies[0]).unwrap() {
        protocol::Response::Error { reason } => assert_eq!(reason, "Invalid frame length"),
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[rstest]
fn test_status_reports_pending_bytes(harness: ControlHarness) {
    let sinks = harness.sinks(&["Busy"]);
    sinks[0].sync();
    log!(sinks[0], "some pending work {}", 1);
    sinks[0].sync();

    let infos = harness.client().status(&Pattern::wildcard("Busy")).unwrap();
    assert_eq!(infos.len(), 1);
    // Drained by the time status is served.
    assert_eq!(infos[0].buf_nbytes, 0);
    assert!(harness.output().contains("some pending work 1"));
}
