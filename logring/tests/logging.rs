use eyre::Result;
use logring::{log, log_ts, logl, nocopy, try_log, Backend, Level, Logger, NULL_COMMAND_PATH};
use rstest::*;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, OnceLock};

struct TestLogger {
    logger: Logger,
    output: Arc<Mutex<Vec<u8>>>,
    errors: Arc<Mutex<Vec<u8>>>,
}

impl TestLogger {
    fn new() -> Result<Self> {
        let output = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let out = {
            let output = Arc::clone(&output);
            move |_level: Level, buf: &[u8]| {
                output.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
        };
        let err = {
            let errors = Arc::clone(&errors);
            move |buf: &[u8]| {
                errors.lock().unwrap().extend_from_slice(buf);
            }
        };

        let logger = Logger::builder()
            .command_path(NULL_COMMAND_PATH)
            .open_backend(Backend::new(out, err))?;

        Ok(TestLogger {
            logger,
            output,
            errors,
        })
    }

    fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
    }

    fn error_text(&self) -> String {
        String::from_utf8_lossy(&self.errors.lock().unwrap()).into_owned()
    }
}

#[fixture]
fn harness() -> TestLogger {
    TestLogger::new().expect("failed to start logger")
}

#[rstest]
fn test_formatted_round_trip(harness: TestLogger) {
    let sink = harness.logger.get_sink("worker").unwrap();

    log!(sink, "value {} and {}", 42, "text");
    sink.sync();

    let out = harness.output_text();
    assert_eq!(out.lines().count(), 1);
    let line = out.lines().next().unwrap();
    assert!(line.starts_with("I "), "level prefix missing: {}", line);
    assert!(line.contains(" worker "), "sink name missing: {}", line);
    assert!(line.contains("logging.rs:"), "call site missing: {}", line);
    assert!(line.ends_with("value 42 and text"), "payload wrong: {}", line);
}

#[rstest]
fn test_level_filtering(harness: TestLogger) {
    let sink = harness.logger.get_sink("worker").unwrap();

    sink.set_level(Level::Warning);
    log!(sink, "info is filtered");
    logl!(Level::Warning, sink, "warning passes");
    sink.sync();

    let out = harness.output_text();
    assert!(!out.contains("info is filtered"));
    assert!(out.contains("warning passes"));
    assert!(out.lines().next().unwrap().starts_with("W "));

    sink.set_level(Level::Debug);
    logl!(Level::Debug, sink, "debug passes now");
    sink.sync();
    assert!(harness.output_text().contains("debug passes now"));
}

#[rstest]
fn test_string_arguments_are_copied(harness: TestLogger) {
    let sink = harness.logger.get_sink("worker").unwrap();

    let mut message = String::from("before-mutation");
    log!(sink, "captured: {}", message.as_str());
    message.clear();
    message.push_str("after-mutation");
    sink.sync();

    let out = harness.output_text();
    assert!(out.contains("captured: before-mutation"));
    assert!(!out.contains("after-mutation"));
}

#[rstest]
fn test_nocopy_static_string(harness: TestLogger) {
    let sink = harness.logger.get_sink("worker").unwrap();

    log!(sink, "by reference: {}", nocopy("static text"));
    sink.sync();

    assert!(harness.output_text().contains("by reference: static text"));
}

#[rstest]
fn test_oversized_string_renders_truncation_marker(harness: TestLogger) {
    let sink = harness.logger.get_sink("worker").unwrap();

    // Larger than the sink's whole queue, so it can never be captured.
    let giant = "x".repeat(128 * 1024);
    log!(sink, "big: {}", giant.as_str());
    sink.sync();

    let out = harness.output_text();
    assert!(out.contains("big: <truncated>"));
    assert!(!out.contains("xxxx"));
}

#[rstest]
fn test_custom_timestamp(harness: TestLogger) {
    let sink = harness.logger.get_sink("worker").unwrap();

    log_ts!(sink, "2020-01-01 00:00:00.000000", "with custom ts");
    sink.sync();

    let line_owner = harness.output_text();
    let line = line_owner.lines().next().unwrap();
    assert!(
        line.starts_with("I 2020-01-01 00:00:00.000000 worker "),
        "unexpected line: {}",
        line
    );
    assert!(line.ends_with("with custom ts"));
}

#[rstest]
fn test_owned_values_render(harness: TestLogger) {
    let sink = harness.logger.get_sink("worker").unwrap();

    let owned = String::from("moved-in");
    log!(sink, "{} {} {} {}", owned, 3.5f64, true, 'z');
    sink.sync();

    assert!(harness.output_text().contains("moved-in 3.5 true z"));
}

#[rstest]
fn test_close_and_reregister_preserves_level(harness: TestLogger) {
    let mut sink = harness.logger.get_sink("first-name").unwrap();
    sink.set_level(Level::Debug);

    log!(sink, "under first name");
    sink.close();
    assert!(!sink.is_open());

    harness.logger.register_sink(&mut sink, "second-name");
    assert!(sink.is_open());
    assert_eq!(sink.level(), Level::Debug);

    logl!(Level::Debug, sink, "under second name");
    sink.sync();

    let out = harness.output_text();
    assert!(out.contains("first-name"));
    assert!(out.contains("second-name"));
}

#[rstest]
fn test_clone_registers_same_name(harness: TestLogger) {
    let sink = harness.logger.get_sink("shared").unwrap();
    sink.set_level(Level::Debug);

    let clone = sink.clone();
    assert_eq!(clone.level(), Level::Debug);

    let handle = std::thread::spawn(move || {
        log!(clone, "from the clone");
        clone.sync();
    });
    handle.join().unwrap();

    log!(sink, "from the original");
    sink.sync();

    let out = harness.output_text();
    assert!(out.contains("from the clone"));
    assert!(out.contains("from the original"));
    assert_eq!(out.matches(" shared ").count(), 2);
}

#[rstest]
fn test_write_error_reports_through_error_fn() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let err = {
        let errors = Arc::clone(&errors);
        move |buf: &[u8]| errors.lock().unwrap().extend_from_slice(buf)
    };
    let logger = Logger::builder()
        .command_path(NULL_COMMAND_PATH)
        .open_backend(Backend::new(
            |_level, buf: &[u8]| Ok(buf.len() - 1), // short write
            err,
        ))
        .unwrap();
    let sink = logger.get_sink("worker").unwrap();

    log!(sink, "will be cut short");
    sink.sync();

    let text = String::from_utf8_lossy(&errors.lock().unwrap()).into_owned();
    assert!(text.contains("Error: Short write"), "got: {}", text);
    drop(sink);
}

// A copyable argument whose rendering blocks until the test opens the
// gate, to hold the consumer mid-batch while the producer overruns its
// queue.
static GATE: OnceLock<(Mutex<bool>, Condvar)> = OnceLock::new();

fn gate() -> &'static (Mutex<bool>, Condvar) {
    GATE.get_or_init(|| (Mutex::new(false), Condvar::new()))
}

#[derive(Clone, Copy)]
struct Gate;

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lock, cv) = gate();
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
        write!(f, "gate-open")
    }
}

#[rstest]
fn test_nonblocking_drops_are_counted_and_reported(harness: TestLogger) {
    let sink = harness.logger.get_sink("lossy").unwrap();

    log!(sink, "{}", Gate);

    let attempts = 10_000usize;
    let filler = "f".repeat(1024);
    for i in 0..attempts {
        try_log!(sink, "payload {} {}", i, filler.as_str());
    }

    {
        let (lock, cv) = gate();
        *lock.lock().unwrap() = true;
        cv.notify_all();
    }

    // The drop warning is emitted after the draining batch; a second sync
    // round-trip guarantees it has been written.
    sink.sync();
    sink.sync();

    let out = harness.output_text();
    let delivered = out.matches("payload ").count();
    let warnings: Vec<&str> = out
        .lines()
        .filter(|l| l.contains("messages dropped"))
        .collect();
    assert_eq!(warnings.len(), 1, "expected one drop warning: {:?}", warnings);
    assert!(warnings[0].starts_with("W "));
    assert!(warnings[0].contains(" lossy: "));

    let dropped: usize = warnings[0]
        .split_whitespace()
        .rev()
        .nth(2)
        .and_then(|w| w.parse().ok())
        .expect("drop count parses");
    assert!(dropped > 0);
    assert_eq!(delivered + dropped, attempts);
    assert!(harness.error_text().is_empty());
}
