use crate::dispatcher::CommandDispatcher;
use crate::matcher::Matcher;
use crate::record::{DispatchCtx, DispatchFn};
use crate::sink::SinkShared;
use crate::style::LevelStyle;
use protocol::{Level, Request, Response, SinkInfo};
use std::fmt::Write as _;
use std::io;
use std::mem;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

pub(crate) type OutputFn = Box<dyn FnMut(Level, &[u8]) -> io::Result<usize> + Send>;
pub(crate) type ErrorFn = Box<dyn FnMut(&[u8]) + Send>;
pub(crate) type HookFn = Box<dyn FnMut() + Send>;
pub(crate) type ReopenFn = Box<dyn FnMut() -> io::Result<()> + Send>;
pub(crate) type ClockFn = Box<dyn FnMut() -> SystemTime + Send>;

/// Consumer-side view of one registered sink.
pub(crate) struct SinkEntry {
    pub(crate) shared: Arc<SinkShared>,
    pub(crate) name: String,
    pub(crate) dropped: u64,
}

impl SinkEntry {
    pub(crate) fn new(shared: Arc<SinkShared>, name: String) -> Self {
        SinkEntry {
            shared,
            name,
            dropped: 0,
        }
    }
}

/// Consumer state reachable from executing records. Posted control records
/// mutate these fields directly; registrations and command-path changes are
/// queued here and applied between batches.
pub(crate) struct ConsumerState {
    pub(crate) out: OutputFn,
    pub(crate) err: ErrorFn,
    pub(crate) flush: HookFn,
    pub(crate) sync: HookFn,
    pub(crate) reopen: ReopenFn,
    pub(crate) close: HookFn,
    pub(crate) lstyle: LevelStyle,
    pub(crate) destroy: bool,
    pub(crate) pending_sinks: Vec<SinkEntry>,
    pub(crate) pending_command_path: Option<String>,
}

/// The background thread: round-robins over all registered sinks, drains
/// whole record batches, services the command channel once per pass and
/// batches flushes behind idle passes. Exits when the registry empties,
/// which only happens after the owning logger and every sink are gone.
pub(crate) struct Consumer {
    state: ConsumerState,
    sinks: Vec<SinkEntry>,
    cmds: Option<CommandDispatcher>,
    clock: ClockFn,
}

impl Consumer {
    pub(crate) fn new(state: ConsumerState, control: SinkEntry, clock: ClockFn) -> Self {
        Consumer {
            state,
            sinks: vec![control],
            cmds: None,
            clock,
        }
    }

    pub(crate) fn run(mut self) {
        let mut mbuf = String::new();
        let mut ts = String::new();
        let mut ts_stale = true;
        let mut flush_count = 0usize;
        let mut i = 0usize;

        while !self.sinks.is_empty() {
            let n = i % self.sinks.len();
            i = i.wrapping_add(1);

            if n == 0 {
                ts_stale = true;
                self.pump_commands();
                self.apply_pending();
            }

            let span = self.sinks[n].shared.buf.read_span();
            if span.is_empty() {
                if flush_count != 0 {
                    flush_count -= 1;
                    if flush_count == 0 {
                        (self.state.flush)();
                    }
                }
                continue;
            }

            self.state.destroy = false;

            if ts_stale {
                render_timestamp(&mut ts, (self.clock)());
                ts_stale = false;
            }

            let begin = span.as_ptr();
            // Record starts stay below the physical end; a record's body may
            // extend into the mirror.
            let end = span.end().min(self.sinks[n].shared.buf.end_ptr());
            let mut pos = begin;

            while pos < end {
                debug_assert_eq!(pos as usize % mem::align_of::<DispatchFn>(), 0);
                let fptr = unsafe { (pos as *const DispatchFn).read() };
                let entry = &mut self.sinks[n];
                let mut ctx = DispatchCtx {
                    mbuf: &mut mbuf,
                    state: &mut self.state,
                    ts: &ts,
                    name: &mut entry.name,
                };
                pos = unsafe { fptr(&mut ctx, pos) };
            }

            if self.state.destroy {
                self.sinks.swap_remove(n);
                continue;
            }

            let consumed = pos as usize - begin as usize;
            self.sinks[n].shared.buf.reduce_readable(consumed);

            let entry = &mut self.sinks[n];
            if entry.shared.buf.read_span().is_empty() {
                let n_dropped = entry.shared.buf.dropped_count();
                if n_dropped > 0 {
                    let mut ctx = DispatchCtx {
                        mbuf: &mut mbuf,
                        state: &mut self.state,
                        ts: &ts,
                        name: &mut entry.name,
                    };
                    ctx.print(Level::Warning, |mbuf, style, ts, name| {
                        writeln!(mbuf, "{}{} {}: {} messages dropped", style, ts, name, n_dropped)
                    });
                    entry.dropped += n_dropped as u64;
                }
            }

            flush_count = self.sinks.len();
        }

        (self.state.close)();
    }

    fn apply_pending(&mut self) {
        if !self.state.pending_sinks.is_empty() {
            self.sinks.append(&mut self.state.pending_sinks);
        }
        if let Some(path) = self.state.pending_command_path.take() {
            self.cmds = None;
            if !path.is_empty() {
                match CommandDispatcher::new(&path) {
                    Ok(dispatcher) => self.cmds = Some(dispatcher),
                    Err(e) => warn!(path = %path, error = %e, "failed to open command socket"),
                }
            }
        }
    }

    fn pump_commands(&mut self) {
        let Some(mut cmds) = self.cmds.take() else {
            return;
        };
        let state = &mut self.state;
        let sinks = &mut self.sinks;
        cmds.pump(&mut |request, replies| handle_request(state, sinks, request, replies));
        self.cmds = Some(cmds);
    }
}

fn handle_request(
    state: &mut ConsumerState,
    sinks: &mut [SinkEntry],
    request: Request,
    replies: &mut Vec<Response>,
) {
    match request {
        Request::Status { pattern } => match Matcher::compile(&pattern) {
            Err(reason) => replies.push(Response::Error { reason }),
            Ok(matcher) => {
                for entry in sinks.iter() {
                    if !matcher.matches(&entry.name) {
                        continue;
                    }
                    replies.push(Response::SinkInfo(SinkInfo {
                        level: entry.shared.level(),
                        buf_capacity: entry.shared.buf.capacity() as u64,
                        buf_nbytes: entry.shared.buf.read_span().len() as u64,
                        dropped_count: entry.dropped,
                        name: entry.name.clone(),
                    }));
                }
            }
        },
        Request::SetLevel { level, pattern } => {
            let Some(level) = Level::from_u32(level) else {
                replies.push(Response::Error {
                    reason: "Invalid level".to_string(),
                });
                return;
            };
            match Matcher::compile(&pattern) {
                Err(reason) => replies.push(Response::Error { reason }),
                Ok(matcher) => {
                    for entry in sinks.iter() {
                        if matcher.matches(&entry.name) {
                            entry.shared.set_level(level);
                        }
                    }
                    replies.push(Response::Success);
                }
            }
        }
        Request::Reopen => match (state.reopen)() {
            Ok(()) => replies.push(Response::Success),
            Err(e) => replies.push(Response::Error {
                reason: e.to_string(),
            }),
        },
    }
}

fn render_timestamp(buf: &mut String, now: SystemTime) {
    buf.clear();
    let format =
        time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");
    let odt = time::OffsetDateTime::from(now);
    if let Ok(rendered) = odt.format(format) {
        buf.push_str(&rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::default_level_style;
    use protocol::Pattern;
    use rstest::*;
    use std::time::Duration;

    fn test_state() -> ConsumerState {
        ConsumerState {
            out: Box::new(|_, buf| Ok(buf.len())),
            err: Box::new(|_| {}),
            flush: Box::new(|| {}),
            sync: Box::new(|| {}),
            reopen: Box::new(|| Ok(())),
            close: Box::new(|| {}),
            lstyle: default_level_style,
            destroy: false,
            pending_sinks: Vec::new(),
            pending_command_path: None,
        }
    }

    fn entries(names: &[&str]) -> Vec<SinkEntry> {
        names
            .iter()
            .map(|n| SinkEntry::new(Arc::new(SinkShared::new(4096).unwrap()), n.to_string()))
            .collect()
    }

    #[rstest]
    fn test_status_wildcard_selects_in_registration_order() {
        let mut state = test_state();
        let mut sinks = entries(&["Foo", "FooBar", "FobFar", "Baz"]);
        let mut replies = Vec::new();
        handle_request(
            &mut state,
            &mut sinks,
            Request::Status {
                pattern: Pattern::wildcard("Foo*"),
            },
            &mut replies,
        );
        let names: Vec<_> = replies
            .iter()
            .map(|r| match r {
                Response::SinkInfo(info) => info.name.clone(),
                other => panic!("unexpected reply: {:?}", other),
            })
            .collect();
        assert_eq!(names, ["Foo", "FooBar"]);
    }

    #[rstest]
    fn test_set_level_rejects_out_of_range() {
        let mut state = test_state();
        let mut sinks = entries(&["Foo"]);
        let before = sinks[0].shared.level();
        let mut replies = Vec::new();
        handle_request(
            &mut state,
            &mut sinks,
            Request::SetLevel {
                level: 6,
                pattern: Pattern::none(),
            },
            &mut replies,
        );
        assert_eq!(
            replies,
            vec![Response::Error {
                reason: "Invalid level".to_string()
            }]
        );
        assert_eq!(sinks[0].shared.level(), before);
    }

    #[rstest]
    fn test_set_level_applies_to_matches() {
        let mut state = test_state();
        let mut sinks = entries(&["alpha", "beta"]);
        let mut replies = Vec::new();
        handle_request(
            &mut state,
            &mut sinks,
            Request::SetLevel {
                level: Level::Debug.as_u32(),
                pattern: Pattern::wildcard("al*"),
            },
            &mut replies,
        );
        assert_eq!(replies, vec![Response::Success]);
        assert_eq!(sinks[0].shared.level(), Level::Debug);
        assert_eq!(sinks[1].shared.level(), Level::Info);
    }

    #[rstest]
    fn test_invalid_pattern_reports_reason() {
        let mut state = test_state();
        let mut sinks = entries(&["Foo"]);
        let mut replies = Vec::new();
        handle_request(
            &mut state,
            &mut sinks,
            Request::Status {
                pattern: Pattern::extended_regex("(["),
            },
            &mut replies,
        );
        match &replies[..] {
            [Response::Error { reason }] => assert!(!reason.is_empty()),
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[rstest]
    fn test_reopen_reports_failure_reason() {
        let mut state = test_state();
        state.reopen = Box::new(|| Err(io::Error::new(io::ErrorKind::NotFound, "no such file")));
        let mut sinks = entries(&[]);
        let mut replies = Vec::new();
        handle_request(&mut state, &mut sinks, Request::Reopen, &mut replies);
        match &replies[..] {
            [Response::Error { reason }] => assert!(reason.contains("no such file")),
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[rstest]
    fn test_render_timestamp_format() {
        let mut buf = String::new();
        render_timestamp(
            &mut buf,
            SystemTime::UNIX_EPOCH + Duration::from_nanos(1_500_000_000_123_456_789),
        );
        assert_eq!(buf, "2017-07-14 02:40:00.123456");
    }
}
