use std::fmt;

/// Wall-clock timestamp read at the logging call site, for the `*_rtc`
/// macro family. Uses the coarse realtime clock, which is cheaper than a
/// full `clock_gettime` and precise enough for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME_COARSE, &mut ts);
        }
        Timestamp {
            secs: ts.tv_sec as i64,
            nanos: ts.tv_nsec as u32,
        }
    }

    pub fn from_parts(secs: i64, nanos: u32) -> Self {
        Timestamp { secs, nanos }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
        );
        let nanos = self.secs as i128 * 1_000_000_000 + self.nanos as i128;
        let odt = time::OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|_| fmt::Error)?;
        f.write_str(&odt.format(format).map_err(|_| fmt::Error)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let ts = Timestamp::from_parts(1_500_000_000, 123_456_789);
        assert_eq!(ts.to_string(), "2017-07-14 02:40:00.123456");
    }

    #[test]
    fn test_now_is_recent() {
        let ts = Timestamp::now();
        assert!(ts.secs > 1_600_000_000);
    }
}
