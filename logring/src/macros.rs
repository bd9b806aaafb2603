//! The logging macro family.
//!
//! `log!`/`logl!` block when the sink's queue is full; the `try_` variants
//! drop the record and count it instead. The `_ts` variants capture a
//! caller-supplied timestamp, and `_rtc` reads the coarse realtime clock at
//! the call site. Format strings must be literals; `file:line` of the call
//! site is baked into the line at compile time.
//!
//! String arguments (`&str`, `String`, `&String`) are copied into the
//! record; wrap one in [`nocopy`] to pass it by reference. Other arguments
//! must be `Copy + Display + 'static` and are captured by value. At most
//! 12 arguments per call.
//!
//! A `Level::Fatal` record is written, synced, and then the process is
//! aborted.
//!
//! [`nocopy`]: crate::nocopy

/// Logs at `Level::Info`, blocking if the sink's queue is full.
#[macro_export]
macro_rules! log {
    ($sink:expr, $($rest:tt)+) => {
        $crate::logl!($crate::Level::Info, $sink, $($rest)+)
    };
}

/// Logs at the given level, blocking if the sink's queue is full.
#[macro_export]
macro_rules! logl {
    ($level:expr, $sink:expr, $($rest:tt)+) => {
        $crate::__log_impl!(false, $level, $sink, $($rest)+)
    };
}

/// Non-blocking [`log!`]: the record is discarded and counted if the sink
/// is full. Accumulated drops surface as one warning line once the sink
/// drains.
#[macro_export]
macro_rules! try_log {
    ($sink:expr, $($rest:tt)+) => {
        $crate::try_logl!($crate::Level::Info, $sink, $($rest)+)
    };
}

/// Non-blocking [`logl!`].
#[macro_export]
macro_rules! try_logl {
    ($level:expr, $sink:expr, $($rest:tt)+) => {
        $crate::__log_impl!(true, $level, $sink, $($rest)+)
    };
}

/// Logs with a caller-supplied timestamp in place of the consumer's cached
/// clock. The timestamp may be any supported argument type, e.g.
/// [`Timestamp`](crate::Timestamp) or a string.
#[macro_export]
macro_rules! log_ts {
    ($sink:expr, $ts:expr, $($rest:tt)+) => {
        $crate::logl_ts!($crate::Level::Info, $sink, $ts, $($rest)+)
    };
}

/// Level variant of [`log_ts!`].
#[macro_export]
macro_rules! logl_ts {
    ($level:expr, $sink:expr, $ts:expr, $($rest:tt)+) => {
        $crate::__log_ts_impl!(false, $level, $sink, $ts, $($rest)+)
    };
}

/// Non-blocking [`log_ts!`].
#[macro_export]
macro_rules! try_log_ts {
    ($sink:expr, $ts:expr, $($rest:tt)+) => {
        $crate::try_logl_ts!($crate::Level::Info, $sink, $ts, $($rest)+)
    };
}

/// Non-blocking [`logl_ts!`].
#[macro_export]
macro_rules! try_logl_ts {
    ($level:expr, $sink:expr, $ts:expr, $($rest:tt)+) => {
        $crate::__log_ts_impl!(true, $level, $sink, $ts, $($rest)+)
    };
}

/// Logs with a timestamp read from the coarse realtime clock at the call
/// site.
#[macro_export]
macro_rules! log_rtc {
    ($sink:expr, $($rest:tt)+) => {
        $crate::log_ts!($sink, $crate::Timestamp::now(), $($rest)+)
    };
}

/// Level variant of [`log_rtc!`].
#[macro_export]
macro_rules! logl_rtc {
    ($level:expr, $sink:expr, $($rest:tt)+) => {
        $crate::logl_ts!($level, $sink, $crate::Timestamp::now(), $($rest)+)
    };
}

/// Non-blocking [`log_rtc!`].
#[macro_export]
macro_rules! try_log_rtc {
    ($sink:expr, $($rest:tt)+) => {
        $crate::try_log_ts!($sink, $crate::Timestamp::now(), $($rest)+)
    };
}

/// Non-blocking [`logl_rtc!`].
#[macro_export]
macro_rules! try_logl_rtc {
    ($level:expr, $sink:expr, $($rest:tt)+) => {
        $crate::try_logl_ts!($level, $sink, $crate::Timestamp::now(), $($rest)+)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_impl {
    ($nb:literal, $level:expr, $sink:expr, $fmt:literal $(,)?) => {{
        let __lr_level: $crate::Level = $level;
        let __lr_sink: &$crate::Sink = &$sink;
        if __lr_sink.level() >= __lr_level {
            __lr_sink.__log_fixed(
                $nb,
                move |__lr_ctx: &mut $crate::record::DispatchCtx<'_>, _: *const u8| {
                    __lr_ctx.print(__lr_level, |__lr_mbuf, __lr_style, __lr_ts, __lr_name| {
                        #[allow(unused_imports)]
                        use ::core::fmt::Write as _;
                        ::core::write!(
                            __lr_mbuf,
                            ::core::concat!(
                                "{}{} {} ",
                                ::core::file!(),
                                ":",
                                ::core::line!(),
                                ": ",
                                $fmt,
                                "\n"
                            ),
                            __lr_style,
                            __lr_ts,
                            __lr_name
                        )
                    })
                },
            );
        }
        $crate::__log_fatal!(__lr_level, __lr_sink);
    }};
    ($nb:literal, $level:expr, $sink:expr, $fmt:literal, $($arg:expr),+ $(,)?) => {{
        let __lr_level: $crate::Level = $level;
        let __lr_sink: &$crate::Sink = &$sink;
        if __lr_sink.level() >= __lr_level {
            __lr_sink.__log_with_table(
                $nb,
                |__lr_table: &mut $crate::record::TableWriter<'_>| {
                    #[allow(unused_imports)]
                    use $crate::record::{ShelveString as _, ShelveValue as _};
                    $crate::__log_bind!(
                        (@ctx),
                        __lr_level,
                        $fmt,
                        __lr_table,
                        (__lr_a0 __lr_a1 __lr_a2 __lr_a3 __lr_a4 __lr_a5 __lr_a6 __lr_a7 __lr_a8
                            __lr_a9 __lr_a10 __lr_a11),
                        (),
                        $($arg),+
                    )
                },
            );
        }
        $crate::__log_fatal!(__lr_level, __lr_sink);
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_ts_impl {
    ($nb:literal, $level:expr, $sink:expr, $ts:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let __lr_level: $crate::Level = $level;
        let __lr_sink: &$crate::Sink = &$sink;
        if __lr_sink.level() >= __lr_level {
            __lr_sink.__log_with_table(
                $nb,
                |__lr_table: &mut $crate::record::TableWriter<'_>| {
                    #[allow(unused_imports)]
                    use $crate::record::{ShelveString as _, ShelveValue as _};
                    let __lr_ts_arg = $crate::record::Wrap($ts).shelve(&mut *__lr_table);
                    $crate::__log_bind!(
                        (@custom __lr_ts_arg),
                        __lr_level,
                        $fmt,
                        __lr_table,
                        (__lr_a0 __lr_a1 __lr_a2 __lr_a3 __lr_a4 __lr_a5 __lr_a6 __lr_a7 __lr_a8
                            __lr_a9 __lr_a10 __lr_a11),
                        ()
                        $(, $arg)*
                    )
                },
            );
        }
        $crate::__log_fatal!(__lr_level, __lr_sink);
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_fatal {
    ($level:ident, $sink:ident) => {
        if $level == $crate::Level::Fatal {
            $sink.sync();
            ::std::process::abort();
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_bind {
    ($mode:tt, $level:ident, $fmt:literal, $table:ident, ($id:ident $($pool:ident)*),
        ($($done:ident)*), $arg:expr $(, $rest:expr)*) => {{
        let $id = $crate::record::Wrap($arg).shelve(&mut *$table);
        $crate::__log_bind!($mode, $level, $fmt, $table, ($($pool)*), ($($done)* $id)
            $(, $rest)*)
    }};
    ((@ctx), $level:ident, $fmt:literal, $table:ident, ($($pool:ident)*), ($($done:ident)*)) => {
        move |__lr_ctx: &mut $crate::record::DispatchCtx<'_>, __lr_base: *const u8| {
            __lr_ctx.print($level, |__lr_mbuf, __lr_style, __lr_ts, __lr_name| {
                #[allow(unused_imports)]
                use ::core::fmt::Write as _;
                ::core::write!(
                    __lr_mbuf,
                    ::core::concat!(
                        "{}{} {} ",
                        ::core::file!(),
                        ":",
                        ::core::line!(),
                        ": ",
                        $fmt,
                        "\n"
                    ),
                    __lr_style,
                    __lr_ts,
                    __lr_name
                    $(, $crate::record::Resolve::resolve(&$done, __lr_base))*
                )
            })
        }
    };
    ((@custom $tsid:ident), $level:ident, $fmt:literal, $table:ident, ($($pool:ident)*),
        ($($done:ident)*)) => {
        move |__lr_ctx: &mut $crate::record::DispatchCtx<'_>, __lr_base: *const u8| {
            __lr_ctx.print($level, |__lr_mbuf, __lr_style, _, __lr_name| {
                #[allow(unused_imports)]
                use ::core::fmt::Write as _;
                ::core::write!(
                    __lr_mbuf,
                    ::core::concat!(
                        "{}{} {} ",
                        ::core::file!(),
                        ":",
                        ::core::line!(),
                        ": ",
                        $fmt,
                        "\n"
                    ),
                    __lr_style,
                    $crate::record::Resolve::resolve(&$tsid, __lr_base),
                    __lr_name
                    $(, $crate::record::Resolve::resolve(&$done, __lr_base))*
                )
            })
        }
    };
}
