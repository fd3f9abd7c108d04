/// Logs `$fmt` at trace level, runs `$body`, then logs `$fmt` again
/// annotated with the elapsed time.
#[macro_export]
macro_rules! with_trace_logging {
    ($fmt:expr; $body:block) => {{
        $crate::trace!(concat!($fmt, " starting"));
        let __weave_log_start = ::std::time::Instant::now();
        let __weave_log_result = $body;
        $crate::trace!(concat!($fmt, " finished in {:?}"), __weave_log_start.elapsed());
        __weave_log_result
    }};
    ($fmt:expr, $($arg:expr),*; $body:block) => {{
        $crate::trace!(concat!($fmt, " starting"), $($arg),*);
        let __weave_log_start = ::std::time::Instant::now();
        let __weave_log_result = $body;
        $crate::trace!(
            concat!($fmt, " finished in {:?}"),
            $($arg,)*
            __weave_log_start.elapsed()
        );
        __weave_log_result
    }};
}

/// Same as [`with_trace_logging`] but at info level. Used for coarser,
/// user-visible timing such as a whole pool shutdown.
#[macro_export]
macro_rules! with_timing_info_logging {
    ($fmt:expr; $body:block) => {{
        $crate::info!(concat!($fmt, " starting"));
        let __weave_log_start = ::std::time::Instant::now();
        let __weave_log_result = $body;
        $crate::info!(concat!($fmt, " finished in {:?}"), __weave_log_start.elapsed());
        __weave_log_result
    }};
    ($fmt:expr, $($arg:expr),*; $body:block) => {{
        $crate::info!(concat!($fmt, " starting"), $($arg),*);
        let __weave_log_start = ::std::time::Instant::now();
        let __weave_log_result = $body;
        $crate::info!(
            concat!($fmt, " finished in {:?}"),
            $($arg,)*
            __weave_log_start.elapsed()
        );
        __weave_log_result
    }};
}
