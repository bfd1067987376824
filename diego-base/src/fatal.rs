// Storage and invariant failures (WAL mismatch, chunk pair missing, index
// size not a multiple of 8, a record too large, an fsync error) must never
// become a silent `Result::Err` that a caller could shrug off. They log
// then abort the process.

/// Log `msg` at error level and abort the process. Never returns.
#[track_caller]
pub fn fatal(msg: impl std::fmt::Display) -> ! {
    tracing::error!(target: "diego", "{}", msg);
    std::process::abort()
}

/// Abort with a formatted message if `cond` is false.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal(format!($($arg)+));
        }
    };
}
