//! Contract assertions.
//!
//! Programming errors (destroying twice, using a null handle, passing a null
//! render pass, ...) are not part of the recoverable error channel. They go
//! through [`assertion!`](crate::assertion), which logs the failure at
//! [`log::Level::Error`], breaks into an attached debugger and panics in debug
//! builds. In release builds the failure is only logged.
//! [`debug_assertion!`](crate::debug_assertion) is compiled out of release
//! builds entirely.
use std::fmt;

/// Checks a contract. On failure the message is logged, an attached debugger
/// is interrupted and, in debug builds, the current thread panics.
#[macro_export]
macro_rules! assertion {
    ($cond:expr $(,)?) => {
        $crate::assertion!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::assert::assertion_failed(format_args!($($arg)+));
        }
    };
}

/// Same as [`assertion!`], but only evaluated in debug builds.
#[macro_export]
macro_rules! debug_assertion {
    ($($arg:tt)+) => {
        if cfg!(debug_assertions) {
            $crate::assertion!($($arg)+);
        }
    };
}

/// Failure path shared by [`assertion!`](crate::assertion) and
/// [`debug_assertion!`](crate::debug_assertion).
#[cold]
#[track_caller]
pub fn assertion_failed(message: fmt::Arguments) {
    log::error!("ASSERTION FAILED: {}", message);
    assertion_trap(message);
}

/// The non-logging half of [`assertion_failed`], for callers that already
/// reported `message` themselves: breaks into an attached debugger and, in
/// debug builds, panics.
#[cold]
#[track_caller]
pub fn assertion_trap(message: fmt::Arguments) {
    debugger_break();
    if cfg!(debug_assertions) {
        panic!("assertion failed: {}", message);
    }
}

/// Returns true if a tracer is attached to this process.
///
/// Only implemented on Linux, where the `TracerPid` line of
/// `/proc/self/status` is inspected once and cached.
pub fn is_debugger_present() -> bool {
    #[cfg(target_os = "linux")]
    {
        use std::sync::OnceLock;

        static PRESENT: OnceLock<bool> = OnceLock::new();
        *PRESENT.get_or_init(|| {
            std::fs::read_to_string("/proc/self/status")
                .ok()
                .and_then(|status| {
                    status
                        .lines()
                        .find_map(|line| line.strip_prefix("TracerPid:"))
                        .and_then(|pid| pid.trim().parse::<u32>().ok())
                })
                .map_or(false, |pid| pid != 0)
        })
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Interrupts an attached debugger. Does nothing when no debugger is present.
pub fn debugger_break() {
    if !is_debugger_present() {
        return;
    }

    #[cfg(unix)]
    unsafe {
        libc::raise(libc::SIGTRAP);
    }
}
