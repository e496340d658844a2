//! Shutdown flag and signal wiring.
//!
//! Grounded on `original_source/src/server/server.c`'s `serve()`, which
//! installs two signal classes by hand with `sigaction`: non-fatal signals
//! that just request a clean stop, and fatal signals that print the summary
//! line, flush the transfer log, and exit immediately. `signal_hook`'s
//! `low_level::register` is the idiomatic replacement for that raw
//! `sigaction` call — it exists specifically for signals (`SIGSEGV`,
//! `SIGBUS`, ...) that the crate's safe `Signals` iterator refuses to
//! register.

use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::stats::ServerStats;

static DONE: AtomicBool = AtomicBool::new(false);
static STATS: AtomicPtr<ServerStats> = AtomicPtr::new(std::ptr::null_mut());

/// Non-fatal signals: request a clean stop. `SIGSTOP` can't actually be
/// caught (the kernel refuses `sigaction` for it); registration is attempted
/// anyway for parity with the original and its failure is logged, not fatal.
const NON_FATAL: &[libc::c_int] = &[libc::SIGINT, libc::SIGQUIT, libc::SIGSTOP];

/// Fatal signals: best-effort summary + log flush, then `_exit`.
const FATAL: &[libc::c_int] = &[
    libc::SIGTERM,
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGABRT,
    libc::SIGTRAP,
    libc::SIGPIPE,
];

pub fn is_done() -> bool {
    DONE.load(Ordering::Acquire)
}

pub fn set_done() {
    DONE.store(true, Ordering::Release);
}

/// Installs both signal classes. `stats` must outlive the process; callers
/// pass a `'static` reference (typically a driver-owned `Box::leak` or a
/// `static`).
pub fn install_signal_handlers(stats: &'static ServerStats) {
    STATS.store(
        (stats as *const ServerStats).cast_mut(),
        Ordering::Release,
    );

    for &sig in NON_FATAL {
        if let Err(e) = unsafe { signal_hook::low_level::register(sig, non_fatal_handler) } {
            tracing::warn!(signal = sig, error = %e, "failed to install non-fatal signal handler");
        }
    }
    for &sig in FATAL {
        if let Err(e) = unsafe { signal_hook::low_level::register(sig, fatal_handler) } {
            tracing::warn!(signal = sig, error = %e, "failed to install fatal signal handler");
        }
    }
}

fn non_fatal_handler() {
    set_done();
}

/// Runs in signal context: only async-signal-safe operations are allowed
/// here (no allocation, no locks). Writes the summary directly to stderr
/// with a raw `write(2)` and defers the log flush to
/// `echo_log::emergency_flush_and_close`, which is equally restricted.
fn fatal_handler() {
    let stats_ptr = STATS.load(Ordering::Acquire);
    if let Some(stats) = unsafe { stats_ptr.as_ref() } {
        let mut buf = [0_u8; 96];
        let len = format_summary(&mut buf, stats.total_served(), stats.max_concurrent());
        unsafe {
            libc::write(2, buf.as_ptr().cast(), len);
        }
    }
    echo_log::emergency_flush_and_close();
    unsafe {
        libc::_exit(1);
    }
}

/// Formats `"Total served: {total}; Max concurrent connections: {peak}\n"`
/// into `buf` without allocating, returning the number of bytes written.
fn format_summary(buf: &mut [u8; 96], total: usize, peak: usize) -> usize {
    let mut pos = 0;
    pos += write_str(&mut buf[pos..], b"Total served: ");
    pos += write_usize(&mut buf[pos..], total);
    pos += write_str(&mut buf[pos..], b"; Max concurrent connections: ");
    pos += write_usize(&mut buf[pos..], peak);
    pos += write_str(&mut buf[pos..], b"\n");
    pos
}

fn write_str(buf: &mut [u8], s: &[u8]) -> usize {
    let n = s.len().min(buf.len());
    buf[..n].copy_from_slice(&s[..n]);
    n
}

fn write_usize(buf: &mut [u8], mut value: usize) -> usize {
    let mut digits = [0_u8; 20];
    let mut i = digits.len();
    loop {
        i -= 1;
        digits[i] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    write_str(buf, &digits[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_summary_matches_expected_text() {
        let mut buf = [0_u8; 96];
        let len = format_summary(&mut buf, 42, 7);
        assert_eq!(
            std::str::from_utf8(&buf[..len]).unwrap(),
            "Total served: 42; Max concurrent connections: 7\n"
        );
    }

    #[test]
    fn write_usize_handles_zero() {
        let mut buf = [0_u8; 8];
        let len = write_usize(&mut buf, 0);
        assert_eq!(&buf[..len], b"0");
    }

    #[test]
    fn set_done_is_observed_by_is_done() {
        set_done();
        assert!(is_done());
    }
}
