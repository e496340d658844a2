//! Single-writer append-only log for per-connection transfer statistics.
//!
//! Mirrors the contract of the original C `log_open`/`log_msg`/`log_flush`/
//! `log_close`: one file, opened truncating, appended to by possibly many
//! callers, with a fatal-signal path that can flush and close without
//! allocating or taking a lock.

use std::{
    io,
    os::unix::ffi::OsStrExt,
    path::Path,
    sync::atomic::{AtomicI32, Ordering},
};

/// Raw fd of the currently open log, or `-1` if none.
///
/// A signal handler can't capture `self`, so the fd is mirrored here for
/// [`emergency_flush_and_close`] to reach without any lock or allocation.
static LOG_FD: AtomicI32 = AtomicI32::new(-1);

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to open log file: {0}")]
    Open(#[source] io::Error),
    #[error("failed to write log line: {0}")]
    Write(#[source] io::Error),
    #[error("fsync failed: {0}")]
    Flush(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, LogError>;

/// A truncating, append-only log file.
///
/// The original used POSIX AIO (`aio_write`) and spun on `aio_error` until
/// the kernel reported completion. A regular file's `write(2)` already only
/// returns once the kernel has accepted the bytes, so a direct `write` loop
/// gives the same "returns only after completion" contract without the AIO
/// machinery.
pub struct AppendLog {
    fd: i32,
}

impl AppendLog {
    /// Opens `path` for append, creating it if necessary and truncating any
    /// existing contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let c_path =
            std::ffi::CString::new(path.as_ref().as_os_str().as_bytes()).map_err(|_| {
                LogError::Open(io::Error::new(io::ErrorKind::InvalidInput, "nul in path"))
            })?;

        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND | libc::O_NONBLOCK,
                0o644,
            )
        };
        if fd < 0 {
            return Err(LogError::Open(io::Error::last_os_error()));
        }

        LOG_FD.store(fd, Ordering::Release);
        tracing::debug!(path = %path.as_ref().display(), fd, "log opened");
        Ok(Self { fd })
    }

    /// Appends `line` to the log. Blocks (busy-retrying on `EAGAIN`) until
    /// every byte has been accepted by the kernel or a hard error occurs.
    ///
    /// Concurrent callers are serialized by the kernel's `O_APPEND`
    /// semantics: each `write` is atomic with respect to other writers on
    /// the same open file description, so lines are never interleaved.
    pub fn write_line(&self, line: &str) -> Result<()> {
        let bytes = line.as_bytes();
        let mut written = 0;
        while written < bytes.len() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    bytes[written..].as_ptr().cast(),
                    bytes.len() - written,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                    _ => return Err(LogError::Write(err)),
                }
            }
            written += n as usize;
        }
        Ok(())
    }

    /// Durably syncs the log file to disk.
    pub fn flush(&self) -> Result<()> {
        let r = unsafe { libc::fsync(self.fd) };
        if r < 0 {
            return Err(LogError::Flush(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Closes the log, releasing the descriptor.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            // Only clear the global mirror if it still points at this fd —
            // another `AppendLog` may have opened and become the current
            // one since this instance was created.
            let _ = LOG_FD.compare_exchange(
                self.fd,
                -1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            self.fd = -1;
        }
    }
}

impl Drop for AppendLog {
    fn drop(&mut self) {
        self.close_inner();
    }
}

/// Flushes and closes whatever log is currently open, using only
/// async-signal-safe syscalls (`fsync`, `close`) and no allocation.
///
/// Intended to be called from the fatal-signal handler installed by
/// `echo-core::shutdown`; see spec.md §9's open question about
/// async-signal-safety. Idempotent: a second call is a no-op.
pub fn emergency_flush_and_close() {
    let fd = LOG_FD.swap(-1, Ordering::AcqRel);
    if fd >= 0 {
        unsafe {
            libc::fsync(fd);
            libc::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn open_write_flush_close_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfers.txt");

        let log = AppendLog::open(&path).unwrap();
        log.write_line("100,200,127.0.0.1:9999\n").unwrap();
        log.write_line("50,75,127.0.0.1:8888\n").unwrap();
        log.flush().unwrap();
        log.close();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "100,200,127.0.0.1:9999\n50,75,127.0.0.1:8888\n");
    }

    #[test]
    fn open_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfers.txt");
        fs::write(&path, "stale contents\n").unwrap();

        let log = AppendLog::open(&path).unwrap();
        log.write_line("fresh\n").unwrap();
        log.close();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn emergency_flush_and_close_is_idempotent_noop_without_open_log() {
        emergency_flush_and_close();
        emergency_flush_and_close();
    }
}
