//! Level-triggered engine built on raw `select(2)`.
//!
//! Grounded on `original_source/src/server/select_server.c`, including its
//! `ext_fd_set` trick: a larger-than-`FD_SETSIZE` bitset cast to `fd_set*`
//! when handed to the kernel. `select(2)` itself has no 1024-descriptor
//! limit baked in — only glibc's `fd_set` macros do, by assuming a
//! fixed-size array — so allocating a bigger bitset and indexing it by hand
//! lifts the limit.

use std::{
    io::{self, ErrorKind},
    os::fd::{AsRawFd, RawFd},
};

use echo_log::AppendLog;

use crate::{
    acceptor::{AcceptOutcome, Acceptor},
    client::ClientHandle,
    engine::{Engine, MAX_CONNECTIONS},
    shutdown,
    state::{RequestState, StepOutcome},
    stats::ServerStats,
};

/// Matches `ACCEPT_PER_ITER` in `select_server.c`.
const ACCEPT_PER_ITER: usize = 50;

const BITS_PER_WORD: usize = u64::BITS as usize;
const WORDS: usize = MAX_CONNECTIONS.div_ceil(BITS_PER_WORD);

/// A bitset sized for up to [`MAX_CONNECTIONS`] descriptors, laid out the
/// way glibc's `fd_set` is (an array of machine words) so it can be handed
/// to `select(2)` directly in place of the libc-provided, much smaller one.
#[repr(C)]
struct ExtFdSet {
    words: [u64; WORDS],
}

impl ExtFdSet {
    fn empty() -> Self {
        Self { words: [0; WORDS] }
    }

    fn set(&mut self, fd: RawFd) {
        let fd = fd as usize;
        self.words[fd / BITS_PER_WORD] |= 1 << (fd % BITS_PER_WORD);
    }

    fn is_set(&self, fd: RawFd) -> bool {
        let fd = fd as usize;
        (self.words[fd / BITS_PER_WORD] >> (fd % BITS_PER_WORD)) & 1 != 0
    }

    fn as_select_ptr(&mut self) -> *mut libc::fd_set {
        std::ptr::addr_of_mut!(self.words).cast()
    }
}

struct Connection {
    stream: std::net::TcpStream,
    state: RequestState,
}

pub struct SelectEngine {
    stats: &'static ServerStats,
    log: &'static AppendLog,
    connections: Vec<Option<Connection>>,
}

impl SelectEngine {
    pub fn new(stats: &'static ServerStats, log: &'static AppendLog) -> Self {
        Self {
            stats,
            log,
            connections: (0..MAX_CONNECTIONS).map(|_| None).collect(),
        }
    }

    /// Bounded the same way `select_server.c`'s `ACCEPT_PER_ITER` bounds its
    /// accept loop, so a burst of incoming connections can't starve
    /// already-open connections of service within one readiness round.
    fn accept_ready(&mut self, acceptor: &Acceptor) -> io::Result<()> {
        for _ in 0..ACCEPT_PER_ITER {
            match acceptor.accept_one() {
                Ok(AcceptOutcome::Accepted(client)) => self.admit(client),
                Ok(AcceptOutcome::WouldBlock) => return Ok(()),
                Err(e) => return Err(io_error(e)),
            }
        }
        Ok(())
    }

    fn admit(&mut self, client: ClientHandle) {
        let ClientHandle { stream, peer } = client;
        if let Err(e) = stream.set_nonblocking(true) {
            tracing::warn!(peer = %peer, error = %e, "failed to set client non-blocking");
            return;
        }
        let fd = stream.as_raw_fd() as usize;
        if fd >= MAX_CONNECTIONS {
            tracing::warn!(fd, "descriptor beyond tracked range, dropping connection");
            return;
        }
        self.stats.record_accept();
        self.connections[fd] = Some(Connection {
            stream,
            state: RequestState::new(peer),
        });
    }

    fn service(&mut self, fd: usize) {
        let Some(conn) = self.connections[fd].as_mut() else {
            return;
        };
        match conn.state.drive(&mut conn.stream) {
            Ok(StepOutcome::WouldBlock) => {}
            Ok(StepOutcome::Complete) | Ok(StepOutcome::Disconnected) => {
                self.retire(fd);
            }
            Err(e) => {
                tracing::warn!(fd, error = %e, "connection I/O error");
                self.retire(fd);
            }
        }
    }

    fn retire(&mut self, fd: usize) {
        let Some(conn) = self.connections[fd].take() else {
            return;
        };
        self.stats.record_disconnect();
        if let Err(e) = self.log.write_line(&format!(
            "{},{},{}\n",
            conn.state.transferred, conn.state.transfer_time_us, conn.state.peer
        )) {
            tracing::warn!(error = %e, "failed to write transfer log line");
        }
    }
}

fn io_error(e: crate::acceptor::AcceptError) -> io::Error {
    io::Error::new(ErrorKind::Other, e)
}

impl Engine for SelectEngine {
    fn start(&mut self, acceptor: Acceptor) -> Result<bool, io::Error> {
        let listen_fd = acceptor.raw_fd();
        if listen_fd as usize >= MAX_CONNECTIONS {
            acceptor.cleanup();
            return Err(io::Error::new(
                ErrorKind::Other,
                format!("listener fd {listen_fd} exceeds tracked range {MAX_CONNECTIONS}"),
            ));
        }

        loop {
            if shutdown::is_done() {
                break;
            }

            let mut read_set = ExtFdSet::empty();
            read_set.set(listen_fd);
            let mut max_fd = listen_fd;
            for (fd, conn) in self.connections.iter().enumerate() {
                if conn.is_some() {
                    read_set.set(fd as RawFd);
                    max_fd = max_fd.max(fd as RawFd);
                }
            }

            let mut timeout = libc::timeval {
                tv_sec: 1,
                tv_usec: 0,
            };
            let rc = unsafe {
                libc::select(
                    max_fd + 1,
                    read_set.as_select_ptr(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    &mut timeout,
                )
            };

            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(error = %err, "select failed, stopping");
                shutdown::set_done();
                continue;
            }
            if rc == 0 {
                continue;
            }

            if read_set.is_set(listen_fd) {
                if let Err(e) = self.accept_ready(&acceptor) {
                    tracing::error!(error = %e, "fatal accept error, stopping");
                    shutdown::set_done();
                }
            }
            for fd in 0..MAX_CONNECTIONS {
                if fd as RawFd != listen_fd && read_set.is_set(fd as RawFd) {
                    self.service(fd);
                }
            }
        }

        acceptor.cleanup();
        Ok(true)
    }

    fn add_client(&mut self, client: ClientHandle) -> Result<(), io::Error> {
        self.admit(client);
        Ok(())
    }

    fn cleanup(&mut self) {
        for fd in 0..self.connections.len() {
            self.retire(fd);
        }
    }

    fn stats(&self) -> &ServerStats {
        self.stats
    }
}

