//! Edge-triggered engine built on `mio`'s `epoll` backend.
//!
//! Grounded on `original_source/src/server/epoll_server.c` for the overall
//! shape (edge-triggered registration, drain-until-`WouldBlock` per
//! notification) and on
//! `examples/gattaca-com-flux/crates/flux-network/src/tcp/connector.rs` for
//! the idiomatic Rust version of that shape: a `mio::Poll` with a
//! `Token`-indexed table instead of raw `epoll_ctl`/`epoll_wait` calls.

use std::{io, net::SocketAddr, os::fd::AsRawFd, time::Duration};

use echo_log::AppendLog;
use mio::{Events, Interest, Token};

use crate::{
    acceptor::Acceptor,
    client::ClientHandle,
    engine::{Engine, MAX_CONNECTIONS},
    peer::Peer,
    shutdown,
    state::{RequestState, StepOutcome},
    stats::ServerStats,
};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 1024;
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

struct Connection {
    stream: mio::net::TcpStream,
    state: RequestState,
}

pub struct EpollEngine {
    stats: &'static ServerStats,
    log: &'static AppendLog,
    poll: mio::Poll,
    connections: Vec<Option<Connection>>,
}

impl EpollEngine {
    pub fn new(stats: &'static ServerStats, log: &'static AppendLog) -> io::Result<Self> {
        Ok(Self {
            stats,
            log,
            poll: mio::Poll::new()?,
            connections: (0..MAX_CONNECTIONS).map(|_| None).collect(),
        })
    }

    fn admit(&mut self, mut stream: mio::net::TcpStream, peer: Peer) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(peer = %peer, error = %e, "set_nodelay failed");
        }
        let fd = stream.as_raw_fd() as usize;
        if fd >= MAX_CONNECTIONS {
            tracing::warn!(fd, "descriptor beyond tracked range, dropping connection");
            return;
        }
        if let Err(e) =
            self.poll
                .registry()
                .register(&mut stream, Token(fd), Interest::READABLE)
        {
            tracing::warn!(peer = %peer, error = %e, "failed to register connection with epoll");
            return;
        }
        self.stats.record_accept();
        self.connections[fd] = Some(Connection {
            stream,
            state: RequestState::new(peer),
        });
    }

    /// Unbounded, matching `epoll_server.c`: it defines `ACCEPT_PER_ITER`
    /// but its accept loop is a plain `while(1)` that ignores it, draining
    /// every pending connection in one go.
    fn drain_accept(&mut self, listener: &mio::net::TcpListener) -> io::Result<()> {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => match addr {
                    SocketAddr::V4(_) => self.admit(stream, Peer::from(addr)),
                    SocketAddr::V6(_) => {
                        tracing::warn!(%addr, "rejecting non-IPv4 peer");
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Edge-triggered means one notification can hide several frames' worth
    /// of readiness; drive the connection until it reports `WouldBlock`.
    fn service(&mut self, fd: usize) {
        let Some(conn) = self.connections[fd].as_mut() else {
            return;
        };
        match conn.state.drive(&mut conn.stream) {
            Ok(StepOutcome::WouldBlock) => {}
            Ok(StepOutcome::Complete) | Ok(StepOutcome::Disconnected) => self.retire(fd),
            Err(e) => {
                tracing::warn!(fd, error = %e, "connection I/O error");
                self.retire(fd);
            }
        }
    }

    fn retire(&mut self, fd: usize) {
        let Some(mut conn) = self.connections[fd].take() else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut conn.stream);
        self.stats.record_disconnect();
        if let Err(e) = self.log.write_line(&format!(
            "{},{},{}\n",
            conn.state.transferred, conn.state.transfer_time_us, conn.state.peer
        )) {
            tracing::warn!(error = %e, "failed to write transfer log line");
        }
    }
}

impl Engine for EpollEngine {
    fn start(&mut self, acceptor: Acceptor) -> Result<bool, io::Error> {
        let mut listener = mio::net::TcpListener::from_std(acceptor.into_std());
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            if shutdown::is_done() {
                break;
            }

            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(error = %e, "epoll wait failed, stopping");
                shutdown::set_done();
                continue;
            }

            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    if let Err(e) = self.drain_accept(&listener) {
                        tracing::error!(error = %e, "fatal accept error, stopping");
                        shutdown::set_done();
                    }
                } else {
                    self.service(event.token().0);
                }
            }
        }

        let _ = self.poll.registry().deregister(&mut listener);
        unsafe {
            libc::shutdown(listener.as_raw_fd(), libc::SHUT_WR);
        }
        drop(listener);
        Ok(true)
    }

    fn add_client(&mut self, client: ClientHandle) -> Result<(), io::Error> {
        let ClientHandle { stream, peer } = client;
        stream.set_nonblocking(true)?;
        self.admit(mio::net::TcpStream::from_std(stream), peer);
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
