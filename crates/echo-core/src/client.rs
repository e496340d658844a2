//! An accepted, not-yet-classified connection.

use std::{io, net::TcpStream};

use crate::peer::Peer;

/// A freshly accepted socket paired with the peer address `accept(2)`
/// reported for it.
///
/// Deliberately carries no I/O mode of its own: the thread-pool engine wants
/// a blocking socket (the worker thread is dedicated to it), while the
/// select and epoll engines switch it to non-blocking as soon as they take
/// ownership. `accept(2)` always hands back a blocking socket regardless of
/// the listener's own mode, so no engine needs to undo anything the acceptor
/// did.
pub struct ClientHandle {
    pub stream: TcpStream,
    pub peer: Peer,
}

impl ClientHandle {
    pub fn new(stream: TcpStream, peer: Peer) -> Self {
        Self { stream, peer }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    /// Disables Nagle's algorithm. Every engine wants this: echoed frames
    /// are latency-sensitive round trips, not bulk transfer.
    pub fn set_nodelay(&self) -> io::Result<()> {
        self.stream.set_nodelay(true)
    }
}
