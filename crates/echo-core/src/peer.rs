//! Lightweight newtype over a connected client's address.

use std::{fmt, net::SocketAddr};

/// A client's address, as reported by `accept(2)`.
///
/// Only IPv4 peers are supported; the acceptor refuses IPv6 sockets, matching
/// the CSV log format's `ip:port` column (§6 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer(pub SocketAddr);

impl Peer {
    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for Peer {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}
