//! Listening socket setup and accept-loop helper.
//!
//! Grounded on `original_source/src/server/acceptor.c`: a raw socket built
//! by hand (not `TcpListener::bind`) so `SO_REUSEADDR` lands before `bind`,
//! matching the original exactly — std's `TcpListener::bind` on Unix does
//! not set `SO_REUSEADDR` for you.

use std::{
    io,
    mem::size_of,
    net::{SocketAddr, SocketAddrV4, TcpListener},
    os::fd::{AsRawFd, FromRawFd, RawFd},
};

use crate::{client::ClientHandle, peer::Peer};

/// Backlog passed to `listen(2)`, matching the original's constant.
const LISTEN_BACKLOG: i32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("only IPv4 addresses are supported")]
    UnsupportedFamily,
    #[error("acceptor setup failed: {0}")]
    Setup(#[source] io::Error),
    #[error("accept failed: {0}")]
    Fatal(#[source] io::Error),
}

pub enum AcceptOutcome {
    Accepted(ClientHandle),
    WouldBlock,
}

/// A non-blocking, `SO_REUSEADDR` listening socket.
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    pub fn bind(addr: SocketAddrV4) -> Result<Self, AcceptError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(AcceptError::Setup(io::Error::last_os_error()));
        }

        // Any error past this point must still close `fd`; wrap it in a
        // TcpListener immediately so its Drop does that for us on the early
        // returns below.
        let listener = unsafe { TcpListener::from_raw_fd(fd) };

        let reuse: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                std::ptr::addr_of!(reuse).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(AcceptError::Setup(io::Error::last_os_error()));
        }

        let sockaddr = sockaddr_in_from(addr);
        let rc = unsafe {
            libc::bind(
                fd,
                std::ptr::addr_of!(sockaddr).cast(),
                size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(AcceptError::Setup(io::Error::last_os_error()));
        }

        if unsafe { libc::listen(fd, LISTEN_BACKLOG) } < 0 {
            return Err(AcceptError::Setup(io::Error::last_os_error()));
        }

        listener.set_nonblocking(true).map_err(AcceptError::Setup)?;

        tracing::info!(addr = %addr, "listening");
        Ok(Self { listener })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    /// Hands back the inner, already non-blocking `SO_REUSEADDR` listener,
    /// consuming the acceptor without running its `cleanup` shutdown
    /// sequence. Used by engines (the epoll engine) that want to re-wrap the
    /// same socket in a different type rather than duplicate its descriptor.
    pub fn into_std(self) -> TcpListener {
        self.listener
    }

    /// Accepts one pending connection, if any is ready.
    pub fn accept_one(&self) -> Result<AcceptOutcome, AcceptError> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                let SocketAddr::V4(_) = addr else {
                    return Err(AcceptError::UnsupportedFamily);
                };
                Ok(AcceptOutcome::Accepted(ClientHandle::new(
                    stream,
                    Peer::from(addr),
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(AcceptOutcome::WouldBlock),
            Err(e) => Err(AcceptError::Fatal(e)),
        }
    }

    /// Drains every currently pending connection, handing each to `on_client`.
    pub fn drain_accept(
        &self,
        mut on_client: impl FnMut(ClientHandle),
    ) -> Result<(), AcceptError> {
        loop {
            match self.accept_one()? {
                AcceptOutcome::Accepted(client) => on_client(client),
                AcceptOutcome::WouldBlock => return Ok(()),
            }
        }
    }

    /// Shuts down the write half and closes the listening socket.
    pub fn cleanup(self) {
        unsafe {
            libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_WR);
        }
        drop(self.listener);
    }
}

fn sockaddr_in_from(addr: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
        #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
        sin_len: size_of::<libc::sockaddr_in>() as u8,
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpStream, str::FromStr};

    use super::*;

    #[test]
    fn bind_accept_reports_peer_address() {
        let addr = SocketAddrV4::from_str("127.0.0.1:0").unwrap();
        let acceptor = Acceptor::bind(addr).unwrap();
        let bound = acceptor.listener().local_addr().unwrap();

        let _client = TcpStream::connect(bound).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        match acceptor.accept_one().unwrap() {
            AcceptOutcome::Accepted(client) => {
                assert_eq!(client.peer.addr().ip().to_string(), "127.0.0.1");
            }
            AcceptOutcome::WouldBlock => panic!("expected a pending connection"),
        }
    }

    #[test]
    fn accept_one_would_block_when_nothing_pending() {
        let addr = SocketAddrV4::from_str("127.0.0.1:0").unwrap();
        let acceptor = Acceptor::bind(addr).unwrap();
        assert!(matches!(
            acceptor.accept_one().unwrap(),
            AcceptOutcome::WouldBlock
        ));
    }
}
