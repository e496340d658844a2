//! The three connection-handling engines and the trait the driver uses to
//! pick between them at runtime.
//!
//! Grounded on `original_source/include/assn2/server/server.h`'s `server_t`:
//! a hand-rolled function table of `start`/`add_client`/`cleanup` plus
//! counters, picked at startup by the `-s` flag in `src/server/main.c`. A
//! Rust trait object is the natural replacement for that function table.

pub mod epoll_engine;
pub mod select_engine;
pub mod thread_pool;

use std::io;

use crate::{acceptor::Acceptor, client::ClientHandle, stats::ServerStats};

/// Upper bound on simultaneously tracked connections for the select and
/// epoll engines' dense descriptor-indexed tables, matching the original's
/// `EXT_FD_SETSIZE` / `NUM_EPOLL_EVENTS` sizing philosophy (much larger than
/// the historical 1024-descriptor `FD_SETSIZE`).
pub const MAX_CONNECTIONS: usize = 65536;

pub trait Engine {
    /// Runs the engine to completion (until `shutdown::is_done()` and every
    /// connection has drained), taking ownership of the listening socket.
    ///
    /// Every engine in this crate accepts connections as part of its own
    /// readiness loop and so always returns `Ok(true)`; the return value is
    /// kept so a future engine that instead wants the driver to forward
    /// accepted clients via `add_client` can opt out by returning `false`.
    fn start(&mut self, acceptor: Acceptor) -> Result<bool, io::Error>;

    /// Hands the engine a connection it did not accept itself. Unused by the
    /// three engines here (see `start`'s doc comment) but part of the
    /// interface for parity with the original's function table.
    fn add_client(&mut self, client: ClientHandle) -> Result<(), io::Error>;

    fn cleanup(&mut self);

    fn stats(&self) -> &ServerStats;
}
