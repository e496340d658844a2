//! Shared connection-handling machinery for the echo server: the acceptor,
//! client bookkeeping, shutdown signal wiring, server-wide stats, a
//! lock-free hand-off queue, and the three connection-handling engines
//! (thread pool, level-triggered select, edge-triggered epoll).

pub mod acceptor;
pub mod client;
pub mod engine;
pub mod peer;
pub mod ring;
pub mod shutdown;
pub mod state;
pub mod stats;

pub use acceptor::{AcceptError, AcceptOutcome, Acceptor};
pub use client::ClientHandle;
pub use engine::Engine;
pub use peer::Peer;
pub use stats::ServerStats;
