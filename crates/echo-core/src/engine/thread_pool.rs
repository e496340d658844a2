//! Thread-per-connection pool engine.
//!
//! Grounded on `original_source/src/server/thread_server.c`: a fixed pool of
//! worker threads, each parked on its own busy flag. The accept loop scans
//! the pool round-robin for a free slot and hands off the connection;
//! blocking I/O is fine here since each worker thread is dedicated to
//! exactly one connection at a time.

use std::{
    cell::UnsafeCell,
    io,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use echo_wire::{decode_len, recv_all_or_would_block, send_all_or_would_block, HEADER_SIZE};

use crate::{
    acceptor::{AcceptOutcome, Acceptor},
    client::ClientHandle,
    engine::Engine,
    shutdown,
    stats::ServerStats,
};

/// Matches `WORKER_POOL_SIZE` in the original.
const WORKER_POOL_SIZE: usize = 200;

struct WorkerSlot {
    /// `true` once a client has been placed in `client` and not yet fully
    /// serviced. The accept thread only ever writes `client` while this is
    /// `false`; the owning worker only ever reads it while this is `true`.
    /// Acquire/release on this flag is what makes the handoff safe.
    busy: AtomicBool,
    client: UnsafeCell<Option<ClientHandle>>,
}

unsafe impl Sync for WorkerSlot {}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            client: UnsafeCell::new(None),
        }
    }
}

pub struct ThreadPoolEngine {
    stats: &'static ServerStats,
    log: &'static echo_log::AppendLog,
    slots: &'static [WorkerSlot],
}

impl ThreadPoolEngine {
    pub fn new(stats: &'static ServerStats, log: &'static echo_log::AppendLog) -> Self {
        let slots: Box<[WorkerSlot]> = (0..WORKER_POOL_SIZE).map(|_| WorkerSlot::new()).collect();
        let slots: &'static [WorkerSlot] = Box::leak(slots);
        for slot in slots {
            spawn_worker(slot, stats, log);
        }
        Self { stats, log, slots }
    }

    fn dispatch(&self, client: ClientHandle) {
        for slot in self.slots {
            if !slot.busy.load(Ordering::Acquire) {
                unsafe {
                    *slot.client.get() = Some(client);
                }
                slot.busy.store(true, Ordering::Release);
                return;
            }
        }
        tracing::warn!(
            pool_size = WORKER_POOL_SIZE,
            "worker pool exhausted, spawning overflow thread"
        );
        let stats = self.stats;
        let log = self.log;
        thread::spawn(move || handle_connection_sync(client, stats, log));
    }
}

fn spawn_worker(slot: &'static WorkerSlot, stats: &'static ServerStats, log: &'static echo_log::AppendLog) {
    thread::spawn(move || loop {
        if slot.busy.load(Ordering::Acquire) {
            let client = unsafe { (*slot.client.get()).take() }
                .expect("slot marked busy without a client installed");
            handle_connection_sync(client, stats, log);
            slot.busy.store(false, Ordering::Release);
        } else if shutdown::is_done() {
            return;
        } else {
            std::hint::spin_loop();
        }
    });
}

fn handle_connection_sync(client: ClientHandle, stats: &ServerStats, log: &echo_log::AppendLog) {
    if let Err(e) = client.set_nodelay() {
        tracing::warn!(peer = %client.peer, error = %e, "set_nodelay failed");
    }
    let ClientHandle { mut stream, peer } = client;
    let start = Instant::now();
    let mut transferred: u64 = 0;
    let mut payload = Vec::new();

    let result: echo_wire::Result<()> = (|| {
        loop {
            let mut header = [0_u8; HEADER_SIZE];
            let (n, closed) = recv_all_or_would_block(&mut stream, &mut header)?;
            transferred += n as u64;
            if closed || n < HEADER_SIZE {
                return Ok(());
            }
            let msg_len = decode_len(header) as usize;
            if msg_len == 0 {
                return Ok(());
            }
            if payload.len() < msg_len {
                payload.resize(msg_len, 0);
            }
            let (n, closed) = recv_all_or_would_block(&mut stream, &mut payload[..msg_len])?;
            transferred += n as u64;
            if closed || n < msg_len {
                return Ok(());
            }
            let mut sent = 0;
            while sent < msg_len {
                sent += send_all_or_would_block(&mut stream, &payload[sent..msg_len])?;
            }
            transferred += msg_len as u64;
        }
    })();

    if let Err(e) = result {
        tracing::warn!(peer = %peer, error = %e, "connection ended with an I/O error");
    }

    let elapsed_us = start.elapsed().as_micros() as u64;
    stats.record_disconnect();
    if let Err(e) = log.write_line(&format!("{transferred},{elapsed_us},{peer}\n")) {
        tracing::warn!(error = %e, "failed to write transfer log line");
    }
}

impl Engine for ThreadPoolEngine {
    fn start(&mut self, acceptor: Acceptor) -> Result<bool, io::Error> {
        loop {
            if shutdown::is_done() {
                break;
            }
            match acceptor.accept_one() {
                Ok(AcceptOutcome::Accepted(client)) => {
                    self.stats.record_accept();
                    self.dispatch(client);
                }
                Ok(AcceptOutcome::WouldBlock) => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::error!(error = %e, "fatal accept error, stopping");
                    shutdown::set_done();
                    break;
                }
            }
        }
        acceptor.cleanup();
        Ok(true)
    }

    fn add_client(&mut self, client: ClientHandle) -> Result<(), io::Error> {
        self.stats.record_accept();
        self.dispatch(client);
        Ok(())
    }

    fn cleanup(&mut self) {
        tracing::info!("thread pool engine shutting down");
    }

    fn stats(&self) -> &ServerStats {
        self.stats
    }
}
