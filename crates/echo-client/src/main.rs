//! Load-generating client for the comparative echo server.
//!
//! Grounded on `original_source/src/client/main.c`: spawn a fleet of
//! threads, each opening its own connection and sending a capped number of
//! fixed-size random-payload frames before closing with a zero-length
//! terminator, then appending one CSV result line per thread to a shared log
//! file.

use std::{
    net::{SocketAddrV4, TcpStream},
    sync::Arc,
    thread,
    time::Instant,
};

use clap::Parser;
use echo_log::AppendLog;
use echo_wire::{encode_len, recv_all_or_would_block, send_all_or_would_block, HEADER_SIZE};
use rand::Rng;

const DEFAULT_IP: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8005;
const DEFAULT_MAX_MESSAGES: u32 = 1;
const DEFAULT_CLIENT_COUNT: u32 = 5000;
const DEFAULT_MSG_SIZE: usize = 1024;
const DEFAULT_RESULT_PATH: &str = "result.txt";

#[derive(Parser, Debug)]
#[command(name = "echo-client", about = "Load generator for echo-server")]
struct Cli {
    /// Server address to connect to.
    #[arg(short, long, default_value = DEFAULT_IP)]
    ip: String,

    /// Server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Frames each client connection sends before the terminator.
    #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_MESSAGES)]
    max: u32,

    /// Number of concurrent client connections (one thread each).
    #[arg(short = 'n', long, default_value_t = DEFAULT_CLIENT_COUNT)]
    clients: u32,

    /// Payload size in bytes for each frame.
    #[arg(short = 's', long, default_value_t = DEFAULT_MSG_SIZE)]
    msg_size: usize,

    /// Where to append each thread's result line.
    #[arg(short, long, default_value = DEFAULT_RESULT_PATH)]
    result: String,
}

struct ClientResult {
    requests_completed: u32,
    cumulative_time_us: u64,
    bytes_received: u64,
}

/// Matches the original's character set for `make_random_string`.
const PAYLOAD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| PAYLOAD_CHARSET[rng.random_range(0..PAYLOAD_CHARSET.len())])
        .collect()
}

fn run_one_client(addr: SocketAddrV4, max_messages: u32, msg_size: usize) -> ClientResult {
    let payload = random_payload(msg_size);
    let mut result = ClientResult {
        requests_completed: 0,
        cumulative_time_us: 0,
        bytes_received: 0,
    };

    let mut stream = match TcpStream::connect(addr) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%addr, error = %e, "failed to connect");
            return result;
        }
    };
    stream.set_nodelay(true).ok();

    for _ in 0..max_messages {
        let start = Instant::now();
        if send_all_or_would_block(&mut stream, &encode_len(msg_size as u32)).is_err() {
            break;
        }
        let mut sent = 0;
        let mut io_failed = false;
        while sent < msg_size {
            match send_all_or_would_block(&mut stream, &payload[sent..]) {
                Ok(0) => {
                    io_failed = true;
                    break;
                }
                Ok(n) => sent += n,
                Err(_) => {
                    io_failed = true;
                    break;
                }
            }
        }
        if io_failed {
            break;
        }

        let mut header = [0_u8; HEADER_SIZE];
        match recv_all_or_would_block(&mut stream, &mut header) {
            Ok((n, closed)) if n == HEADER_SIZE && !closed => {}
            _ => break,
        }

        let mut echoed = vec![0_u8; msg_size];
        let mut have = 0;
        let mut disconnected = false;
        while have < msg_size {
            match recv_all_or_would_block(&mut stream, &mut echoed[have..]) {
                Ok((n, closed)) => {
                    have += n;
                    if closed {
                        disconnected = true;
                        break;
                    }
                }
                Err(_) => {
                    disconnected = true;
                    break;
                }
            }
        }
        if disconnected || have < msg_size {
            break;
        }

        result.requests_completed += 1;
        result.cumulative_time_us += start.elapsed().as_micros() as u64;
        result.bytes_received += have as u64;
    }

    // Zero-length terminator frame, matching the wire protocol's end-of-session marker.
    let _ = send_all_or_would_block(&mut stream, &encode_len(0));

    result
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let addr: SocketAddrV4 = match format!("{}:{}", cli.ip, cli.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid address {}:{}: {e}", cli.ip, cli.port);
            std::process::exit(1);
        }
    };

    let result_log: Arc<AppendLog> = match AppendLog::open(&cli.result) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            eprintln!("failed to open result log {}: {e}", cli.result);
            std::process::exit(1);
        }
    };

    let handles: Vec<_> = (0..cli.clients)
        .map(|_| {
            let result_log = Arc::clone(&result_log);
            let max = cli.max;
            let msg_size = cli.msg_size;
            thread::spawn(move || {
                let result = run_one_client(addr, max, msg_size);
                let line = format!(
                    "{},{},{}\n",
                    result.requests_completed, result.cumulative_time_us, result.bytes_received
                );
                if let Err(e) = result_log.write_line(&line) {
                    tracing::warn!(error = %e, "failed to write result line");
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    result_log.flush().ok();
    eprintln!("{} client(s) finished", cli.clients);
}
