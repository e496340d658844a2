//! Comparative echo server driver.
//!
//! Grounded on `original_source/src/server/main.c`: parse the CLI, raise the
//! file descriptor limit, open the transfer log, bind the listener, install
//! signal handlers, then hand everything to whichever engine `-s` picked.

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    str::FromStr,
};

use clap::{Parser, ValueEnum};
use echo_core::{
    engine::{epoll_engine::EpollEngine, select_engine::SelectEngine, thread_pool::ThreadPoolEngine},
    Acceptor, Engine, ServerStats,
};
use echo_log::AppendLog;

/// Matches `DEFAULT_PORT` in the original.
const DEFAULT_PORT: u16 = 8005;
/// Matches the `setrlimit(RLIMIT_NOFILE, ...)` call in the original's `main`.
const MAX_OPEN_FILES: u64 = 131_072;
const DEFAULT_LOG_PATH: &str = "transfers.txt";

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineKind {
    Thread,
    Select,
    Epoll,
}

#[derive(Parser, Debug)]
#[command(name = "echo-server", about = "Comparative length-prefixed echo server")]
struct Cli {
    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Which connection-handling engine to run.
    #[arg(short = 's', long, value_enum, default_value = "epoll")]
    server: EngineKind,

    /// Path to the append-only transfer log.
    #[arg(short, long, default_value = DEFAULT_LOG_PATH)]
    log: String,
}

fn raise_fd_limit() {
    let limit = libc::rlimit {
        rlim_cur: MAX_OPEN_FILES,
        rlim_max: MAX_OPEN_FILES,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        tracing::warn!(
            error = %std::io::Error::last_os_error(),
            "failed to raise RLIMIT_NOFILE, continuing with the default"
        );
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    raise_fd_limit();

    let stats: &'static ServerStats = Box::leak(Box::new(ServerStats::new()));
    let log: &'static AppendLog = match AppendLog::open(&cli.log) {
        Ok(log) => Box::leak(Box::new(log)),
        Err(e) => {
            eprintln!("failed to open transfer log {}: {e}", cli.log);
            std::process::exit(1);
        }
    };

    echo_core::shutdown::install_signal_handlers(stats);

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, cli.port);
    let acceptor = match Acceptor::bind(addr) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    let (run_result, mut engine): (Result<bool, std::io::Error>, Box<dyn Engine>) = match cli.server {
        EngineKind::Thread => {
            let mut engine = ThreadPoolEngine::new(stats, log);
            let result = engine.start(acceptor);
            (result, Box::new(engine))
        }
        EngineKind::Select => {
            let mut engine = SelectEngine::new(stats, log);
            let result = engine.start(acceptor);
            (result, Box::new(engine))
        }
        EngineKind::Epoll => match EpollEngine::new(stats, log) {
            Ok(mut engine) => {
                let result = engine.start(acceptor);
                (result, Box::new(engine))
            }
            Err(e) => {
                eprintln!("failed to create epoll engine: {e}");
                std::process::exit(1);
            }
        },
    };

    // Force-close anything the engine's own drain didn't finish (slow,
    // stuck, or malicious peers) now that the main loop has exited.
    engine.cleanup();

    log.flush().ok();
    eprintln!(
        "Total served: {}; Max concurrent connections: {}",
        stats.total_served(),
        stats.max_concurrent()
    );

    if let Err(e) = run_result {
        tracing::error!(error = %e, "engine exited with an error");
        std::process::exit(1);
    }
}
