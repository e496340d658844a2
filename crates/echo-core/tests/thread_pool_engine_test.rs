//! End-to-end exercise of the thread-pool engine: several clients connect
//! concurrently (well under the 200-slot pool), each exchanges a couple of
//! frames, and the pool reports an accurate concurrent-connection peak.

use std::{
    io::{Read, Write},
    net::{SocketAddrV4, TcpStream},
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use echo_core::{engine::thread_pool::ThreadPoolEngine, shutdown, Acceptor, Engine, ServerStats};
use echo_log::AppendLog;
use echo_wire::{encode_len, HEADER_SIZE};

const CLIENT_COUNT: usize = 16;

#[test]
fn thread_pool_engine_serves_concurrent_clients() {
    let stats: &'static ServerStats = Box::leak(Box::new(ServerStats::new()));
    let dir = tempfile::tempdir().unwrap();
    let log: &'static AppendLog =
        Box::leak(Box::new(AppendLog::open(dir.path().join("transfers.txt")).unwrap()));

    let addr = SocketAddrV4::from_str("127.0.0.1:0").unwrap();
    let acceptor = Acceptor::bind(addr).unwrap();
    let bound = acceptor.listener().local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut engine = ThreadPoolEngine::new(stats, log);
        engine.start(acceptor).unwrap();
    });

    // Hold every connection open at once so the concurrent peak is visible,
    // then finish them all together.
    let mut clients: Vec<TcpStream> = (0..CLIENT_COUNT)
        .map(|i| {
            let mut client = TcpStream::connect(bound).unwrap();
            let payload = format!("client-{i}");
            client
                .write_all(&encode_len(payload.len() as u32))
                .unwrap();
            client.write_all(payload.as_bytes()).unwrap();

            let mut header = [0_u8; HEADER_SIZE];
            client.read_exact(&mut header).unwrap();
            let mut echoed = vec![0_u8; payload.len()];
            client.read_exact(&mut echoed).unwrap();
            assert_eq!(echoed, payload.as_bytes());
            client
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while stats.live() < CLIENT_COUNT && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stats.total_served(), CLIENT_COUNT);
    assert_eq!(stats.max_concurrent(), CLIENT_COUNT);

    for client in clients.iter_mut() {
        client.write_all(&encode_len(0)).unwrap();
    }
    drop(clients);

    let deadline = Instant::now() + Duration::from_secs(5);
    while stats.live() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stats.live(), 0);
    assert_eq!(
        stats.max_concurrent(),
        CLIENT_COUNT,
        "watermark must not drop once every client disconnects"
    );

    shutdown::set_done();
    server.join().unwrap();
}
