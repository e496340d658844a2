//! End-to-end exercise of the edge-triggered (`mio`/epoll) engine across two
//! sequential clients, checking that `total_served` and `max_concurrent`
//! behave as documented: the former keeps growing, the latter reflects the
//! peak of live connections rather than the cumulative count.

use std::{
    io::{Read, Write},
    net::{SocketAddrV4, TcpStream},
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use echo_core::{engine::epoll_engine::EpollEngine, shutdown, Acceptor, Engine, ServerStats};
use echo_log::AppendLog;
use echo_wire::{encode_len, HEADER_SIZE};

fn round_trip_one_client(bound: std::net::SocketAddr) {
    let mut client = TcpStream::connect(bound).unwrap();
    client.write_all(&encode_len(3)).unwrap();
    client.write_all(b"abc").unwrap();

    let mut header = [0_u8; HEADER_SIZE];
    client.read_exact(&mut header).unwrap();
    let mut echoed = [0_u8; 3];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"abc");

    client.write_all(&encode_len(0)).unwrap();
}

#[test]
fn epoll_engine_serves_sequential_clients_and_shuts_down() {
    let stats: &'static ServerStats = Box::leak(Box::new(ServerStats::new()));
    let dir = tempfile::tempdir().unwrap();
    let log: &'static AppendLog =
        Box::leak(Box::new(AppendLog::open(dir.path().join("transfers.txt")).unwrap()));

    let addr = SocketAddrV4::from_str("127.0.0.1:0").unwrap();
    let acceptor = Acceptor::bind(addr).unwrap();
    let bound = acceptor.listener().local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut engine = EpollEngine::new(stats, log).unwrap();
        engine.start(acceptor).unwrap();
    });

    round_trip_one_client(bound);

    let deadline = Instant::now() + Duration::from_secs(5);
    while (stats.total_served() < 1 || stats.live() > 0) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stats.total_served(), 1);
    assert_eq!(stats.live(), 0, "first client should have fully disconnected");

    round_trip_one_client(bound);

    let deadline = Instant::now() + Duration::from_secs(5);
    while stats.total_served() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stats.total_served(), 2);
    assert_eq!(
        stats.max_concurrent(),
        1,
        "clients connected one at a time, so the live-connection peak is 1"
    );

    shutdown::set_done();
    server.join().unwrap();
}
