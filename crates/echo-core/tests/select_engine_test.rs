//! End-to-end exercise of the level-triggered (`select`) engine: a real
//! client connects over loopback, round-trips a frame, and sends the
//! terminator; the engine is then asked to shut down gracefully.

use std::{
    io::{Read, Write},
    net::{SocketAddrV4, TcpStream},
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use echo_core::{engine::select_engine::SelectEngine, shutdown, Acceptor, Engine, ServerStats};
use echo_log::AppendLog;
use echo_wire::{encode_len, HEADER_SIZE};

#[test]
fn select_engine_echoes_one_client_then_shuts_down() {
    let stats: &'static ServerStats = Box::leak(Box::new(ServerStats::new()));
    let dir = tempfile::tempdir().unwrap();
    let log: &'static AppendLog =
        Box::leak(Box::new(AppendLog::open(dir.path().join("transfers.txt")).unwrap()));

    let addr = SocketAddrV4::from_str("127.0.0.1:0").unwrap();
    let acceptor = Acceptor::bind(addr).unwrap();
    let bound = acceptor.listener().local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut engine = SelectEngine::new(stats, log);
        engine.start(acceptor).unwrap();
    });

    let mut client = TcpStream::connect(bound).unwrap();
    client.write_all(&encode_len(5)).unwrap();
    client.write_all(b"hello").unwrap();

    let mut header = [0_u8; HEADER_SIZE];
    client.read_exact(&mut header).unwrap();
    let mut echoed = [0_u8; 5];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"hello");

    client.write_all(&encode_len(0)).unwrap();
    drop(client);

    let deadline = Instant::now() + Duration::from_secs(5);
    while stats.total_served() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stats.total_served(), 1);
    assert_eq!(stats.max_concurrent(), 1);

    shutdown::set_done();
    server.join().unwrap();
}
