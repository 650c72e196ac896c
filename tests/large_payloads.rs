use cinderkv::config::config_in;
use cinderkv::{DataStore, Dispatcher, DispatcherConfig, PersistenceManager};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Spawn the event loop on an ephemeral port and return its address plus a
/// shutdown flag, so each test gets an isolated in-process server instead
/// of assuming one is already running on a fixed port.
fn spawn_server() -> (std::net::SocketAddr, Arc<AtomicBool>) {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());
    std::mem::forget(dir);

    let persistence = PersistenceManager::new(cfg);
    persistence.start().unwrap();

    let listener = cinderkv::net::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    let store = DataStore::new();

    std::thread::spawn(move || {
        let _ = cinderkv::net::run_with_listener(listener, store, dispatcher, persistence, shutdown_clone);
    });

    // Give the loop a moment to start polling.
    std::thread::sleep(Duration::from_millis(50));
    (addr, shutdown)
}

fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(10))).unwrap();
    stream
}

fn drain_banner(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read banner");
    assert_eq!(&buf[..n], b"+OK\r\n");
}

fn read_bulk_string(reader: &mut BufReader<&TcpStream>) -> Vec<u8> {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read header");
    assert!(line.starts_with('$'), "expected bulk string, got: {line}");

    let len: usize = line[1..].trim().parse().expect("invalid length");
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).expect("read body");

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).expect("read trailing CRLF");
    data
}

fn roundtrip_large_value(size: usize, fill: u8) {
    let (addr, shutdown) = spawn_server();
    let mut stream = connect(addr);
    drain_banner(&mut stream);

    let value = vec![fill; size];
    let mut set_cmd = b"SET big ".to_vec();
    set_cmd.extend_from_slice(&value);
    set_cmd.extend_from_slice(b"\r\n");
    stream.write_all(&set_cmd).unwrap();

    let mut ok_buf = [0u8; 16];
    let n = stream.read(&mut ok_buf).unwrap();
    assert_eq!(&ok_buf[..n], b"+OK\r\n");

    stream.write_all(b"GET big\r\n").unwrap();
    let mut reader = BufReader::new(&stream);
    let received = read_bulk_string(&mut reader);
    assert_eq!(received.len(), size);
    assert_eq!(received[0], fill);
    assert_eq!(received[size - 1], fill);

    shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn roundtrips_100kb_value() {
    roundtrip_large_value(100 * 1024, b'x');
}

#[test]
fn roundtrips_1mb_value() {
    roundtrip_large_value(1024 * 1024, b'a');
}

#[test]
fn accept_time_banner_then_multiple_requests_on_one_connection() {
    let (addr, shutdown) = spawn_server();
    let mut stream = connect(addr);
    drain_banner(&mut stream);

    stream.write_all(b"PING\r\nSET k v\r\nGET k\r\n").unwrap();
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n+OK\r\n$1\r\nv\r\n");

    shutdown.store(true, Ordering::Relaxed);
}
