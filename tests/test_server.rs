use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use filedrop::config::Config;
use filedrop::handlers::{ListingTemplate, Service};
use filedrop::server::Server;
use filedrop::storage::DirStore;

fn start(dir: &std::path::Path) -> Server<DirStore> {
    start_with_timeout(dir, Config::default().timeout_seconds)
}

fn start_with_timeout(dir: &std::path::Path, timeout_seconds: u64) -> Server<DirStore> {
    let cfg = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        upload_dir: dir.to_path_buf(),
        timeout_seconds,
        ..Config::default()
    };
    let store = DirStore::new(&cfg.upload_dir).unwrap();
    Server::bind(&cfg, Service::new(store, ListingTemplate::default())).unwrap()
}

/// Reads one response: head up to the blank line, then Content-Length bytes.
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert_eq!(n, 1, "connection closed mid-head");
        raw.push(byte[0]);
    }
    let head = String::from_utf8(raw).unwrap();
    let len: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).unwrap();
    (head, body)
}

/// Drives the reactor on this thread until the client thread is done.
fn serve_until<T>(server: &mut Server<DirStore>, client: thread::JoinHandle<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !client.is_finished() {
        assert!(Instant::now() < deadline, "client did not finish in time");
        server.poll_once(Some(Duration::from_millis(10))).unwrap();
    }
    client.join().unwrap()
}

#[test]
fn upload_download_delete_over_one_connection() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = start(dir.path());
    let addr = server.local_addr().unwrap();

    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    let expected = content.clone();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut body = b"--XyZ\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"data.bin\"\r\n\r\n".to_vec();
        body.extend_from_slice(&content);
        body.extend_from_slice(b"\r\n--XyZ--\r\n");
        let mut request = format!(
            "POST /upload HTTP/1.1\r\nHost: test\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);

        // Dribble the request out so the server sees many partial reads.
        for piece in request.chunks(7919) {
            stream.write_all(piece).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        let (upload_head, _) = read_response(&mut stream);

        stream.write_all(b"GET /download/data.bin HTTP/1.1\r\n\r\n").unwrap();
        let (download_head, download_body) = read_response(&mut stream);

        stream.write_all(b"GET /delete/data.bin HTTP/1.1\r\n\r\n").unwrap();
        let (delete_head, _) = read_response(&mut stream);

        stream.write_all(b"GET /download/data.bin HTTP/1.1\r\n\r\n").unwrap();
        let (gone_head, _) = read_response(&mut stream);

        (upload_head, download_head, download_body, delete_head, gone_head)
    });

    let (upload_head, download_head, download_body, delete_head, gone_head) =
        serve_until(&mut server, client);

    assert!(upload_head.starts_with("HTTP/1.1 302"));
    assert!(upload_head.contains("Location: /\r\n"));

    assert!(download_head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(download_head.contains(&format!("Content-Length: {}\r\n", expected.len())));
    assert!(download_head.contains(&format!("Content-Range: 0-{}\r\n", expected.len() - 1)));
    assert_eq!(download_body, expected);

    assert!(delete_head.starts_with("HTTP/1.1 302"));
    assert!(gone_head.starts_with("HTTP/1.1 302"));
    assert!(!dir.path().join("data.bin").exists());
}

#[test]
fn listing_and_close() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();
    let mut server = start(dir.path());
    let addr = server.local_addr().unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();
        read_response(&mut stream)
    });

    let (head, body) = serve_until(&mut server, client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/html;charset=UTF-8\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("hello.txt"));

    // The client dropped its socket; the server notices and tears down.
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.connection_count() > 0 {
        assert!(Instant::now() < deadline, "connection was never torn down");
        server.poll_once(Some(Duration::from_millis(10))).unwrap();
    }
}

#[test]
fn many_clients_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = start(dir.path());
    let addr = server.local_addr().unwrap();

    let client = thread::spawn(move || {
        // A stalled half-request must not hold up the others.
        let mut stalled = TcpStream::connect(addr).unwrap();
        stalled.write_all(b"GET /downl").unwrap();

        let mut heads = Vec::new();
        for i in 0..5 {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            stream
                .write_all(format!("GET /nothing-{i} HTTP/1.1\r\n\r\n").as_bytes())
                .unwrap();
            heads.push(read_response(&mut stream).0);
        }
        drop(stalled);
        heads
    });

    let heads = serve_until(&mut server, client);
    assert_eq!(heads.len(), 5);
    assert!(heads.iter().all(|h| h.starts_with("HTTP/1.1 302")));
}

/// Polls until `count` connections are registered.
fn accept_until(server: &mut Server<DirStore>, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.connection_count() < count {
        assert!(Instant::now() < deadline, "connection was never accepted");
        server.poll_once(Some(Duration::from_millis(10))).unwrap();
    }
}

#[test]
fn idle_connection_is_swept() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = start_with_timeout(dir.path(), 1);
    let addr = server.local_addr().unwrap();

    let mut silent = TcpStream::connect(addr).unwrap();
    accept_until(&mut server, 1);
    let accepted = Instant::now();

    let deadline = accepted + Duration::from_secs(5);
    while server.connection_count() > 0 {
        assert!(Instant::now() < deadline, "idle connection was never swept");
        server.poll_once(Some(Duration::from_millis(50))).unwrap();
    }
    assert!(accepted.elapsed() >= Duration::from_millis(900));

    silent.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut byte = [0u8; 1];
    assert_eq!(silent.read(&mut byte).unwrap(), 0);
}

#[test]
fn teardown_twice_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = start(dir.path());
    let addr = server.local_addr().unwrap();

    let first = TcpStream::connect(addr).unwrap();
    accept_until(&mut server, 1);
    let fd = server.connection_fds()[0];

    server.teardown(fd);
    assert_eq!(server.connection_count(), 0);
    server.teardown(fd);
    assert_eq!(server.connection_count(), 0);
    assert!(server.connection_fds().is_empty());
    drop(first);

    // The server keeps serving new clients afterwards.
    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        read_response(&mut stream).0
    });
    let head = serve_until(&mut server, client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
}
