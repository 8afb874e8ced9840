use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rampart::accesslog::AccessLog;
use rampart::cache::ResponseCache;
use rampart::config::RateLimitConfig;
use rampart::http::connection::{Connection, ConnectionContext};
use rampart::http::handler::HandlerContext;
use rampart::limiter::RateLimiter;
use rampart::pool::BufferPool;
use rampart::server::registry::ConnectionRegistry;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn site() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>home</html>").unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    std::fs::write(dir.path().join("b.txt"), "bravo").unwrap();
    dir
}

/// Accept loop equivalent for tests: every connection gets the full state
/// machine, none of the process scaffolding.
async fn start_server(dir: &TempDir, keep_alive_timeout: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let ctx = Arc::new(ConnectionContext {
        handler: HandlerContext {
            root: dir.path().to_path_buf(),
            index: "index.html".to_string(),
            keep_alive_timeout: keep_alive_timeout.as_secs(),
            cache: Arc::new(ResponseCache::new(
                64,
                Duration::from_secs(3600),
                Instant::now(),
            )),
        },
        access_log: Arc::new(AccessLog::disabled()),
        requests: Arc::new(AtomicU64::new(0)),
        keep_alive_timeout,
    });
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), false));
    let pool = BufferPool::new();
    let registry = ConnectionRegistry::new();

    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let ip = peer.ip().to_string();
            let permit = limiter.admit(&ip, Instant::now()).unwrap();
            let buffer = pool.acquire().unwrap();
            let registration = registry.register();
            tokio::spawn(
                Connection::new(stream, ip, buffer, permit, registration, Arc::clone(&ctx)).run(),
            );
        }
    });

    addr
}

/// Reads one response: the head up to CRLFCRLF plus Content-Length body
/// bytes.
async fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed mid-head: {:?}", String::from_utf8_lossy(&raw));
        raw.push(byte[0]);
    }
    let head = String::from_utf8(raw).unwrap();

    let content_length = head
        .split("\r\n")
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case("Content-Length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    stream.read_exact(&mut body).await.unwrap();
    (head, body)
}

async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("connection was not closed")
        .unwrap();
    assert_eq!(n, 0, "expected connection close");
}

#[tokio::test]
async fn test_get_index_over_the_wire() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/html\r\n"));
    assert!(head.contains("Server: rampart\r\n"));
    assert!(head.contains("ETag: \""));
    assert_eq!(body, b"<html>home</html>");
}

#[tokio::test]
async fn test_keep_alive_serves_multiple_requests() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert_eq!(body, b"alpha");

    stream
        .write_all(b"GET /b.txt HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let (_, body) = read_response(&mut stream).await;
    assert_eq!(body, b"bravo");
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\nGET /b.txt HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await
        .unwrap();

    let (_, first) = read_response(&mut stream).await;
    let (_, second) = read_response(&mut stream).await;
    assert_eq!(first, b"alpha");
    assert_eq!(second, b"bravo");
}

#[tokio::test]
async fn test_conditional_revalidation_over_the_wire() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let (head, _) = read_response(&mut stream).await;
    let etag = head
        .split("\r\n")
        .find_map(|line| line.strip_prefix("ETag: "))
        .unwrap()
        .to_string();

    let revalidate = format!(
        "GET /index.html HTTP/1.1\r\nHost: x\r\nIf-None-Match: {}\r\n\r\n",
        etag
    );
    stream.write_all(revalidate.as_bytes()).await.unwrap();
    let (head, body) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 304 Not Modified\r\n"));
    assert!(head.contains(&format!("ETag: {}\r\n", etag)));
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_traversal_gets_403_and_close() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let (head, _) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_post_gets_501_and_close() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let (head, _) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"NONSENSE\r\n\r\n").await.unwrap();

    let (head, _) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_unsupported_version_gets_505() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/2.0\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let (head, _) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"));
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_oversized_request_gets_413() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Endless header stream with no terminating blank line.
    let filler = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n", "x".repeat(9000));
    stream.write_all(filler.as_bytes()).await.unwrap();

    let (head, _) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(1)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Say nothing; the idle timer should close us.
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_head_request_over_the_wire() {
    let dir = site();
    let addr = start_server(&dir, Duration::from_secs(60)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"HEAD /a.txt HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        assert!(stream.read(&mut byte).await.unwrap() > 0);
        raw.push(byte[0]);
    }
    let head = String::from_utf8(raw).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));

    // No body follows; the next bytes belong to the next response.
    stream
        .write_all(b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let (next_head, body) = read_response(&mut stream).await;
    assert!(next_head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"alpha");
}
