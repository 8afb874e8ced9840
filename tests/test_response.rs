use std::sync::Arc;
use std::time::Instant;

use rampart::cache::CacheEntry;
use rampart::compress::Encoding;
use rampart::http::response::{Body, Response, StatusCode};
use rampart::http::writer::{serialize_head, write_response, SERVER_NAME};

fn head_str(response: &Response) -> String {
    String::from_utf8(serialize_head(response)).unwrap()
}

#[test]
fn test_status_codes() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::NotModified.as_u16(), 304);
    assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::NotImplemented.as_u16(), 501);
    assert_eq!(StatusCode::VersionNotSupported.as_u16(), 505);
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
}

#[test]
fn test_client_errors_force_close() {
    assert!(StatusCode::BadRequest.forces_close());
    assert!(StatusCode::Forbidden.forces_close());
    assert!(StatusCode::PayloadTooLarge.forces_close());
    assert!(StatusCode::NotImplemented.forces_close());
    assert!(StatusCode::VersionNotSupported.forces_close());
    assert!(!StatusCode::NotFound.forces_close());
    assert!(!StatusCode::Ok.forces_close());
}

#[test]
fn test_serialize_head_status_line_and_server() {
    let mut response = Response::new(StatusCode::Ok);
    response.keep_alive = true;
    let head = head_str(&response);

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains(&format!("Server: {}\r\n", SERVER_NAME)));
    assert!(head.ends_with("\r\n\r\n"));
}

#[test]
fn test_serialize_head_injects_content_length() {
    let mut response = Response::new(StatusCode::Ok);
    response.body = Body::Buffer(b"hello".to_vec());
    let head = head_str(&response);

    assert!(head.contains("Content-Length: 5\r\n"));
}

#[test]
fn test_serialize_head_keeps_explicit_content_length() {
    let mut response = Response::new(StatusCode::Ok);
    response.add_header("Content-Length", "42");
    response.body = Body::Buffer(b"hello".to_vec());
    let head = head_str(&response);

    assert!(head.contains("Content-Length: 42\r\n"));
    assert_eq!(head.matches("Content-Length").count(), 1);
}

#[test]
fn test_serialize_head_connection_hint() {
    let mut response = Response::new(StatusCode::Ok);
    response.keep_alive = true;
    assert!(head_str(&response).contains("Connection: keep-alive\r\n"));

    response.keep_alive = false;
    assert!(head_str(&response).contains("Connection: close\r\n"));
}

#[test]
fn test_error_response_has_plain_text_body() {
    let response = Response::error(StatusCode::NotFound);
    match &response.body {
        Body::Buffer(bytes) => assert_eq!(bytes, b"404 Not Found"),
        other => panic!("unexpected body: {:?}", other),
    }
    assert_eq!(response.header("Content-Type").unwrap(), "text/plain");
}

#[test]
fn test_body_lengths() {
    assert_eq!(Body::Empty.len(), 0);
    assert!(Body::Empty.is_empty());
    assert_eq!(Body::Buffer(vec![0u8; 7]).len(), 7);
}

#[tokio::test]
async fn test_write_buffer_response() {
    let mut response = Response::error(StatusCode::NotFound);
    response.keep_alive = true;

    let (mut client, mut server) = tokio::io::duplex(4096);
    let written = write_response(&mut server, &mut response).await.unwrap();
    drop(server);

    let mut wire = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut wire)
        .await
        .unwrap();

    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(text.ends_with("\r\n\r\n404 Not Found"));
    assert_eq!(written as usize, text.len());
}

#[tokio::test]
async fn test_write_head_request_suppresses_body() {
    let mut response = Response::new(StatusCode::Ok);
    response.add_header("Content-Length", "5");
    response.body = Body::Buffer(b"hello".to_vec());
    response.head = true;

    let (mut client, mut server) = tokio::io::duplex(4096);
    write_response(&mut server, &mut response).await.unwrap();
    drop(server);

    let mut wire = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut wire)
        .await
        .unwrap();

    let text = String::from_utf8(wire).unwrap();
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
    assert!(!text.contains("hello"));
}

#[tokio::test]
async fn test_write_cached_response_verbatim() {
    let wire_bytes: Vec<u8> =
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nhi".to_vec();
    let entry = Arc::new(CacheEntry {
        path: "/tmp/site/hi.txt".to_string(),
        encoding: Encoding::None,
        etag: "\"1-2-3\"".to_string(),
        bytes: wire_bytes.clone().into(),
        inserted_at: Instant::now(),
    });

    let mut response = Response::new(StatusCode::Ok);
    response.body = Body::Cached(entry);
    response.keep_alive = true;

    let (mut client, mut server) = tokio::io::duplex(4096);
    write_response(&mut server, &mut response).await.unwrap();
    drop(server);

    let mut wire = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut wire)
        .await
        .unwrap();

    assert_eq!(wire, wire_bytes);
}

#[tokio::test]
async fn test_write_cached_response_head_sends_headers_only() {
    let wire_bytes: Vec<u8> =
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nhi".to_vec();
    let head_len = wire_bytes.len() - 2;
    let entry = Arc::new(CacheEntry {
        path: "/tmp/site/hi.txt".to_string(),
        encoding: Encoding::None,
        etag: "\"1-2-3\"".to_string(),
        bytes: wire_bytes.clone().into(),
        inserted_at: Instant::now(),
    });

    let mut response = Response::new(StatusCode::Ok);
    response.body = Body::Cached(entry);
    response.head = true;

    let (mut client, mut server) = tokio::io::duplex(4096);
    write_response(&mut server, &mut response).await.unwrap();
    drop(server);

    let mut wire = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut wire)
        .await
        .unwrap();

    assert_eq!(wire, &wire_bytes[..head_len]);
}

#[tokio::test]
async fn test_write_file_response_streams_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("body.bin");
    let contents = vec![7u8; 3000];
    std::fs::write(&path, &contents).unwrap();

    let file = tokio::fs::File::open(&path).await.unwrap();
    let mut response = Response::new(StatusCode::Ok);
    response.add_header("Content-Length", contents.len().to_string());
    response.body = Body::File {
        file,
        offset: 0,
        len: contents.len() as u64,
    };

    let (mut client, mut server) = tokio::io::duplex(64 * 1024);
    let write_task = tokio::spawn(async move {
        let written = write_response(&mut server, &mut response).await.unwrap();
        written
    });

    let mut wire = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut wire)
        .await
        .unwrap();
    let written = write_task.await.unwrap();

    assert_eq!(written, wire.len() as u64);
    let split = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    assert_eq!(&wire[split..], &contents[..]);
}
