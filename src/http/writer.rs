use std::io::SeekFrom;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::http::response::{Body, Response};

/// Value of the Server header on every response.
pub const SERVER_NAME: &str = "rampart";

/// File bodies are streamed to the socket in chunks of this size, advancing
/// the recorded offset as each chunk lands.
const FILE_CHUNK_SIZE: usize = 1024 * 1024;

/// Serializes the status line and headers into one contiguous buffer.
///
/// Injects the ambient headers every response carries: `Server`, a
/// `Content-Length` when none was set, and the `Connection` hint. Cached
/// responses never pass through here; their stored bytes already contain a
/// serialized head.
pub fn serialize_head(response: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    buf.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            response.status.as_u16(),
            response.status.reason_phrase()
        )
        .as_bytes(),
    );

    buf.extend_from_slice(format!("Server: {}\r\n", SERVER_NAME).as_bytes());

    for (name, value) in &response.headers {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    if response.header("Content-Length").is_none() {
        buf.extend_from_slice(format!("Content-Length: {}\r\n", response.body.len()).as_bytes());
    }

    if response.keep_alive {
        buf.extend_from_slice(b"Connection: keep-alive\r\n");
        if let Some(timeout) = response.keep_alive_timeout {
            buf.extend_from_slice(format!("Keep-Alive: timeout={}\r\n", timeout).as_bytes());
        }
    } else {
        buf.extend_from_slice(b"Connection: close\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

/// Writes a response to the stream, consuming the body source.
///
/// In-memory bodies are coalesced with the head into a single write so
/// small responses leave as one packet. File bodies stream in fixed chunks
/// with the offset advanced after every write, so an interrupted send can
/// pick up where it stopped. Returns the total bytes put on the wire.
pub async fn write_response<W>(stream: &mut W, response: &mut Response) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written: u64 = 0;

    if let Body::Cached(entry) = &response.body {
        let bytes = &entry.bytes;
        let end = if response.head {
            head_end(bytes).unwrap_or(bytes.len())
        } else {
            bytes.len()
        };
        stream.write_all(&bytes[..end]).await?;
        stream.flush().await?;
        return Ok(end as u64);
    }

    let head = serialize_head(response);

    match &mut response.body {
        Body::Empty => {
            stream.write_all(&head).await?;
            written += head.len() as u64;
        }
        Body::Buffer(body) => {
            if response.head {
                stream.write_all(&head).await?;
                written += head.len() as u64;
            } else {
                let mut wire = head;
                wire.extend_from_slice(body);
                stream.write_all(&wire).await?;
                written += wire.len() as u64;
            }
        }
        Body::File { file, offset, len } => {
            stream.write_all(&head).await?;
            written += head.len() as u64;

            if !response.head {
                file.seek(SeekFrom::Start(*offset)).await?;
                let mut chunk = vec![0u8; FILE_CHUNK_SIZE.min(*len as usize).max(1)];
                while *offset < *len {
                    let remaining = (*len - *offset) as usize;
                    let want = remaining.min(chunk.len());
                    let n = file.read(&mut chunk[..want]).await?;
                    if n == 0 {
                        // File shrank underneath us; what was promised in
                        // Content-Length cannot be delivered.
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "file truncated during send",
                        ));
                    }
                    stream.write_all(&chunk[..n]).await?;
                    *offset += n as u64;
                    written += n as u64;
                }
            }
        }
        Body::Cached(_) => unreachable!("cached bodies are written above"),
    }

    stream.flush().await?;
    Ok(written)
}

fn head_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
