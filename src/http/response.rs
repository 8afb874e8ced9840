use std::sync::Arc;

use crate::cache::CacheEntry;
use crate::compress::Encoding;

/// HTTP status codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 505 HTTP Version Not Supported
    VersionNotSupported,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::VersionNotSupported => 505,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::VersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Client errors that force the connection closed after the reply.
    pub fn forces_close(&self) -> bool {
        matches!(
            self,
            StatusCode::BadRequest
                | StatusCode::Forbidden
                | StatusCode::PayloadTooLarge
                | StatusCode::NotImplemented
                | StatusCode::VersionNotSupported
        )
    }
}

/// Where the response body comes from. Exactly one source is ever active;
/// the variants carry their own drop rules (the file closes with its
/// handle, a cache borrow just drops its reference).
pub enum Body {
    /// No body bytes on the wire (304, errors after HEAD, suppressed HEAD
    /// bodies whose Content-Length was already recorded).
    Empty,
    /// Body assembled in memory, possibly compressed.
    Buffer(Vec<u8>),
    /// Open file streamed from `offset` for `len` bytes.
    File {
        file: tokio::fs::File,
        offset: u64,
        len: u64,
    },
    /// Borrowed pre-assembled wire bytes (status line + headers + body)
    /// from a cache entry, sent verbatim.
    Cached(Arc<CacheEntry>),
}

impl Body {
    /// Bytes this body would put on the wire. Cached entries carry their
    /// headers inside the blob, so their length is not a Content-Length.
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Buffer(bytes) => bytes.len() as u64,
            Body::File { len, offset, .. } => len.saturating_sub(*offset),
            Body::Cached(entry) => entry.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Buffer(bytes) => write!(f, "Body::Buffer({} bytes)", bytes.len()),
            Body::File { offset, len, .. } => {
                write!(f, "Body::File(offset={offset}, len={len})")
            }
            Body::Cached(entry) => write!(f, "Body::Cached({} bytes)", entry.len()),
        }
    }
}

/// A response ready for the writer.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Headers in emission order.
    pub headers: Vec<(String, String)>,
    pub body: Body,
    /// Encoding applied to the body, if any.
    pub encoding: Encoding,
    pub keep_alive: bool,
    /// Timeout advertised in the Keep-Alive header when keep-alive is on.
    pub keep_alive_timeout: Option<u64>,
    /// HEAD request: transmit headers (with the would-be Content-Length)
    /// and suppress the body bytes.
    pub head: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
            encoding: Encoding::None,
            keep_alive: false,
            keep_alive_timeout: None,
            head: false,
        }
    }

    /// Short plain-text error response, e.g. `404 Not Found`.
    pub fn error(status: StatusCode) -> Self {
        let body = format!("{} {}", status.as_u16(), status.reason_phrase());
        let mut response = Self::new(status);
        response.add_header("Content-Type", "text/plain");
        response.body = Body::Buffer(body.into_bytes());
        response
    }

    /// Appends a header, preserving emission order.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// First header with the given name, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
