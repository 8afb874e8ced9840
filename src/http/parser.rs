use crate::http::request::{Method, Request, Version};

/// Longest accepted method token.
pub const MAX_METHOD_LEN: usize = 15;
/// Longest accepted request target.
pub const MAX_URI_LEN: usize = 2047;
/// Longest accepted version token.
pub const MAX_VERSION_LEN: usize = 15;
/// Most headers retained per request; extras are dropped.
pub const MAX_HEADERS: usize = 256;
/// Longest retained header value; longer values are truncated.
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Errors that can occur during HTTP request parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The request line or headers are malformed.
    Malformed,
    /// The request block outgrew the connection buffer before terminating.
    TooLarge,
    /// The version is neither HTTP/1.0 nor HTTP/1.1.
    UnsupportedVersion,
    /// The terminating blank line has not arrived yet.
    Incomplete,
}

/// Parses one HTTP request from the front of `buf`.
///
/// Returns the request and the number of bytes consumed so the caller can
/// keep pipelined follow-up requests in place. Only the head of the request
/// is consumed; these requests carry no bodies.
///
/// # Example
///
/// ```ignore
/// let bytes = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// match parse_request(bytes) {
///     Ok((req, consumed)) => println!("{} {} ({} bytes)", req.method, req.target, consumed),
///     Err(ParseError::Incomplete) => println!("need more data"),
///     Err(e) => println!("parse error: {:?}", e),
/// }
/// ```
pub fn parse_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let head = std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::Malformed)?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(ParseError::Malformed)?;

    let mut parts = request_line.split(' ');
    let method_token = parts.next().ok_or(ParseError::Malformed)?;
    let target = parts.next().ok_or(ParseError::Malformed)?;
    let version_token = parts.next().ok_or(ParseError::Malformed)?;
    if parts.next().is_some() {
        return Err(ParseError::Malformed);
    }

    if method_token.is_empty() || method_token.len() > MAX_METHOD_LEN {
        return Err(ParseError::Malformed);
    }
    if target.is_empty() || target.len() > MAX_URI_LEN {
        return Err(ParseError::Malformed);
    }
    if version_token.is_empty() || version_token.len() > MAX_VERSION_LEN {
        return Err(ParseError::Malformed);
    }

    let version = match version_token {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        _ => return Err(ParseError::UnsupportedVersion),
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if headers.len() >= MAX_HEADERS {
            break;
        }

        let (name, value) = line.split_once(':').ok_or(ParseError::Malformed)?;
        let value = value.trim_start_matches(' ');
        let value = if value.len() > MAX_HEADER_SIZE {
            let mut end = MAX_HEADER_SIZE;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            &value[..end]
        } else {
            value
        };
        headers.push((name.to_string(), value.to_string()));
    }

    let request = Request {
        method: Method::from_token(method_token),
        target: target.to_string(),
        version,
        headers,
    };

    Ok((request, headers_end + 4))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
