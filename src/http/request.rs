use std::fmt;

/// Request method. Only GET and HEAD are served; anything else is kept
/// verbatim so the handler can answer 501 and the access log can name it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Other(String),
}

impl Method {
    pub fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version. The parser rejects everything else up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request: method, target path, version, and the headers in the
/// order they arrived.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// First header with the given name, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the connection should stay open after this exchange.
    ///
    /// HTTP/1.1 defaults to keep-alive unless the request says
    /// `Connection: close`; HTTP/1.0 defaults to close unless it says
    /// `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("Connection");
        match self.version {
            Version::Http11 => !matches!(connection, Some(v) if v.eq_ignore_ascii_case("close")),
            Version::Http10 => {
                matches!(connection, Some(v) if v.eq_ignore_ascii_case("keep-alive"))
            }
        }
    }
}
