//! Response body compression.
//!
//! gzip and deflate encoding via flate2, with the compression level picked
//! per MIME class: text compresses well at the default level, fonts and SVG
//! are worth the maximum effort, and images or opaque binaries get the
//! cheapest pass since they rarely shrink.

use std::io::Write;

use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

/// Content encoding negotiated for one exchange.
///
/// Doubles as the cache vary key: the request's Accept-Encoding header is
/// reduced to one of these three tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    None,
    Gzip,
    Deflate,
}

impl Encoding {
    /// Reduces an Accept-Encoding header value to a supported encoding.
    /// gzip wins over deflate when both are offered.
    pub fn negotiate(accept_encoding: Option<&str>) -> Self {
        match accept_encoding {
            Some(value) if value.contains("gzip") => Encoding::Gzip,
            Some(value) if value.contains("deflate") => Encoding::Deflate,
            _ => Encoding::None,
        }
    }

    /// Header value for Content-Encoding. `None` has no wire form.
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Encoding::None => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Deflate => Some("deflate"),
        }
    }

    /// Short tag used in cache keys and log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Encoding::None => "none",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

/// Minimum supported compression level.
pub const LEVEL_MIN: u32 = 1;
/// zlib's default level.
pub const LEVEL_DEFAULT: u32 = 6;
/// Maximum supported compression level.
pub const LEVEL_MAX: u32 = 9;

#[derive(Debug, PartialEq, Eq)]
pub enum CompressError {
    /// Identity encoding was requested; there is nothing to do.
    NoEncoding,
    /// The output grew past twice the input, so compression is pointless.
    Expanded,
    /// The encoder itself failed.
    Failed,
}

impl std::fmt::Display for CompressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            CompressError::NoEncoding => "no encoding selected",
            CompressError::Expanded => "compressed output exceeded twice the input size",
            CompressError::Failed => "compression failed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for CompressError {}

/// Compression level for a MIME type, per the class table.
pub fn level_for_mime(mime: &str) -> u32 {
    if mime.starts_with("application/font") || mime.starts_with("image/svg+xml") {
        LEVEL_MAX
    } else if mime.starts_with("image/") || mime.starts_with("application/octet-stream") {
        LEVEL_MIN
    } else {
        LEVEL_DEFAULT
    }
}

/// Compresses `input` with the given algorithm and level.
///
/// Callers fall back to the uncompressed body on any error; an output that
/// expands past twice the input aborts the attempt rather than shipping
/// bytes larger than the original.
pub fn compress(input: &[u8], encoding: Encoding, level: u32) -> Result<Vec<u8>, CompressError> {
    let level = Compression::new(level.clamp(LEVEL_MIN, LEVEL_MAX));

    let compressed = match encoding {
        Encoding::None => return Err(CompressError::NoEncoding),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2 + 64), level);
            encoder
                .write_all(input)
                .and_then(|_| encoder.finish())
                .map_err(|_| CompressError::Failed)?
        }
        Encoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::with_capacity(input.len() / 2 + 64), level);
            encoder
                .write_all(input)
                .and_then(|_| encoder.finish())
                .map_err(|_| CompressError::Failed)?
        }
    };

    if compressed.len() > input.len().saturating_mul(2) {
        return Err(CompressError::Expanded);
    }

    tracing::debug!(
        encoding = encoding.tag(),
        input_len = input.len(),
        output_len = compressed.len(),
        "compressed response body"
    );

    Ok(compressed)
}
