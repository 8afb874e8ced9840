//! Conditional request validation: entity tags and modification dates.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::time::{Duration, SystemTime};

/// Entity tag for a file: quoted `inode-size-mtime` in lowercase hex.
/// Any change to the file's identity, length, or timestamp changes the tag.
pub fn etag_for(meta: &Metadata) -> String {
    format!("\"{:x}-{:x}-{:x}\"", meta.ino(), meta.len(), meta.mtime())
}

/// Evaluates an If-None-Match header value against our ETag.
///
/// Each comma-separated token is stripped of surrounding whitespace, an
/// optional `W/` weak prefix, and enclosing quotes before comparison; a
/// bare `*` matches anything.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let ours = strip_etag(etag);
    if_none_match.split(',').any(|token| {
        let token = token.trim();
        token == "*" || strip_etag(token) == ours
    })
}

fn strip_etag(token: &str) -> &str {
    let token = token.trim();
    let token = token.strip_prefix("W/").unwrap_or(token);
    token.trim_matches('"')
}

/// Evaluates an If-Modified-Since header value against a file mtime.
///
/// Accepts RFC 1123, RFC 850, and asctime date forms. Returns true when the
/// file has not been modified after the given instant, comparing at whole-
/// second resolution since that is all an HTTP date can carry. Unparseable
/// dates are treated as "modified" so the full response is sent.
pub fn not_modified_since(if_modified_since: &str, mtime: SystemTime) -> bool {
    match httpdate::parse_http_date(if_modified_since) {
        Ok(since) => truncate_to_seconds(mtime) <= since,
        Err(_) => false,
    }
}

fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(elapsed) => SystemTime::UNIX_EPOCH + Duration::from_secs(elapsed.as_secs()),
        Err(_) => SystemTime::UNIX_EPOCH,
    }
}
