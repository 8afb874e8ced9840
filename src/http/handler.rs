//! Request handling: GET/HEAD semantics, conditional validation, content
//! negotiation, and response-cache population.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::ResponseCache;
use crate::compress::{self, Encoding};
use crate::http::conditional;
use crate::http::mime;
use crate::http::request::{Method, Request};
use crate::http::response::{Body, Response, StatusCode};
use crate::http::writer;

/// Files over this size are streamed instead of compressed in memory.
pub const MAX_COMPRESS_SIZE: u64 = 10 * 1024 * 1024;

/// Uncompressed responses under this size are pre-assembled and cached.
pub const MAX_CACHEABLE_SIZE: u64 = 1024 * 1024;

/// Everything a request needs to be answered.
pub struct HandlerContext {
    pub root: PathBuf,
    pub index: String,
    pub keep_alive_timeout: u64,
    pub cache: Arc<ResponseCache>,
}

/// Handles one parsed request and produces the response to write.
pub async fn handle(request: &Request, ctx: &HandlerContext) -> Response {
    let is_head = match request.method {
        Method::Get => false,
        Method::Head => true,
        Method::Other(_) => {
            tracing::debug!(method = %request.method, "unsupported method");
            let mut response = Response::error(StatusCode::NotImplemented);
            response.keep_alive = false;
            return response;
        }
    };

    // Directory targets fall through to their index file.
    let mut target = request.target.clone();
    if target.ends_with('/') {
        target.push_str(&ctx.index);
    }

    let path = match crate::resolve::resolve(&ctx.root, &target) {
        Ok(path) => path,
        Err(reason) => {
            tracing::warn!(target = %request.target, %reason, "path rejected");
            let mut response = Response::error(StatusCode::Forbidden);
            response.keep_alive = false;
            return response;
        }
    };
    let path_str = path.to_string_lossy().into_owned();

    let content_type = mime::content_type(&path_str);
    let encoding = if mime::is_compressible(content_type) {
        Encoding::negotiate(request.header("Accept-Encoding"))
    } else {
        Encoding::None
    };

    let keep_alive = request.keep_alive();
    let keep_alive_hint = Some(ctx.keep_alive_timeout);

    if let Some(entry) = ctx.cache.lookup(&path_str, encoding, Instant::now()) {
        if let Some(if_none_match) = request.header("If-None-Match") {
            if conditional::etag_matches(if_none_match, &entry.etag) {
                return not_modified(&entry.etag, &path_str, None, keep_alive, is_head, ctx);
            }
        }

        let mut response = Response::new(StatusCode::Ok);
        response.body = Body::Cached(entry);
        response.encoding = encoding;
        response.keep_alive = keep_alive;
        response.keep_alive_timeout = keep_alive_hint;
        response.head = is_head;
        return response;
    }

    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta,
        _ => {
            tracing::debug!(path = %path_str, "file not found");
            let mut response = Response::error(StatusCode::NotFound);
            response.keep_alive = keep_alive;
            response.keep_alive_timeout = keep_alive_hint;
            response.head = is_head;
            return response;
        }
    };

    let etag = conditional::etag_for(&meta);
    let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);

    if let Some(if_none_match) = request.header("If-None-Match") {
        if conditional::etag_matches(if_none_match, &etag) {
            return not_modified(&etag, &path_str, None, keep_alive, is_head, ctx);
        }
    }

    // A non-matching ETag is not conclusive; the date still gets a say.
    if let Some(if_modified_since) = request.header("If-Modified-Since") {
        if conditional::not_modified_since(if_modified_since, mtime) {
            return not_modified(&etag, &path_str, Some(mtime), keep_alive, is_head, ctx);
        }
    }

    let mut response = Response::new(StatusCode::Ok);
    response.add_header("Content-Type", content_type);
    response.add_header("Last-Modified", httpdate::fmt_http_date(mtime));
    response.add_header("ETag", etag.clone());
    response.add_header("Vary", "Accept-Encoding, User-Agent");
    response.add_header("Cache-Control", mime::cache_control(&path_str));
    response.keep_alive = keep_alive;
    response.keep_alive_timeout = keep_alive_hint;
    response.head = is_head;

    let size = meta.len();
    let mut cacheable_body: Option<Vec<u8>> = None;

    if encoding != Encoding::None && size <= MAX_COMPRESS_SIZE {
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(error) => {
                tracing::error!(path = %path_str, %error, "failed to read file");
                return internal_error(keep_alive, is_head, ctx);
            }
        };

        match compress::compress(&contents, encoding, compress::level_for_mime(content_type)) {
            Ok(compressed) => {
                if let Some(value) = encoding.header_value() {
                    response.add_header("Content-Encoding", value);
                }
                response.add_header("Content-Length", compressed.len().to_string());
                response.encoding = encoding;
                response.body = Body::Buffer(compressed);
            }
            Err(_) => {
                // Compression refused to help; ship the original bytes.
                response.add_header("Content-Length", contents.len().to_string());
                if size < MAX_CACHEABLE_SIZE {
                    cacheable_body = Some(contents.clone());
                }
                response.body = Body::Buffer(contents);
            }
        }
    } else if size < MAX_CACHEABLE_SIZE {
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(error) => {
                tracing::error!(path = %path_str, %error, "failed to read file");
                return internal_error(keep_alive, is_head, ctx);
            }
        };
        response.add_header("Content-Length", contents.len().to_string());
        cacheable_body = Some(contents.clone());
        response.body = Body::Buffer(contents);
    } else {
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(error) => {
                tracing::warn!(path = %path_str, %error, "failed to open file");
                let mut response = Response::error(StatusCode::NotFound);
                response.keep_alive = keep_alive;
                response.keep_alive_timeout = keep_alive_hint;
                response.head = is_head;
                return response;
            }
        };
        response.add_header("Content-Length", size.to_string());
        response.body = Body::File {
            file,
            offset: 0,
            len: size,
        };
    }

    // Pre-assemble the wire image for future hits. Only keep-alive responses
    // are stored so the frozen Connection header never contradicts the
    // connection's actual behavior.
    if keep_alive {
        if let Some(body) = cacheable_body {
            let mut wire = writer::serialize_head(&response);
            wire.extend_from_slice(&body);
            ctx.cache
                .insert(&path_str, encoding, &etag, wire, Instant::now());
        }
    }

    response
}

/// 304 response carrying the validators and caching headers but no body.
fn not_modified(
    etag: &str,
    path: &str,
    mtime: Option<std::time::SystemTime>,
    keep_alive: bool,
    is_head: bool,
    ctx: &HandlerContext,
) -> Response {
    let mut response = Response::new(StatusCode::NotModified);
    response.add_header("ETag", etag);
    if let Some(mtime) = mtime {
        response.add_header("Last-Modified", httpdate::fmt_http_date(mtime));
    }
    response.add_header("Cache-Control", mime::cache_control(path));
    response.add_header("Vary", "Accept-Encoding, User-Agent");
    response.add_header("Content-Length", "0");
    response.keep_alive = keep_alive;
    response.keep_alive_timeout = Some(ctx.keep_alive_timeout);
    response.head = is_head;
    response
}

fn internal_error(keep_alive: bool, is_head: bool, ctx: &HandlerContext) -> Response {
    let mut response = Response::error(StatusCode::InternalServerError);
    response.keep_alive = keep_alive;
    response.keep_alive_timeout = Some(ctx.keep_alive_timeout);
    response.head = is_head;
    response
}
