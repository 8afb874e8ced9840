//! MIME detection and per-type response policy.

/// Extension → MIME table. Unknown extensions fall through to
/// `application/octet-stream`.
const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("ico", "image/x-icon"),
    ("txt", "text/plain"),
    ("pdf", "application/pdf"),
    ("svg", "image/svg+xml"),
];

/// MIME prefixes worth running through the compressor.
const COMPRESSIBLE: &[&str] = &[
    "text/",
    "application/javascript",
    "application/json",
    "application/xml",
    "application/xhtml+xml",
    "image/svg+xml",
    "application/x-font-ttf",
    "application/x-font-opentype",
    "application/vnd.ms-fontobject",
    "application/font-woff",
    "application/font-woff2",
];

fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        // Dotfiles like `.gitignore` have no extension.
        return None;
    }
    Some(ext)
}

/// Content-Type for a filesystem path.
pub fn content_type(path: &str) -> &'static str {
    let ext = match extension(path) {
        Some(ext) => ext,
        None => return "application/octet-stream",
    };

    for (candidate, mime) in MIME_TYPES {
        if ext.eq_ignore_ascii_case(candidate) {
            return mime;
        }
    }

    "application/octet-stream"
}

/// Whether bodies of this MIME type should be offered to the compressor.
pub fn is_compressible(mime: &str) -> bool {
    COMPRESSIBLE
        .iter()
        .any(|prefix| mime.len() >= prefix.len() && mime[..prefix.len()].eq_ignore_ascii_case(prefix))
}

/// Cache-Control policy by extension class.
///
/// Hashed assets (css/js) revalidate daily, images are effectively
/// immutable for a week, HTML turns over quickly, and extensionless paths
/// are never cached downstream.
pub fn cache_control(path: &str) -> &'static str {
    let ext = match extension(path) {
        Some(ext) => ext,
        None => return "no-cache, no-store, must-revalidate",
    };

    if ext.eq_ignore_ascii_case("css") || ext.eq_ignore_ascii_case("js") {
        "public, max-age=86400, must-revalidate"
    } else if ext.eq_ignore_ascii_case("png")
        || ext.eq_ignore_ascii_case("jpg")
        || ext.eq_ignore_ascii_case("jpeg")
        || ext.eq_ignore_ascii_case("gif")
        || ext.eq_ignore_ascii_case("ico")
    {
        "public, max-age=604800, immutable"
    } else if ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm") {
        "public, max-age=300, must-revalidate"
    } else if ext.eq_ignore_ascii_case("pdf")
        || ext.eq_ignore_ascii_case("doc")
        || ext.eq_ignore_ascii_case("docx")
    {
        "public, max-age=86400"
    } else {
        "public, max-age=3600"
    }
}
