//! Append-only access log.
//!
//! One line per completed request in the common log shape:
//! `ip - - [timestamp] "METHOD uri" status size`. Method and URI are
//! sanitized so a crafted request cannot inject extra log lines.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

pub struct AccessLog {
    sink: Option<Mutex<BufWriter<File>>>,
}

impl AccessLog {
    /// Opens the log for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    /// A log that swallows everything, for tests and disabled logging.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn log(&self, ip: &str, method: &str, uri: &str, status: u16, size: u64) {
        let sink = match &self.sink {
            Some(sink) => sink,
            None => return,
        };

        let line = format!(
            "{} - - [{}] \"{} {}\" {} {}\n",
            ip,
            httpdate::fmt_http_date(SystemTime::now()),
            sanitize(method),
            sanitize(uri),
            status,
            size
        );

        let mut writer = sink.lock().unwrap();
        if writer.write_all(line.as_bytes()).and_then(|_| writer.flush()).is_err() {
            tracing::warn!("failed to write access log line");
        }
    }
}

/// Replaces control and non-printable characters so request bytes cannot
/// fabricate log records.
fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}
