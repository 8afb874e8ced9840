//! Server configuration.
//!
//! Configuration is read from a YAML file (`config.yaml` by default), with
//! every key optional and falling back to built-in defaults. The same loader
//! runs again on SIGHUP to pick up edits without a restart.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Default config file looked up when no path is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub static_files: StaticFilesConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP listen port.
    pub port: u16,
    /// Number of worker processes.
    pub worker_processes: usize,
    /// Per-worker connection ceiling.
    pub max_connections: usize,
    /// Seconds a connection may sit idle before it is closed.
    pub keep_alive_timeout: u64,
    /// Admit every connection regardless of rate limits.
    pub development_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7877,
            worker_processes: 4,
            max_connections: 10_000,
            keep_alive_timeout: 60,
            development_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticFilesConfig {
    /// Document root all request paths resolve under.
    pub root: PathBuf,
    /// File served for directory requests.
    pub index: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("../static"),
            index: "index.html".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Entry TTL in seconds.
    pub timeout: u64,
    /// Slot count of the response table.
    pub size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout: 3600,
            size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Length of the request-counting window in seconds.
    pub window_seconds: u64,
    /// Requests allowed per window before a violation is recorded.
    pub max_requests: u32,
    /// Concurrent connections allowed per IP.
    pub max_concurrent: u32,
    /// Violations before a ban is imposed.
    pub max_violations: u32,
    /// Ban duration in seconds.
    pub ban_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 100,
            max_concurrent: 50,
            max_violations: 5,
            ban_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Access log sink, one line per completed request.
    pub access_log: PathBuf,
    /// Minimum level for diagnostic logging (trace/debug/info/warn/error).
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            access_log: PathBuf::from("./logs/access.log"),
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration.
    ///
    /// With an explicit `path` the file must exist and parse. Without one,
    /// `config.yaml` in the working directory is used when present, and
    /// built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.worker_processes == 0 || self.server.worker_processes > 1000 {
            anyhow::bail!(
                "worker_processes must be between 1 and 1000, got {}",
                self.server.worker_processes
            );
        }
        if self.server.max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }
        if self.cache.size == 0 {
            anyhow::bail!("cache size must be at least 1");
        }
        Ok(())
    }
}
