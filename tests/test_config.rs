use std::io::Write;

use rampart::config::Config;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.server.port, 7877);
    assert_eq!(cfg.server.worker_processes, 4);
    assert_eq!(cfg.server.max_connections, 10_000);
    assert_eq!(cfg.server.keep_alive_timeout, 60);
    assert!(!cfg.server.development_mode);
    assert_eq!(cfg.static_files.root.to_str().unwrap(), "../static");
    assert_eq!(cfg.static_files.index, "index.html");
    assert_eq!(cfg.cache.timeout, 3600);
    assert_eq!(cfg.cache.size, 10_000);
    assert_eq!(cfg.rate_limit.window_seconds, 60);
    assert_eq!(cfg.rate_limit.max_requests, 100);
    assert_eq!(cfg.rate_limit.ban_seconds, 600);
    assert_eq!(cfg.log.access_log.to_str().unwrap(), "./logs/access.log");
}

#[test]
fn test_config_partial_file_fills_defaults() {
    let (_dir, path) = write_config(
        "server:\n  port: 9000\nstatic_files:\n  root: /srv/www\n",
    );
    let cfg = Config::load(Some(&path)).unwrap();

    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.static_files.root.to_str().unwrap(), "/srv/www");
    // Everything not mentioned keeps its default.
    assert_eq!(cfg.server.worker_processes, 4);
    assert_eq!(cfg.cache.timeout, 3600);
}

#[test]
fn test_config_full_sections() {
    let (_dir, path) = write_config(
        "server:\n  port: 8080\n  worker_processes: 2\n  max_connections: 500\n  keep_alive_timeout: 30\n  development_mode: true\ncache:\n  timeout: 120\n  size: 64\nrate_limit:\n  window_seconds: 10\n  max_requests: 5\nlog:\n  access_log: /tmp/access.log\n  level: debug\n",
    );
    let cfg = Config::load(Some(&path)).unwrap();

    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.server.worker_processes, 2);
    assert_eq!(cfg.server.max_connections, 500);
    assert_eq!(cfg.server.keep_alive_timeout, 30);
    assert!(cfg.server.development_mode);
    assert_eq!(cfg.cache.timeout, 120);
    assert_eq!(cfg.cache.size, 64);
    assert_eq!(cfg.rate_limit.window_seconds, 10);
    assert_eq!(cfg.rate_limit.max_requests, 5);
    assert_eq!(cfg.log.level, "debug");
}

#[test]
fn test_config_missing_explicit_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.yaml");

    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_config_unknown_key_rejected() {
    let (_dir, path) = write_config("server:\n  prot: 9000\n");

    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_config_zero_workers_rejected() {
    let (_dir, path) = write_config("server:\n  worker_processes: 0\n");

    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_config_zero_cache_size_rejected() {
    let (_dir, path) = write_config("cache:\n  size: 0\n");

    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();

    assert_eq!(cfg1.server.port, cfg2.server.port);
    assert_eq!(cfg1.static_files.root, cfg2.static_files.root);
}
