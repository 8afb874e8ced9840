//! Worker process runtime.
//!
//! Each worker is one OS process running a single-threaded event loop: a
//! current-thread tokio runtime with a `LocalSet`, its own `SO_REUSEPORT`
//! listener, and its own cache, rate limiter, and buffer pool. Workers share
//! nothing with each other beyond the kernel-balanced port.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::LocalSet;
use tracing::{error, info, warn};

use crate::accesslog::AccessLog;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::http::connection::ConnectionContext;
use crate::http::handler::HandlerContext;
use crate::limiter::RateLimiter;
use crate::pool::BufferPool;
use crate::server::listener;
use crate::server::registry::ConnectionRegistry;

/// How long in-flight connections get to finish after a TERM before the
/// process exits (the supervisor KILLs stragglers on the same schedule).
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Cadence of the worker stats heartbeat and rate-limit sweep.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Everything the accept loop needs, shared across its connection tasks.
pub struct WorkerState {
    pub limiter: Arc<RateLimiter>,
    pub pool: BufferPool,
    pub registry: Arc<ConnectionRegistry>,
    pub max_connections: usize,
    ctx: RwLock<Arc<ConnectionContext>>,
}

impl WorkerState {
    /// Current connection context; swapped wholesale on config reload.
    pub fn ctx(&self) -> Arc<ConnectionContext> {
        Arc::clone(&self.ctx.read().unwrap())
    }
}

/// Entry point for a `--worker <id>` process.
pub fn run(worker_id: usize, config: Config, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    pin_to_cpu(worker_id);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_worker(worker_id, config, config_path))
}

async fn run_worker(
    worker_id: usize,
    config: Config,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let listener = listener::bind(config.server.port)?;

    let cache = Arc::new(ResponseCache::new(
        config.cache.size,
        Duration::from_secs(config.cache.timeout),
        Instant::now(),
    ));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.clone(),
        config.server.development_mode,
    ));
    let requests = Arc::new(AtomicU64::new(0));

    let ctx = build_context(&config, Arc::clone(&cache), Arc::clone(&requests))?;
    let state = Rc::new(WorkerState {
        limiter: Arc::clone(&limiter),
        pool: BufferPool::new(),
        registry: ConnectionRegistry::new(),
        max_connections: config.server.max_connections,
        ctx: RwLock::new(Arc::new(ctx)),
    });

    info!(worker_id, port = config.server.port, "worker started");

    let local = LocalSet::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    spawn_stats_heartbeat(&local, worker_id, Rc::clone(&state), Arc::clone(&cache), Arc::clone(&requests));
    spawn_reload_task(
        &local,
        Rc::clone(&state),
        config_path,
        Arc::clone(&cache),
        Arc::clone(&requests),
    )?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    local
        .run_until(async {
            tokio::select! {
                result = listener::run(listener, Rc::clone(&state), shutdown_rx) => result,
                _ = sigterm.recv() => {
                    info!(worker_id, "worker received TERM, draining");
                    Ok(())
                }
                _ = sigint.recv() => {
                    info!(worker_id, "worker received INT, draining");
                    Ok(())
                }
            }
        })
        .await?;

    let _ = shutdown_tx.send(true);

    // Give in-flight exchanges a moment to finish before the process exits.
    local
        .run_until(async {
            let deadline = Instant::now() + DRAIN_GRACE;
            while state.registry.active() > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

    info!(worker_id, "worker exiting");
    Ok(())
}

fn build_context(
    config: &Config,
    cache: Arc<ResponseCache>,
    requests: Arc<AtomicU64>,
) -> anyhow::Result<ConnectionContext> {
    let access_log = Arc::new(AccessLog::open(&config.log.access_log)?);
    Ok(ConnectionContext {
        handler: HandlerContext {
            root: config.static_files.root.clone(),
            index: config.static_files.index.clone(),
            keep_alive_timeout: config.server.keep_alive_timeout,
            cache,
        },
        access_log,
        requests,
        keep_alive_timeout: Duration::from_secs(config.server.keep_alive_timeout),
    })
}

/// Periodic stats line plus the rate-limit table sweep.
fn spawn_stats_heartbeat(
    local: &LocalSet,
    worker_id: usize,
    state: Rc<WorkerState>,
    cache: Arc<ResponseCache>,
    requests: Arc<AtomicU64>,
) {
    local.spawn_local(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let handled = requests.swap(0, Ordering::Relaxed);
            let stats = cache.stats();
            info!(
                worker_id,
                requests_per_sec = handled / STATS_INTERVAL.as_secs(),
                clients = state.registry.active(),
                cache_hits = stats.hits,
                cache_misses = stats.misses,
                cache_bytes = stats.bytes_in_use,
                "worker stats"
            );
            state.limiter.sweep(Instant::now());
        }
    });
}

/// Re-reads the config file on SIGHUP and swaps the connection context.
/// Structure sizes (cache slots, buffer pool, worker count) stay as booted.
fn spawn_reload_task(
    local: &LocalSet,
    state: Rc<WorkerState>,
    config_path: Option<PathBuf>,
    cache: Arc<ResponseCache>,
    requests: Arc<AtomicU64>,
) -> anyhow::Result<()> {
    let mut sighup = signal(SignalKind::hangup())?;
    local.spawn_local(async move {
        loop {
            if sighup.recv().await.is_none() {
                return;
            }
            match Config::load(config_path.as_deref()) {
                Ok(new_config) => {
                    state
                        .limiter
                        .set_development_mode(new_config.server.development_mode);
                    match build_context(&new_config, Arc::clone(&cache), Arc::clone(&requests)) {
                        Ok(ctx) => {
                            *state.ctx.write().unwrap() = Arc::new(ctx);
                            info!("configuration reloaded");
                        }
                        Err(error) => error!(%error, "reload failed, keeping old context"),
                    }
                }
                Err(error) => error!(%error, "failed to reload configuration"),
            }
        }
    });
    Ok(())
}

/// Pins this process to one core so workers spread across the machine
/// instead of migrating.
#[cfg(target_os = "linux")]
fn pin_to_cpu(worker_id: usize) {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let cpu = worker_id % cpus;

    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            warn!(worker_id, cpu, "failed to set CPU affinity");
        } else {
            info!(worker_id, cpu, "worker pinned to CPU");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_worker_id: usize) {}
