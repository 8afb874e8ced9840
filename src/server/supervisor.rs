//! Worker process supervision.
//!
//! The supervisor owns no sockets and serves no requests. It validates that
//! the port is bindable, launches N copies of this binary with `--worker`,
//! and then watches: exited workers are relaunched, a run of consecutive
//! relaunch failures shuts the whole server down so a reproducible crash
//! surfaces instead of flapping forever. Termination signals fan out to the
//! workers with a kill escalation, and SIGHUP re-reads the config before
//! being forwarded.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::config::Config;

/// Consecutive worker-restart failures tolerated before giving up.
const MAX_RESTART_FAILURES: u32 = 5;

/// Grace period between TERM and KILL during shutdown, matching the
/// workers' own drain window.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// File descriptor ceiling requested at startup; inherited by workers.
const FD_LIMIT: u64 = 200_000;

/// Interval of the "n/m workers alive" liveness line.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(60);

struct WorkerSlot {
    id: usize,
    child: Option<Child>,
}

/// Runs the supervisor until shutdown. Returns an error when worker slots
/// cannot be kept populated.
pub fn run(config: Config, config_path: Option<PathBuf>, dev_flag: bool) -> anyhow::Result<()> {
    raise_fd_limit();
    preflight_bind(config.server.port)
        .with_context(|| format!("cannot bind port {}", config.server.port))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(supervise(config, config_path, dev_flag))
}

async fn supervise(
    config: Config,
    config_path: Option<PathBuf>,
    dev_flag: bool,
) -> anyhow::Result<()> {
    let worker_count = config.server.worker_processes;
    info!(port = config.server.port, workers = worker_count, "starting supervisor");

    let mut slots: Vec<WorkerSlot> = (0..worker_count)
        .map(|id| WorkerSlot { id, child: None })
        .collect();

    let mut restart_failures: u32 = 0;
    for slot in &mut slots {
        match spawn_worker(slot.id, config_path.as_deref(), dev_flag) {
            Ok(child) => slot.child = Some(child),
            Err(error) => {
                error!(worker_id = slot.id, %error, "failed to start worker");
                restart_failures += 1;
            }
        }
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_liveness = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reap_and_restart(
                    &mut slots,
                    config_path.as_deref(),
                    dev_flag,
                    &mut restart_failures,
                );

                if restart_failures >= MAX_RESTART_FAILURES {
                    error!(
                        failures = restart_failures,
                        "too many worker restart failures, shutting down"
                    );
                    shutdown_workers(&mut slots).await;
                    anyhow::bail!("exceeded worker restart failure budget");
                }

                if last_liveness.elapsed() >= LIVENESS_INTERVAL {
                    let alive = slots.iter().filter(|s| s.child.is_some()).count();
                    info!(alive, total = slots.len(), "workers alive");
                    last_liveness = Instant::now();
                }
            }

            _ = sigterm.recv() => {
                info!("received TERM, shutting down");
                shutdown_workers(&mut slots).await;
                return Ok(());
            }

            _ = sigint.recv() => {
                info!("received INT, shutting down");
                shutdown_workers(&mut slots).await;
                return Ok(());
            }

            _ = sighup.recv() => {
                match Config::load(config_path.as_deref()) {
                    Ok(_) => {
                        info!("configuration reloaded, notifying workers");
                        for slot in &slots {
                            if let Some(child) = &slot.child {
                                send_signal(child, libc::SIGHUP);
                            }
                        }
                    }
                    Err(error) => error!(%error, "failed to reload configuration"),
                }
            }
        }
    }
}

/// Checks every slot for an exited child and refills it.
fn reap_and_restart(
    slots: &mut [WorkerSlot],
    config_path: Option<&std::path::Path>,
    dev_flag: bool,
    restart_failures: &mut u32,
) {
    for slot in slots.iter_mut() {
        let exited = match &mut slot.child {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(worker_id = slot.id, %status, "worker exited");
                    true
                }
                Ok(None) => false,
                Err(error) => {
                    warn!(worker_id = slot.id, %error, "worker health check failed");
                    true
                }
            },
            None => true,
        };

        if exited {
            slot.child = None;
            match spawn_worker(slot.id, config_path, dev_flag) {
                Ok(child) => {
                    info!(worker_id = slot.id, "worker restarted");
                    slot.child = Some(child);
                    *restart_failures = 0;
                }
                Err(error) => {
                    *restart_failures += 1;
                    error!(
                        worker_id = slot.id,
                        %error,
                        failures = *restart_failures,
                        "failed to restart worker"
                    );
                }
            }
        }
    }
}

/// Launches one worker process: this binary re-executed with `--worker`.
fn spawn_worker(
    id: usize,
    config_path: Option<&std::path::Path>,
    dev_flag: bool,
) -> anyhow::Result<Child> {
    let exe = std::env::current_exe().context("cannot locate server binary")?;

    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg(path);
    }
    if dev_flag {
        command.arg("--dev");
    }
    command.arg("--worker").arg(id.to_string());
    command.kill_on_drop(true);

    let child = command.spawn().context("failed to spawn worker process")?;
    info!(worker_id = id, pid = child.id().unwrap_or(0), "worker started");
    Ok(child)
}

/// TERM to every worker, a bounded wait, then KILL for survivors.
async fn shutdown_workers(slots: &mut [WorkerSlot]) {
    for slot in slots.iter() {
        if let Some(child) = &slot.child {
            send_signal(child, libc::SIGTERM);
        }
    }

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while Instant::now() < deadline {
        let all_exited = slots.iter_mut().all(|slot| match &mut slot.child {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        });
        if all_exited {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for slot in slots.iter_mut() {
        if let Some(child) = &mut slot.child {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                warn!(worker_id = slot.id, "worker did not exit gracefully, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

fn send_signal(child: &Child, signal: libc::c_int) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}

/// Binds and immediately drops a REUSEPORT socket so configuration errors
/// surface before any worker is spawned.
fn preflight_bind(port: u16) -> anyhow::Result<()> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    let addr = std::net::SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(())
}

/// Raises the descriptor ceiling; workers inherit it across exec.
fn raise_fd_limit() {
    let limit = libc::rlimit {
        rlim_cur: FD_LIMIT,
        rlim_max: FD_LIMIT,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
    if rc != 0 {
        warn!("failed to raise RLIMIT_NOFILE, continuing with current limit");
    }
}
