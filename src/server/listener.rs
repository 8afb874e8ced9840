//! Listening socket setup and the accept loop.

use std::net::{Ipv4Addr, SocketAddr};
use std::task::Poll;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::http::connection::Connection;
use crate::server::worker::WorkerState;

/// Most connections accepted on one readiness wakeup.
const ACCEPT_BATCH: usize = 2000;

/// Idle threshold for the emergency eviction sweep.
const EVICTION_IDLE: Duration = Duration::from_secs(5);

/// Connections closed per emergency sweep.
const EVICTION_LIMIT: usize = 10;

/// Binds the worker's listening socket.
///
/// Every worker binds the same port with `SO_REUSEPORT`, letting the kernel
/// distribute incoming connections across worker processes without a shared
/// descriptor.
pub fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(listen_backlog())?;

    let listener = TcpListener::from_std(socket.into())?;
    info!(port, "listening");
    Ok(listener)
}

/// Listen backlog: the kernel ceiling when it can be read, else a sane
/// floor.
fn listen_backlog() -> i32 {
    std::fs::read_to_string("/proc/sys/net/core/somaxconn")
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1024)
}

/// Runs the accept loop until shutdown is signalled.
pub async fn run(
    listener: TcpListener,
    state: std::rc::Rc<WorkerState>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        admit(stream, peer, &state);
                        drain_accept_queue(&listener, &state).await;
                    }
                    Err(error) => handle_accept_error(error, &state).await,
                }
            }
            _ = shutdown.changed() => {
                info!("accept loop stopping");
                return Ok(());
            }
        }
    }
}

/// Accepts whatever else is already queued, up to the per-wakeup cap,
/// without yielding back to the scheduler.
async fn drain_accept_queue(listener: &TcpListener, state: &std::rc::Rc<WorkerState>) {
    let mut accepted = 1;
    while accepted < ACCEPT_BATCH {
        let next = std::future::poll_fn(|cx| match listener.poll_accept(cx) {
            Poll::Ready(result) => Poll::Ready(Some(result)),
            Poll::Pending => Poll::Ready(None),
        })
        .await;

        match next {
            Some(Ok((stream, peer))) => {
                admit(stream, peer, state);
                accepted += 1;
            }
            Some(Err(error)) => {
                handle_accept_error(error, state).await;
                break;
            }
            None => break,
        }
    }

    if accepted > 1 {
        debug!(accepted, "accepted connection batch");
    }
}

/// Applies the admission gates and starts a connection task.
///
/// Denied and over-ceiling connections are dropped without any HTTP
/// response; the socket close is the whole answer.
fn admit(stream: TcpStream, peer: SocketAddr, state: &std::rc::Rc<WorkerState>) {
    let ip = peer.ip().to_string();

    if state.registry.active() >= state.max_connections {
        warn!(peer = %ip, "connection ceiling reached, rejecting");
        return;
    }

    let permit = match state.limiter.admit(&ip, Instant::now()) {
        Ok(permit) => permit,
        Err(_) => return,
    };

    if let Err(error) = tune_client_socket(&stream) {
        debug!(peer = %ip, %error, "socket tuning failed");
    }

    let buffer = match state.pool.acquire() {
        Ok(buffer) => buffer,
        Err(_) => {
            warn!(peer = %ip, "buffer pool exhausted, rejecting");
            return;
        }
    };

    debug!(peer = %ip, clients = state.registry.active() + 1, "accepted connection");

    let registration = state.registry.register();
    let connection = Connection::new(stream, ip, buffer, permit, registration, state.ctx());
    tokio::task::spawn_local(connection.run());
}

/// TCP settings applied to every accepted socket: no Nagle delay, large
/// buffer hints, and aggressive keepalive probing.
fn tune_client_socket(stream: &TcpStream) -> std::io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    sock.set_nodelay(true)?;
    sock.set_send_buffer_size(64 * 1024)?;
    sock.set_recv_buffer_size(64 * 1024)?;

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10))
        .with_retries(6);
    sock.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

/// Descriptor exhaustion gets an emergency sweep of idle connections; other
/// accept errors just rate-limit the loop briefly.
async fn handle_accept_error(error: std::io::Error, state: &std::rc::Rc<WorkerState>) {
    let descriptor_pressure = matches!(
        error.raw_os_error(),
        Some(code) if code == libc::EMFILE || code == libc::ENFILE
    );

    if descriptor_pressure {
        let evicted = state.registry.evict_idle(EVICTION_LIMIT, EVICTION_IDLE);
        warn!(%error, evicted, "descriptor pressure on accept");
        if evicted == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    } else {
        warn!(%error, "accept failed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
