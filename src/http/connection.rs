use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::accesslog::AccessLog;
use crate::http::handler::{self, HandlerContext};
use crate::http::parser::{parse_request, ParseError};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer;
use crate::limiter::Permit;
use crate::pool::{PooledBuffer, BUFFER_SIZE};
use crate::server::registry::Registration;

/// A connection open at least this long while having sent fewer than
/// [`SLOW_REQUEST_MIN_BYTES`] bytes is treated as a slow-client attack.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(10);
pub const SLOW_REQUEST_MIN_BYTES: u64 = 4;

/// Shared environment handed to every connection of a worker.
pub struct ConnectionContext {
    pub handler: HandlerContext,
    pub access_log: Arc<AccessLog>,
    /// Completed-request counter for the worker stats heartbeat.
    pub requests: Arc<AtomicU64>,
    pub keep_alive_timeout: Duration,
}

/// Handles a single HTTP client connection with keep-alive and pipelining.
///
/// The connection cycles through a state machine:
///
/// 1. **Reading**: drains the socket into the pooled buffer and frames
///    complete requests, strictly in arrival order
/// 2. **Processing**: dispatches a parsed request to the handler
/// 3. **Writing**: sends the response, streaming file bodies
/// 4. **Closed**: tears down
///
/// Keep-alive cycles the machine from Writing back to Reading. The idle
/// timer and the slow-request check both run inside the Reading state; the
/// rate-limiter permit and the pooled buffer are released by drop when the
/// machine stops, however it stops.
pub struct Connection {
    stream: TcpStream,
    peer_ip: String,
    buffer: PooledBuffer,
    filled: usize,
    state: ConnectionState,
    started: Instant,
    last_activity: Instant,
    total_received: u64,
    current_request: Option<(String, String)>,
    request_start: Option<Instant>,
    registration: Registration,
    ctx: Arc<ConnectionContext>,
    _permit: Permit,
}

enum ConnectionState {
    /// Waiting for (more of) a request.
    Reading,
    /// A complete request needs handling.
    Processing(Request),
    /// A response is ready to be sent.
    Writing(Response),
    /// Connection is being terminated.
    Closed,
}

/// What the reading state produced.
enum ReadOutcome {
    /// A complete request was framed.
    Request(Request),
    /// An error response must be sent before closing.
    Reply(Response),
    /// The connection is done (hangup, timeout, eviction, I/O error).
    Closed,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer_ip: String,
        buffer: PooledBuffer,
        permit: Permit,
        registration: Registration,
        ctx: Arc<ConnectionContext>,
    ) -> Self {
        let now = Instant::now();
        Self {
            stream,
            peer_ip,
            buffer,
            filled: 0,
            state: ConnectionState::Reading,
            started: now,
            last_activity: now,
            total_received: 0,
            current_request: None,
            request_start: None,
            registration,
            ctx,
            _permit: permit,
        }
    }

    /// Runs the connection state machine until the connection closes.
    pub async fn run(mut self) {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Reading) {
                ConnectionState::Reading => match self.read_request().await {
                    ReadOutcome::Request(request) => {
                        self.request_start = Some(Instant::now());
                        tracing::debug!(
                            peer = %self.peer_ip,
                            method = %request.method,
                            path = %request.target,
                            "received HTTP request"
                        );
                        self.state = ConnectionState::Processing(request);
                    }
                    ReadOutcome::Reply(response) => {
                        self.state = ConnectionState::Writing(response);
                    }
                    ReadOutcome::Closed => {
                        self.state = ConnectionState::Closed;
                    }
                },

                ConnectionState::Processing(request) => {
                    self.current_request =
                        Some((request.method.to_string(), request.target.clone()));
                    let response = handler::handle(&request, &self.ctx.handler).await;
                    self.ctx.requests.fetch_add(1, Ordering::Relaxed);

                    if let Some(start) = self.request_start.take() {
                        tracing::info!(
                            peer = %self.peer_ip,
                            method = %request.method,
                            path = %request.target,
                            status = response.status.as_u16(),
                            duration_ms = start.elapsed().as_millis() as u64,
                            "request completed"
                        );
                    }

                    self.state = ConnectionState::Writing(response);
                }

                ConnectionState::Writing(mut response) => {
                    let status = response.status.as_u16();
                    let keep_alive = response.keep_alive;

                    match writer::write_response(&mut self.stream, &mut response).await {
                        Ok(written) => {
                            let (method, target) = self
                                .current_request
                                .take()
                                .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
                            self.ctx
                                .access_log
                                .log(&self.peer_ip, &method, &target, status, written);

                            self.touch();
                            if keep_alive {
                                self.state = ConnectionState::Reading;
                            } else {
                                self.state = ConnectionState::Closed;
                            }
                        }
                        Err(error) => {
                            // Resets and broken pipes mid-send are routine.
                            tracing::debug!(peer = %self.peer_ip, %error, "send failed");
                            self.state = ConnectionState::Closed;
                        }
                    }
                }

                ConnectionState::Closed => {
                    tracing::debug!(peer = %self.peer_ip, "connection closed");
                    break;
                }
            }
        }
    }

    /// Drains the socket until a complete request is framed, an error reply
    /// is due, or the connection should close.
    ///
    /// Parsing runs before reading so requests pipelined behind a previous
    /// exchange are served from the buffer without touching the socket.
    async fn read_request(&mut self) -> ReadOutcome {
        loop {
            match parse_request(&self.buffer[..self.filled]) {
                Ok((request, consumed)) => {
                    // Move any partial follow-up request to the buffer head.
                    self.buffer.copy_within(consumed..self.filled, 0);
                    self.filled -= consumed;
                    return ReadOutcome::Request(request);
                }
                Err(ParseError::Incomplete) => {
                    if self.filled >= BUFFER_SIZE - 1 {
                        tracing::warn!(peer = %self.peer_ip, "request exceeds buffer");
                        return ReadOutcome::Reply(Self::error_reply(StatusCode::PayloadTooLarge));
                    }
                }
                Err(ParseError::UnsupportedVersion) => {
                    return ReadOutcome::Reply(Self::error_reply(StatusCode::VersionNotSupported));
                }
                Err(_) => {
                    tracing::debug!(peer = %self.peer_ip, "malformed request");
                    return ReadOutcome::Reply(Self::error_reply(StatusCode::BadRequest));
                }
            }

            match self.read_more().await {
                Some(outcome) => return outcome,
                None => continue,
            }
        }
    }

    /// One read attempt bounded by the idle deadline, the slow-request
    /// deadline, and the eviction notice. Returns `None` when new bytes
    /// arrived and parsing should be retried.
    async fn read_more(&mut self) -> Option<ReadOutcome> {
        enum ReadEvent {
            Read(std::io::Result<usize>),
            TimedOut,
            Evicted,
        }

        let deadline = self.read_deadline();
        let limit = BUFFER_SIZE - 1;

        let event = tokio::select! {
            result = tokio::time::timeout_at(
                deadline,
                self.stream.read(&mut self.buffer[self.filled..limit]),
            ) => match result {
                Ok(io) => ReadEvent::Read(io),
                Err(_) => ReadEvent::TimedOut,
            },
            _ = self.registration.evicted() => ReadEvent::Evicted,
        };

        match event {
            ReadEvent::Read(Ok(0)) => {
                tracing::debug!(peer = %self.peer_ip, "client hung up");
                Some(ReadOutcome::Closed)
            }
            ReadEvent::Read(Ok(n)) => {
                self.filled += n;
                self.total_received += n as u64;
                self.touch();
                None
            }
            ReadEvent::Read(Err(error)) => {
                tracing::debug!(peer = %self.peer_ip, %error, "read failed");
                Some(ReadOutcome::Closed)
            }
            ReadEvent::TimedOut => self.handle_timer(),
            ReadEvent::Evicted => {
                tracing::info!(peer = %self.peer_ip, "connection evicted under descriptor pressure");
                Some(ReadOutcome::Closed)
            }
        }
    }

    /// Decides what an expired timer means: slow-client close, idle close,
    /// or nothing yet (deadline moved while we waited).
    fn handle_timer(&self) -> Option<ReadOutcome> {
        let now = Instant::now();

        if self.is_slow_client(now) {
            tracing::warn!(
                peer = %self.peer_ip,
                received = self.total_received,
                open_secs = now.duration_since(self.started).as_secs(),
                "closing slow client"
            );
            return Some(ReadOutcome::Closed);
        }

        if now.duration_since(self.last_activity) >= self.ctx.keep_alive_timeout {
            tracing::info!(
                peer = %self.peer_ip,
                idle_secs = now.duration_since(self.last_activity).as_secs(),
                "idle timeout"
            );
            return Some(ReadOutcome::Closed);
        }

        None
    }

    fn is_slow_client(&self, now: Instant) -> bool {
        self.total_received > 0
            && self.total_received < SLOW_REQUEST_MIN_BYTES
            && now.duration_since(self.started) >= SLOW_REQUEST_THRESHOLD
    }

    /// Next instant at which the timer must fire: the idle deadline, pulled
    /// in by the slow-request deadline while the first bytes trickle.
    fn read_deadline(&self) -> tokio::time::Instant {
        let idle = self.last_activity + self.ctx.keep_alive_timeout;
        let deadline = if self.total_received > 0 && self.total_received < SLOW_REQUEST_MIN_BYTES {
            idle.min(self.started + SLOW_REQUEST_THRESHOLD)
        } else {
            idle
        };
        tokio::time::Instant::from_std(deadline)
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.registration.touch();
    }

    fn error_reply(status: StatusCode) -> Response {
        let mut response = Response::error(status);
        response.keep_alive = !status.forces_close();
        response
    }
}
