//! Per-IP rate limiting and progressive banning.
//!
//! A fixed-size open-addressed table tracks one entry per client IP: request
//! count in the current window, concurrent connections, violation count, and
//! any active ban. Collisions replace the previous occupant; the table never
//! grows, so an attacker cannot make it allocate.
//!
//! Admission hands back a [`Permit`] that decrements the concurrent count on
//! drop, so every admitted connection releases exactly once no matter how it
//! ends.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Slot count of the IP table.
pub const TABLE_SIZE: usize = 4096;

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedReason {
    /// The IP is under an active ban.
    Banned,
    /// The IP already holds the maximum number of concurrent connections.
    TooManyConcurrent,
    /// The IP exceeded the request budget for the current window.
    WindowExceeded,
}

#[derive(Debug, Clone)]
struct Entry {
    ip: String,
    window_start: Instant,
    count: u32,
    last_seen: Instant,
    concurrent: u32,
    violations: u32,
    banned_until: Option<Instant>,
}

/// Shared per-IP admission table.
#[derive(Debug)]
pub struct RateLimiter {
    table: Mutex<Vec<Option<Entry>>>,
    config: RateLimitConfig,
    development_mode: AtomicBool,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, development_mode: bool) -> Self {
        Self {
            table: Mutex::new(vec![None; TABLE_SIZE]),
            config,
            development_mode: AtomicBool::new(development_mode),
        }
    }

    /// Flips development mode (used by config reload).
    pub fn set_development_mode(&self, on: bool) {
        self.development_mode.store(on, Ordering::Relaxed);
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_seconds)
    }

    fn slot_for(ip: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        ip.hash(&mut hasher);
        (hasher.finish() as usize) % TABLE_SIZE
    }

    /// Decides whether a new connection from `ip` may proceed.
    ///
    /// On admission the returned [`Permit`] holds the IP's concurrent slot
    /// until it is dropped. In development mode the verdict is always
    /// admission, but the window and violation counters are maintained as
    /// usual so production behavior can be observed in logs.
    pub fn admit(self: &Arc<Self>, ip: &str, now: Instant) -> Result<Permit, DeniedReason> {
        let verdict = self.check(ip, now);

        match verdict {
            Ok(()) => {}
            Err(reason) => {
                if self.development_mode.load(Ordering::Relaxed) {
                    tracing::debug!(ip = %ip, ?reason, "would deny, admitted in development mode");
                } else {
                    tracing::debug!(ip = %ip, ?reason, "connection denied");
                    return Err(reason);
                }
            }
        }

        let mut table = self.table.lock().unwrap();
        let idx = Self::slot_for(ip);
        if let Some(entry) = table[idx].as_mut() {
            if entry.ip == ip {
                entry.concurrent += 1;
            }
        }
        drop(table);

        Ok(Permit {
            limiter: Arc::clone(self),
            ip: ip.to_string(),
        })
    }

    /// Runs the admission algorithm and updates window bookkeeping, without
    /// touching the concurrent count.
    fn check(&self, ip: &str, now: Instant) -> Result<(), DeniedReason> {
        let window = self.window();
        let mut table = self.table.lock().unwrap();
        let idx = Self::slot_for(ip);
        let slot = &mut table[idx];

        match slot {
            // A live entry for this IP. Stale entries (window started more
            // than two windows ago) fall through to the reset arm below,
            // same as a colliding occupant.
            Some(entry)
                if entry.ip == ip && now.duration_since(entry.window_start) <= window * 2 =>
            {
                entry.last_seen = now;

                if let Some(until) = entry.banned_until {
                    if now < until {
                        return Err(DeniedReason::Banned);
                    }
                    entry.banned_until = None;
                }

                if entry.concurrent >= self.config.max_concurrent {
                    return Err(DeniedReason::TooManyConcurrent);
                }

                if now.duration_since(entry.window_start) >= window {
                    entry.window_start = now;
                    entry.count = 1;
                    return Ok(());
                }

                entry.count += 1;
                if entry.count > self.config.max_requests {
                    entry.violations += 1;
                    if entry.violations >= self.config.max_violations {
                        entry.banned_until =
                            Some(now + Duration::from_secs(self.config.ban_seconds));
                        tracing::warn!(
                            ip = %ip,
                            violations = entry.violations,
                            ban_seconds = self.config.ban_seconds,
                            "IP banned"
                        );
                    }
                    return Err(DeniedReason::WindowExceeded);
                }

                Ok(())
            }
            _ => {
                *slot = Some(Entry {
                    ip: ip.to_string(),
                    window_start: now,
                    count: 1,
                    last_seen: now,
                    concurrent: 0,
                    violations: 0,
                    banned_until: None,
                });
                Ok(())
            }
        }
    }

    /// Gives back one concurrent slot for `ip`. Called from [`Permit::drop`].
    fn release(&self, ip: &str) {
        let mut table = self.table.lock().unwrap();
        let idx = Self::slot_for(ip);
        if let Some(entry) = table[idx].as_mut() {
            if entry.ip == ip && entry.concurrent > 0 {
                entry.concurrent -= 1;
            }
        }
    }

    /// Drops entries idle for more than four windows and not under a ban.
    pub fn sweep(&self, now: Instant) {
        let window = self.window();
        let mut table = self.table.lock().unwrap();
        for slot in table.iter_mut() {
            let stale = match slot {
                Some(entry) => {
                    let banned = entry.banned_until.map(|until| now < until).unwrap_or(false);
                    !banned && now.duration_since(entry.last_seen) >= window * 4
                }
                None => false,
            };
            if stale {
                *slot = None;
            }
        }
    }

    /// Concurrent connections currently attributed to `ip`.
    pub fn concurrent(&self, ip: &str) -> u32 {
        let table = self.table.lock().unwrap();
        let idx = Self::slot_for(ip);
        match &table[idx] {
            Some(entry) if entry.ip == ip => entry.concurrent,
            _ => 0,
        }
    }
}

/// Hold on one admitted connection. Dropping it performs the mandatory
/// release of the IP's concurrent slot.
#[derive(Debug)]
pub struct Permit {
    limiter: Arc<RateLimiter>,
    ip: String,
}

impl Permit {
    pub fn ip(&self) -> &str {
        &self.ip
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release(&self.ip);
    }
}
