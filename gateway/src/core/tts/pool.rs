//! TTS backend pool
//!
//! Tracks per-backend load and health for the configured synthesis endpoints.
//! Selection picks the least-loaded backend that is neither saturated nor in
//! cooldown; ties break on fewest consecutive failures, then fewest total
//! requests (which degenerates to round-robin on an idle pool).
//!
//! A backend enters cooldown after 3 consecutive failures:
//! `now + min(30s * 2^(failures - 3), 5min)`. One success clears it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::TtsError;

const COOLDOWN_THRESHOLD: u32 = 3;
const COOLDOWN_BASE: Duration = Duration::from_secs(30);
const COOLDOWN_CEILING: Duration = Duration::from_secs(300);

/// Static backend identity.
#[derive(Debug, Clone)]
struct Backend {
    url: String,
    max_concurrent: usize,
}

/// Mutable per-backend state, guarded by the pool mutex.
#[derive(Debug, Default)]
struct BackendState {
    in_flight: usize,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
    total_response_time: Duration,
    completed_requests: u64,
}

/// Snapshot of one backend for `/health` and tests.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStat {
    pub url: String,
    pub available: bool,
    pub in_flight: usize,
    pub consecutive_failures: u32,
    pub cooldown_remaining_ms: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub avg_response_time_ms: u64,
}

/// Pool of TTS backends with per-backend concurrency gates and cooldown.
pub struct BackendPool {
    backends: Vec<Backend>,
    state: Mutex<Vec<BackendState>>,
    released: Notify,

    // Balancer-level totals, independent of per-backend attempts
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl BackendPool {
    pub fn new(urls: Vec<String>, max_concurrent: usize) -> Self {
        let backends: Vec<Backend> = urls
            .into_iter()
            .map(|url| Backend {
                url: url.trim_end_matches('/').to_string(),
                max_concurrent,
            })
            .collect();
        let state = (0..backends.len()).map(|_| BackendState::default()).collect();
        Self {
            backends,
            state: Mutex::new(state),
            released: Notify::new(),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Acquire a backend slot, waiting until one frees up or the deadline
    /// passes. The returned lease releases the slot on drop regardless of the
    /// request outcome.
    pub async fn acquire(self: &Arc<Self>, deadline: Instant) -> Result<BackendLease, TtsError> {
        loop {
            if let Some(index) = self.try_select() {
                debug!(url = %self.backends[index].url, "acquired tts backend slot");
                return Ok(BackendLease {
                    pool: Arc::clone(self),
                    index,
                });
            }
            let released = self.released.notified();
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(TtsError::Timeout);
            }
        }
    }

    /// One selection pass under the lock. Increments `in_flight` and
    /// `total_requests` for the winner.
    fn try_select(&self) -> Option<usize> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let mut best: Option<(usize, (usize, u32, u64))> = None;
        for i in 0..state.len() {
            let s = &state[i];
            if s.in_flight >= self.backends[i].max_concurrent {
                continue;
            }
            if s.cooldown_until.is_some_and(|until| until > now) {
                continue;
            }
            let key = (s.in_flight, s.consecutive_failures, s.total_requests);
            if best.map_or(true, |(_, best_key)| key < best_key) {
                best = Some((i, key));
            }
        }

        let (index, _) = best?;
        state[index].in_flight += 1;
        state[index].total_requests += 1;
        Some(index)
    }

    fn report_success(&self, index: usize, elapsed: Duration) {
        let mut state = self.state.lock();
        let s = &mut state[index];
        s.consecutive_failures = 0;
        s.cooldown_until = None;
        s.total_response_time += elapsed;
        s.completed_requests += 1;
    }

    fn report_failure(&self, index: usize) {
        let mut state = self.state.lock();
        let s = &mut state[index];
        s.consecutive_failures += 1;
        s.total_failures += 1;
        if s.consecutive_failures >= COOLDOWN_THRESHOLD {
            let exp = (s.consecutive_failures - COOLDOWN_THRESHOLD).min(16);
            let cooldown = COOLDOWN_BASE
                .checked_mul(1u32 << exp)
                .map_or(COOLDOWN_CEILING, |d| d.min(COOLDOWN_CEILING));
            s.cooldown_until = Some(Instant::now() + cooldown);
            warn!(
                url = %self.backends[index].url,
                consecutive_failures = s.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "tts backend entered cooldown"
            );
        }
    }

    fn release(&self, index: usize) {
        {
            let mut state = self.state.lock();
            state[index].in_flight = state[index].in_flight.saturating_sub(1);
        }
        self.released.notify_waiters();
    }

    /// Record one logical synthesis request (across all its attempts).
    pub fn note_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Per-backend snapshots for the ops surface. Never blocks on I/O.
    pub fn stats(&self) -> Vec<BackendStat> {
        let state = self.state.lock();
        let now = Instant::now();
        self.backends
            .iter()
            .zip(state.iter())
            .map(|(backend, s)| {
                let cooldown_remaining = s
                    .cooldown_until
                    .map(|until| until.saturating_duration_since(now))
                    .unwrap_or(Duration::ZERO);
                let avg = if s.completed_requests > 0 {
                    s.total_response_time.as_millis() as u64 / s.completed_requests
                } else {
                    0
                };
                BackendStat {
                    url: backend.url.clone(),
                    available: cooldown_remaining.is_zero()
                        && s.in_flight < backend.max_concurrent,
                    in_flight: s.in_flight,
                    consecutive_failures: s.consecutive_failures,
                    cooldown_remaining_ms: cooldown_remaining.as_millis() as u64,
                    total_requests: s.total_requests,
                    total_failures: s.total_failures,
                    avg_response_time_ms: avg,
                }
            })
            .collect()
    }

    /// Balancer-level request totals: (requests, successes, failures).
    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.requests.load(Ordering::Relaxed),
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }

    pub fn backend_url(&self, index: usize) -> &str {
        &self.backends[index].url
    }
}

/// RAII slot on one backend. Dropping the lease frees the slot and wakes
/// waiters blocked in `acquire`.
pub struct BackendLease {
    pool: Arc<BackendPool>,
    index: usize,
}

impl BackendLease {
    pub fn url(&self) -> &str {
        self.pool.backend_url(self.index)
    }

    pub fn report_success(&self, elapsed: Duration) {
        self.pool.report_success(self.index, elapsed);
    }

    pub fn report_failure(&self) {
        self.pool.report_failure(self.index);
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}
