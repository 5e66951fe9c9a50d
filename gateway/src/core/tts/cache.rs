//! Single-flight TTS cache
//!
//! Maps a fingerprint to a synthesis result with at-most-one concurrent
//! synthesis per fingerprint. Concurrent callers racing on the same
//! fingerprint see exactly one winner launch the background flight; everyone
//! else subscribes to the entry's completion signal. Completed audio is kept
//! under LRU + TTL bounds; failed flights are removed immediately so the next
//! submission retries fresh.
//!
//! Locking: one mutex over the entry map and the LRU order, held only for
//! map/order mutation — never across I/O, sleeps, or waits on the signal.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::TtsError;
use crate::core::tts::fingerprint;

/// Result broadcast to every waiter of one flight.
type FlightOutcome = Result<Bytes, TtsError>;

/// The seam between the cache and the network. The dispatcher is the only
/// production implementation; tests substitute mocks.
#[async_trait]
pub trait Synthesize: Send + Sync {
    async fn synthesize(
        &self,
        model: &str,
        voice: &str,
        text: &str,
        deadline: Instant,
    ) -> Result<Bytes, TtsError>;
}

enum EntryStatus {
    Pending,
    Completed(Bytes),
}

struct CacheEntry {
    status: EntryStatus,
    created_at: Instant,
    seq: u64,
    signal: watch::Sender<Option<FlightOutcome>>,
}

/// Map + LRU order, kept in lock-step: an entry is reachable from `entries`
/// iff its `seq` is present in `order`.
#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl CacheInner {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Counters for the ops surface.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions_lru: AtomicU64,
    evictions_ttl: AtomicU64,
}

/// Cache stats snapshot returned by `/cache/stats` and `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub size: usize,
    pub completed_entries: usize,
    pub pending_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions_lru: u64,
    pub evictions_ttl: u64,
}

/// Single-flight synthesis cache with LRU + TTL eviction.
pub struct TtsCache {
    inner: Mutex<CacheInner>,
    synth: Arc<dyn Synthesize>,
    max_size: usize,
    ttl: Duration,
    /// Deadline budget for background flights launched by `submit`.
    flight_timeout: Duration,
    counters: CacheCounters,
}

impl TtsCache {
    pub fn new(
        synth: Arc<dyn Synthesize>,
        max_size: usize,
        ttl: Duration,
        flight_timeout: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            synth,
            max_size: max_size.max(1),
            ttl,
            flight_timeout,
            counters: CacheCounters::default(),
        }
    }

    /// Fire-and-forget prefetch. Idempotent: a fingerprint that is already
    /// Pending or Completed is left alone.
    pub fn submit(self: &Arc<Self>, model: &str, voice: &str, text: &str) {
        let fp = fingerprint(model, voice, text);
        {
            let mut inner = self.inner.lock();
            if inner.entries.contains_key(&fp) {
                return;
            }
            self.insert_pending(&mut inner, fp.clone());
        }
        debug!(fingerprint = %&fp[..16], text_len = text.chars().count(), "submitted tts flight");
        self.spawn_flight(fp, model.to_string(), voice.to_string(), text.to_string());
    }

    /// Return the audio for `(model, voice, text)`, waiting up to `deadline`
    /// for an in-flight synthesis. An absent fingerprint behaves as `submit`
    /// followed by a wait on the new entry.
    pub async fn get(
        self: &Arc<Self>,
        model: &str,
        voice: &str,
        text: &str,
        deadline: Instant,
    ) -> Result<Bytes, TtsError> {
        let fp = fingerprint(model, voice, text);

        enum Lookup {
            Ready(Bytes),
            Wait(watch::Receiver<Option<FlightOutcome>>),
            Launch(watch::Receiver<Option<FlightOutcome>>),
        }

        let lookup = {
            let mut inner = self.inner.lock();
            let existing = inner.entries.get(&fp).map(|entry| match &entry.status {
                EntryStatus::Completed(audio) => Ok(audio.clone()),
                EntryStatus::Pending => Err(entry.signal.subscribe()),
            });
            match existing {
                Some(Ok(audio)) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.touch(&mut inner, &fp);
                    Lookup::Ready(audio)
                }
                Some(Err(rx)) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Lookup::Wait(rx)
                }
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let rx = self.insert_pending(&mut inner, fp.clone());
                    Lookup::Launch(rx)
                }
            }
        };

        let rx = match lookup {
            Lookup::Ready(audio) => return Ok(audio),
            Lookup::Wait(rx) => rx,
            Lookup::Launch(rx) => {
                self.spawn_flight(
                    fp.clone(),
                    model.to_string(),
                    voice.to_string(),
                    text.to_string(),
                );
                rx
            }
        };

        self.wait_for_outcome(rx, deadline).await
    }

    async fn wait_for_outcome(
        &self,
        mut rx: watch::Receiver<Option<FlightOutcome>>,
        deadline: Instant,
    ) -> Result<Bytes, TtsError> {
        let outcome = tokio::time::timeout_at(deadline, rx.wait_for(|v| v.is_some()))
            .await
            .map_err(|_| TtsError::Timeout)?
            .map_err(|_| TtsError::Upstream("synthesis abandoned".to_string()))?
            .clone();
        outcome.expect("signal resolved with a value")
    }

    /// Absent → Pending transition; the caller must already hold no lock and
    /// spawn the flight afterwards. Returns a subscription to the new signal.
    fn insert_pending(
        &self,
        inner: &mut CacheInner,
        fp: String,
    ) -> watch::Receiver<Option<FlightOutcome>> {
        let (tx, rx) = watch::channel(None);
        let seq = inner.bump_seq();
        inner.order.insert(seq, fp.clone());
        inner.entries.insert(
            fp,
            CacheEntry {
                status: EntryStatus::Pending,
                created_at: Instant::now(),
                seq,
                signal: tx,
            },
        );
        rx
    }

    fn spawn_flight(self: &Arc<Self>, fp: String, model: String, voice: String, text: String) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = Instant::now() + cache.flight_timeout;
            let result = cache.synth.synthesize(&model, &voice, &text, deadline).await;
            cache.finish_flight(&fp, result);
        });
    }

    /// Resolver: record the outcome, signal every waiter, and maintain the
    /// LRU bound — all under the cache lock. A missing entry means the cache
    /// was cleared mid-flight; the result is discarded.
    fn finish_flight(&self, fp: &str, result: FlightOutcome) {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(fp) {
            debug!(fingerprint = %&fp[..16], "discarding orphaned synthesis result");
            return;
        }

        match result {
            Ok(audio) => {
                let new_seq = inner.bump_seq();
                let entry = inner.entries.get_mut(fp).expect("checked above");
                let old_seq = entry.seq;
                entry.seq = new_seq;
                entry.status = EntryStatus::Completed(audio.clone());
                let _ = entry.signal.send(Some(Ok(audio)));
                inner.order.remove(&old_seq);
                inner.order.insert(new_seq, fp.to_string());
                self.evict_over_capacity(&mut inner);
            }
            Err(err) => {
                warn!(fingerprint = %&fp[..16], error = %err, "tts flight failed");
                let entry = inner.entries.remove(fp).expect("checked above");
                inner.order.remove(&entry.seq);
                let _ = entry.signal.send(Some(Err(err)));
            }
        }
    }

    /// Move a completed entry to the LRU tail.
    fn touch(&self, inner: &mut CacheInner, fp: &str) {
        let new_seq = inner.bump_seq();
        let entry = inner.entries.get_mut(fp).expect("entry present");
        let old_seq = entry.seq;
        entry.seq = new_seq;
        inner.order.remove(&old_seq);
        inner.order.insert(new_seq, fp.to_string());
    }

    /// Evict completed entries from the LRU head until within bounds.
    /// Pending entries are in-flight and never evicted.
    fn evict_over_capacity(&self, inner: &mut CacheInner) {
        while inner.entries.len() > self.max_size {
            let CacheInner { entries, order, .. } = &mut *inner;
            let victim = order
                .iter()
                .find(|(_, fp)| {
                    matches!(entries[fp.as_str()].status, EntryStatus::Completed(_))
                })
                .map(|(seq, fp)| (*seq, fp.clone()));
            match victim {
                Some((seq, fp)) => {
                    order.remove(&seq);
                    entries.remove(&fp);
                    self.counters.evictions_lru.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Remove completed entries older than the TTL.
    fn sweep_expired(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired: Vec<(u64, String)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.status, EntryStatus::Completed(_))
                    && now.duration_since(entry.created_at) > self.ttl
            })
            .map(|(fp, entry)| (entry.seq, fp.clone()))
            .collect();

        let count = expired.len();
        for (seq, fp) in expired {
            inner.order.remove(&seq);
            inner.entries.remove(&fp);
        }
        if count > 0 {
            self.counters
                .evictions_ttl
                .fetch_add(count as u64, Ordering::Relaxed);
            info!(count, "swept expired cache entries");
        }
    }

    /// Spawn the periodic TTL sweeper. The task exits when the cache is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs((self.ttl.as_secs() / 10).max(30));
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => cache.sweep_expired(),
                    None => break,
                }
            }
        })
    }

    /// Drop all entries. In-flight synthesizers keep running; their results
    /// are discarded when they try to store into the missing entry. Waiters
    /// of dropped pending entries fail over the signal. Returns the number of
    /// dropped entries.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        for (_, entry) in inner.entries.drain() {
            if matches!(entry.status, EntryStatus::Pending) {
                let _ = entry
                    .signal
                    .send(Some(Err(TtsError::Upstream("cache cleared".to_string()))));
            }
        }
        inner.order.clear();
        info!(count, "cache cleared");
        count
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let inner = self.inner.lock();
        let pending = inner
            .entries
            .values()
            .filter(|e| matches!(e.status, EntryStatus::Pending))
            .count();
        let size = inner.entries.len();
        drop(inner);

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            size,
            completed_entries: size - pending,
            pending_entries: pending,
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            evictions_lru: self.counters.evictions_lru.load(Ordering::Relaxed),
            evictions_ttl: self.counters.evictions_ttl.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
