//! Reading Cache: TTL entries with single-flight refresh.
//!
//! - A live entry (same operating mode, not yet expired) is returned without
//!   touching the adapter.
//! - Otherwise exactly one caller runs the refresh; every concurrent caller
//!   for the same sensor and mode waits for that call's result, error
//!   included.
//! - A failed refresh leaves the previous entry in place but never serves it
//!   as fresh; [`ReadingCache::get_or_stale`] and [`ReadingCache::last_known`]
//!   offer it re-tagged `stale`.
//!
//! Only `real` and `simulated` readings are stored.  Stale readings from an
//! open circuit pass straight through so the circuit is consulted on every
//! cycle.
//!
//! Expiry uses [`tokio::time::Instant`] so tests can drive it with a paused
//! clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use os4ai_hal::{ManagedAdapter, OperatingMode};
use os4ai_types::{AdapterError, Quality, SensorId, SensorReading};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

type RefreshResult = Result<SensorReading, AdapterError>;
type FlightKey = (SensorId, OperatingMode);

#[derive(Debug, Clone)]
struct CacheEntry {
    reading: SensorReading,
    expires_at: Instant,
    mode: OperatingMode,
}

impl CacheEntry {
    fn is_live(&self, mode: OperatingMode, now: Instant) -> bool {
        self.mode == mode && now < self.expires_at
    }
}

#[derive(Default)]
pub struct ReadingCache {
    entries: Mutex<HashMap<SensorId, CacheEntry>>,
    in_flight: Mutex<HashMap<FlightKey, watch::Receiver<Option<RefreshResult>>>>,
    refreshes: AtomicU64,
}

enum Role {
    /// The entry became live while this caller was between checks.
    Hit(SensorReading),
    Leader(watch::Sender<Option<RefreshResult>>),
    Follower(watch::Receiver<Option<RefreshResult>>),
}

/// Removes the in-flight marker even if the leader is cancelled mid-poll.
struct FlightGuard<'a> {
    cache: &'a ReadingCache,
    key: FlightKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.flights().remove(&self.key);
    }
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SensorId, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flights(&self) -> MutexGuard<'_, HashMap<FlightKey, watch::Receiver<Option<RefreshResult>>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refreshes actually run (coalesced waiters do not count).
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn live(&self, id: &SensorId, mode: OperatingMode) -> Option<SensorReading> {
        let now = Instant::now();
        self.entries()
            .get(id)
            .filter(|e| e.is_live(mode, now))
            .map(|e| e.reading.clone())
    }

    /// Join the refresh in flight for `key` or register a new one.
    ///
    /// The live entry is checked again under the flights lock: a leader
    /// stores its entry before its flight is removed, so a caller that missed
    /// in [`ReadingCache::live`] and then finds no flight sees that entry
    /// here instead of polling again.
    fn join_or_lead(&self, key: &FlightKey) -> Role {
        let mut flights = self.flights();
        if let Some(reading) = self.live(&key.0, key.1) {
            return Role::Hit(reading);
        }
        if let Some(rx) = flights.get(key)
            && rx.has_changed().is_ok()
        {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), rx);
        Role::Leader(tx)
    }

    /// The cached reading for `adapter` if live under `mode`, otherwise the
    /// result of a single coalesced refresh.
    ///
    /// # Errors
    ///
    /// The refresh's [`AdapterError`], delivered to every waiter.
    pub async fn get_or_refresh(
        &self,
        adapter: &ManagedAdapter,
        ttl: Duration,
        mode: OperatingMode,
    ) -> RefreshResult {
        let id = adapter.id();
        loop {
            if let Some(reading) = self.live(id, mode) {
                trace!(sensor = %id, "cache hit");
                return Ok(reading);
            }

            let key = (id.clone(), mode);
            match self.join_or_lead(&key) {
                Role::Hit(reading) => {
                    trace!(sensor = %id, "cache hit after refresh");
                    return Ok(reading);
                }
                Role::Follower(mut rx) => {
                    debug!(sensor = %id, "joining in-flight refresh");
                    match rx.wait_for(Option::is_some).await {
                        Ok(done) => {
                            if let Some(result) = done.as_ref() {
                                return result.clone();
                            }
                        }
                        // Leader was cancelled before finishing; start over.
                        Err(_) => continue,
                    }
                }
                Role::Leader(tx) => {
                    let _guard = FlightGuard { cache: self, key };
                    self.refreshes.fetch_add(1, Ordering::Relaxed);
                    let result = adapter.poll(mode).await;
                    if let Ok(reading) = &result
                        && matches!(reading.quality, Quality::Real | Quality::Simulated)
                    {
                        self.entries().insert(
                            id.clone(),
                            CacheEntry {
                                reading: reading.clone(),
                                expires_at: Instant::now() + ttl,
                                mode,
                            },
                        );
                    }
                    tx.send_replace(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    /// Like [`ReadingCache::get_or_refresh`], but a failed refresh falls back
    /// to the previous entry for this mode, re-tagged `stale`.
    ///
    /// # Errors
    ///
    /// The refresh error when there is nothing to fall back to.
    pub async fn get_or_stale(
        &self,
        adapter: &ManagedAdapter,
        ttl: Duration,
        mode: OperatingMode,
    ) -> RefreshResult {
        match self.get_or_refresh(adapter, ttl, mode).await {
            Ok(reading) => Ok(reading),
            Err(e) => self.last_known(adapter.id().as_str(), mode).ok_or(e),
        }
    }

    /// The last stored reading for `id` under `mode`, re-tagged `stale`,
    /// regardless of expiry.
    pub fn last_known(&self, id: &str, mode: OperatingMode) -> Option<SensorReading> {
        self.entries()
            .get(id)
            .filter(|e| e.mode == mode)
            .map(|e| e.reading.retagged(Quality::Stale))
    }

    /// Drop the entry for `id` so the next read refreshes.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.entries().remove(id).is_some();
        if removed {
            debug!(sensor = id, "cache entry invalidated");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
