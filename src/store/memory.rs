//! In-process window store with lazy and background expiry.
//!
//! Locking is two-level. The structural lock (`Inner::entries`) guards the
//! shape of the key map and is only held for O(1) lookups and inserts, or for
//! one sweep pass. Each entry has its own async lock that serializes
//! acquire/release pairs for that key. Nothing ever waits for an entry lock
//! while holding the structural lock: acquirers release it first, and the
//! sweeper only uses `try_lock`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::{Lease, Store};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::ratelimit::Window;

/// How often the background sweeper looks for expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Stored state of one key.
struct Slot {
    window: Window,
    expires_at: DateTime<Utc>,
    /// Set by the sweeper when the entry is unlinked from the map
    retired: bool,
}

impl Slot {
    fn fresh(expires_at: DateTime<Utc>) -> Self {
        Self {
            window: Window::new(),
            expires_at,
            retired: false,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        self.expires_at
            .signed_duration_since(now)
            .num_seconds()
            .max(0) as u64
    }
}

struct Entry {
    slot: Arc<AsyncMutex<Slot>>,
    /// Guard held between `acquire` and `release`
    lease: Mutex<Option<OwnedMutexGuard<Slot>>>,
}

impl Entry {
    fn new(slot: Slot) -> Self {
        Self {
            slot: Arc::new(AsyncMutex::new(slot)),
            lease: Mutex::new(None),
        }
    }
}

struct Inner {
    entries: Mutex<HashMap<String, Arc<Entry>>>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl Inner {
    /// Look up the entry for `key`, creating it if absent.
    fn entry(&self, key: &str) -> Arc<Entry> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            return Arc::clone(entry);
        }

        debug!(key = %key, "Creating window entry");
        let entry = Arc::new(Entry::new(Slot::fresh(expiry(self.clock.now(), self.ttl))));
        entries.insert(key.to_string(), Arc::clone(&entry));
        entry
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|key, entry| {
            // A held entry is in use; its holder decides its expiry
            let Ok(mut slot) = entry.slot.try_lock() else {
                return true;
            };
            if !slot.is_expired(now) {
                return true;
            }
            slot.retired = true;
            trace!(key = %key, "Sweeping expired window");
            false
        });

        before - entries.len()
    }
}

/// A [`Store`] that keeps windows in process memory.
///
/// Expired entries are replaced on their next acquisition and removed by a
/// background task. Must be created from within a Tokio runtime.
pub struct MemoryStore {
    inner: Arc<Inner>,
    sweeper: JoinHandle<()>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .field("ttl", &self.inner.ttl)
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store whose entries live `ttl_secs` unless refreshed.
    ///
    /// The sweeper runs every [`DEFAULT_SWEEP_INTERVAL`] until `shutdown`
    /// resolves.
    pub fn new<F>(ttl_secs: u64, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::with_clock(ttl_secs, Arc::new(SystemClock), DEFAULT_SWEEP_INTERVAL, shutdown)
    }

    /// Create a store with an explicit clock and sweep cadence.
    pub fn with_clock<F>(
        ttl_secs: u64,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
        shutdown: F,
    ) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::new(Inner {
            entries: Mutex::new(HashMap::new()),
            ttl: secs(ttl_secs),
            clock,
        });
        let sweeper = spawn_sweeper(Arc::clone(&inner), sweep_interval, shutdown);

        Self { inner, sweeper }
    }

    /// Number of entries currently in the map, expired or not.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Default lifetime of a new entry, in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.inner.ttl.num_seconds().max(0) as u64
    }

    /// Run one sweep pass now and return how many entries were removed.
    ///
    /// Entries that are currently acquired are skipped.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Whether the background sweeper is still running.
    pub fn is_sweeping(&self) -> bool {
        !self.sweeper.is_finished()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn acquire(&self, key: &str) -> Result<Lease, StoreError> {
        loop {
            let entry = self.inner.entry(key);
            let mut slot = Arc::clone(&entry.slot).lock_owned().await;

            // Unlinked by the sweeper while we waited; look it up again
            if slot.retired {
                trace!(key = %key, "Entry was swept while waiting, retrying");
                continue;
            }

            let now = self.inner.clock.now();
            if slot.is_expired(now) {
                debug!(key = %key, "Replacing expired window");
                *slot = Slot::fresh(expiry(now, self.inner.ttl));
            }

            let lease = Lease {
                window: slot.window.clone(),
                ttl_secs: slot.remaining_secs(now),
            };
            *entry.lease.lock() = Some(slot);
            return Ok(lease);
        }
    }

    async fn release(
        &self,
        key: &str,
        window: Option<Window>,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let entry = self.inner.entries.lock().get(key).cloned();
        let held = match &entry {
            Some(entry) => entry.lease.lock().take(),
            None => None,
        };

        let Some(mut slot) = held else {
            warn!(key = %key, "Release without a matching acquire");
            return Err(StoreError::NotAcquired {
                key: key.to_string(),
            });
        };

        if let Some(window) = window {
            slot.window = window;
            slot.expires_at = expiry(self.inner.clock.now(), secs(ttl_secs));
        }
        Ok(())
    }
}

fn spawn_sweeper<F>(inner: Arc<Inner>, every: Duration, shutdown: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = every.as_millis() as u64, "Window sweeper started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let removed = inner.purge_expired();
                    if removed > 0 {
                        debug!(removed = removed, "Swept expired windows");
                    }
                }
            }
        }
        info!("Window sweeper stopped");
    })
}

fn secs(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn expiry(now: DateTime<Utc>, ttl: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
