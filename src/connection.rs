//! Connection Module
//!
//! The public face of the engine. A [`Connection`] owns the in-memory store,
//! the expiry timers and the open cache file, and exposes the lifecycle
//! (`start`/`stop`) and data operations (`get`/`set`/`drop`).
//!
//! # Lifecycle
//! ```text
//! Stopped ──start──▶ Starting ──restore ok──▶ Started ──stop──▶ Stopped
//!                        │
//!                        └──restore failed──▶ Stopped
//! ```
//!
//! All state sits behind one async mutex. Timer and save tasks only hold a
//! weak reference, so dropping the last handle tears everything down.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{
    current_timestamp_ms, validate_segment_name, CacheStats, CachedItem, Envelope, Key, Store,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::{persist, ExpiryScheduler, Persistence, SaveFailure};

/// Buffered save failure reports per subscriber
const SAVE_FAILURE_CAPACITY: usize = 16;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Stopped,
    Starting,
    Started,
}

// == Connection ==
/// Handle to a file-backed cache engine.
///
/// Cloning produces another handle to the same engine.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    state: Mutex<State>,
    save_failures: broadcast::Sender<SaveFailure>,
}

#[derive(Debug, Default)]
struct State {
    status: ConnectionState,
    /// Incremented on every start; background tasks from older sessions bail out
    session: u64,
    store: Store,
    timers: ExpiryScheduler,
    persistence: Option<Persistence>,
    /// Incremented on every store mutation
    mutations: u64,
    stats: CacheStats,
}

impl State {
    fn ensure_started(&self) -> Result<()> {
        if self.status == ConnectionState::Started && self.persistence.is_some() {
            Ok(())
        } else {
            Err(CacheError::NotStarted)
        }
    }
}

impl Connection {
    // == Constructor ==
    /// Creates a stopped connection after validating `config`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (save_failures, _) = broadcast::channel(SAVE_FAILURE_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
                save_failures,
            }),
        })
    }

    /// Configuration this connection was built with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    // == Start ==
    /// Opens the cache file and restores its content.
    ///
    /// Restored entries that already expired are evicted right away; the
    /// others get a timer for their remaining TTL. On failure the connection
    /// stays stopped with nothing restored. Starting a started connection is a
    /// no-op.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;

        if state.status == ConnectionState::Started {
            debug!("Connection already started");
            return Ok(());
        }

        state.status = ConnectionState::Starting;
        let (persistence, store) = match Persistence::open(&self.shared.config.cache_file) {
            Ok(opened) => opened,
            Err(e) => {
                state.status = ConnectionState::Stopped;
                warn!(error = %e, "Cache restore failed");
                return Err(e);
            }
        };

        state.session += 1;
        state.store = store;
        state.persistence = Some(persistence);
        state.mutations = 0;
        state.status = ConnectionState::Started;

        self.shared.schedule_restored(state);

        info!(
            path = %self.shared.config.cache_file.display(),
            entries = state.store.len(),
            timers = state.timers.len(),
            "Connection started"
        );
        Ok(())
    }

    // == Stop ==
    /// Cancels all timers, rewrites the file with the final state and closes it.
    ///
    /// Safe to call in any state. A failed final write is returned, but the
    /// connection is stopped either way.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;

        let cancelled = state.timers.cancel_all();
        state.status = ConnectionState::Stopped;

        let Some(mut persistence) = state.persistence.take() else {
            state.store = Store::new();
            return Ok(());
        };

        let saved = match state.store.to_json() {
            Ok(document) => persistence.save_now(&document).await,
            Err(e) => Err(e),
        };
        let closed = persistence.close().await;

        match &saved {
            Ok(()) => state.stats.record_save(),
            Err(e) => error!(error = %e, "Final save failed"),
        }

        info!(
            entries = state.store.len(),
            timers_cancelled = cancelled,
            "Connection stopped"
        );
        state.store = Store::new();

        saved?;
        closed
    }

    /// True only while started with an open file.
    pub async fn is_ready(&self) -> bool {
        self.shared.state.lock().await.ensure_started().is_ok()
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.state.lock().await.status
    }

    /// Rejects empty segment names and names containing a NUL byte.
    pub fn validate_segment_name(&self, name: &str) -> Result<()> {
        validate_segment_name(name)
    }

    // == Get ==
    /// Looks up `key`. Returns `Ok(None)` when it is absent.
    ///
    /// Reads only the in-memory store. A payload that fails to decode as `T`
    /// yields [`CacheError::CorruptValue`] for this key alone.
    pub async fn get<T: DeserializeOwned>(&self, key: &Key) -> Result<Option<CachedItem<T>>> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        state.ensure_started()?;

        let Some(envelope) = state.store.get(key) else {
            state.stats.record_miss();
            return Ok(None);
        };

        let item = envelope.decode(key)?;
        let result = CachedItem {
            item,
            stored: envelope.stored,
            ttl: Duration::from_millis(envelope.ttl),
        };

        state.stats.record_hit();
        Ok(Some(result))
    }

    // == Set ==
    /// Stores `value` at `key` for `ttl`, replacing any previous value.
    ///
    /// The value is serialized immediately, so later changes to the caller's
    /// object do not reach the cache. Rearms the key's expiry timer and
    /// schedules a debounced save. Fails without touching the store when the
    /// value cannot be serialized or the byte ceiling would be exceeded.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &Key, value: &T, ttl: Duration) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        state.ensure_started()?;

        let config = &self.shared.config;
        let envelope = Envelope::encode(key, value, ttl, config.size_accounting())?;

        if let Err(e) = state.store.insert(key, envelope, config.max_byte_size) {
            state.stats.record_rejected();
            warn!(segment = %key.segment, id = %key.id, error = %e, "Write rejected");
            return Err(e);
        }

        state.mutations += 1;
        state.stats.record_set();
        self.shared.arm_expiry(state, key.clone(), ttl);
        self.shared.request_save(state);
        Ok(())
    }

    // == Drop ==
    /// Removes `key` and cancels its expiry timer. Absent keys are not an error.
    pub async fn drop(&self, key: &Key) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        state.ensure_started()?;

        if self.shared.remove_entry(state, key).is_some() {
            state.stats.record_drop();
        }
        Ok(())
    }

    // == Stats ==
    /// Returns counters plus the current entry, segment and byte totals.
    pub async fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock().await;
        let mut stats = state.stats.clone();
        stats.set_totals(
            state.store.len(),
            state.store.segment_count(),
            state.store.byte_size(),
        );
        stats
    }

    /// Subscribes to reports of background saves that failed to write.
    pub fn subscribe_save_failures(&self) -> broadcast::Receiver<SaveFailure> {
        self.shared.save_failures.subscribe()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Shared {
    /// Evicts expired restored entries and arms timers for the rest.
    fn schedule_restored(self: &Arc<Self>, state: &mut State) {
        let now = current_timestamp_ms();
        let plan: Vec<(Key, Option<Duration>)> = state
            .store
            .iter()
            .map(|(key, envelope)| (key, envelope.time_left(now)))
            .collect();

        let mut expired = 0usize;
        for (key, time_left) in plan {
            match time_left {
                Some(delay) => self.arm_expiry(state, key, delay),
                None => {
                    if self.remove_entry(state, &key).is_some() {
                        state.stats.record_expiration();
                        expired += 1;
                    }
                }
            }
        }

        if expired > 0 {
            debug!(expired, "Evicted entries that expired while stopped");
        }
    }

    fn arm_expiry(self: &Arc<Self>, state: &mut State, key: Key, ttl: Duration) {
        let shared = Arc::downgrade(self);
        let session = state.session;

        state.timers.arm(key, ttl, move |key, token| async move {
            if let Some(shared) = shared.upgrade() {
                shared.expire(session, key, token).await;
            }
        });
    }

    /// Timer callback: removes `key` if this timer is still the current one.
    ///
    /// Never reports errors; a stale or late timer simply does nothing.
    async fn expire(self: &Arc<Self>, session: u64, key: Key, token: u64) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.session != session || state.status != ConnectionState::Started {
            return;
        }
        if !state.timers.complete(&key, token) {
            trace!(segment = %key.segment, id = %key.id, "Stale expiry timer ignored");
            return;
        }

        if self.remove_entry(state, &key).is_some() {
            state.stats.record_expiration();
            debug!(segment = %key.segment, id = %key.id, "Entry expired");
        }
    }

    /// Shared drop path for explicit drops and evictions.
    fn remove_entry(self: &Arc<Self>, state: &mut State, key: &Key) -> Option<Envelope> {
        state.timers.cancel(key);

        let removed = state.store.remove(key)?;
        state.mutations += 1;
        self.request_save(state);
        Some(removed)
    }

    /// Schedules a debounced background save unless one is already pending.
    fn request_save(self: &Arc<Self>, state: &mut State) {
        let session = state.session;
        let Some(persistence) = state.persistence.as_mut() else {
            return;
        };

        let shared = Arc::downgrade(self);
        let scheduled = persistence.schedule(self.config.save_debounce, move || async move {
            if let Some(shared) = shared.upgrade() {
                shared.run_save(session).await;
            }
        });

        if scheduled {
            trace!(debounce_ms = self.config.save_debounce.as_millis(), "Save scheduled");
        }
    }

    /// Background save: snapshot under the lock, write outside it.
    ///
    /// Mutations made while the write is in flight leave the mutation counter
    /// ahead of the snapshot, which schedules a follow-up save.
    async fn run_save(self: &Arc<Self>, session: u64) {
        let (file, document, snapshot_at) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            if state.session != session {
                return;
            }
            let Some(persistence) = state.persistence.as_mut() else {
                return;
            };

            let file = persistence.begin_save();
            match state.store.to_json() {
                Ok(document) => (file, document, state.mutations),
                Err(e) => {
                    persistence.finish_save();
                    error!(error = %e, "Failed to serialize cache for saving");
                    return;
                }
            }
        };

        let outcome = persist::write_snapshot(&file, &document).await;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        match outcome {
            Ok(true) => {
                state.stats.record_save();
                debug!(bytes = document.len(), "Cache file saved");
            }
            Ok(false) => debug!("Cache file closed before background save"),
            Err(e) => {
                state.stats.record_save_failure();
                error!(
                    path = %self.config.cache_file.display(),
                    error = %e,
                    "Background save failed"
                );
                // No subscribers is not an error
                let _ = self.save_failures.send(SaveFailure {
                    path: self.config.cache_file.clone(),
                    message: e.to_string(),
                    at: current_timestamp_ms(),
                });
            }
        }

        if state.session != session {
            return;
        }
        if let Some(persistence) = state.persistence.as_mut() {
            persistence.finish_save();
        }
        if state.status == ConnectionState::Started && state.mutations != snapshot_at {
            self.request_save(state);
        }
    }
}
