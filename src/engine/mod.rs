//! Cache Engine
//!
//! The reactive cache: an authoritative in-memory entry table persisted to a
//! [`PersistentStore`], refreshed in the background, bounded by an
//! [`EvictionPolicy`], and replicated to sibling instances over a
//! [`BroadcastTransport`].
//!
//! All state sits behind one mutex that is never held across an `.await`.
//! Same-key operations are not queued; each one captures a generation token
//! and re-validates it after every suspension before committing.

mod load;
mod refresh;
mod subscriptions;
mod sync;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    current_timestamp_ms, duration_ms, validate_key, CacheEntry, CacheStats, EntryTable,
    EvictionPolicy, RefreshFn, Refresher,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::persist::{PersistentStore, StoredRecord};
use crate::tasks::{spawn_broadcast_task, spawn_gc_task, spawn_persist_task, StoreOp, Sweep};
use crate::transport::{BroadcastTransport, SyncMessage};

pub use refresh::RefreshOutcome;
pub use subscriptions::{KeyListener, SnapshotListener, Subscription};

use subscriptions::SubscriptionRegistry;

/// Callback receiving store and refresher failures.
pub type DiagnosticHook = Arc<dyn Fn(&CacheError) + Send + Sync>;

// == Options & Outcomes ==
/// Read options for [`CacheEngine::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Reset a fresh entry's expiry to now + ttl
    pub extend: bool,
    /// Serve an expired value while a bound refresher fetches a new one
    pub stale_while_revalidate: bool,
}

impl GetOptions {
    pub fn extend() -> Self {
        Self {
            extend: true,
            ..Self::default()
        }
    }

    pub fn stale_while_revalidate() -> Self {
        Self {
            stale_while_revalidate: true,
            ..Self::default()
        }
    }
}

/// Result of [`CacheEngine::mutate`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutateOutcome {
    /// The mutator's value was written
    Applied(Value),
    /// Another write or refresh committed first; the mutator's value was dropped
    Superseded,
}

/// Inspection view of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub expiry: u64,
    pub ttl_ms: u64,
    pub fresh: bool,
    pub refresher_id: Option<String>,
    pub refresher_bound: bool,
    pub generation: u64,
}

// == Engine State ==
struct Timer {
    token: u64,
    handle: JoinHandle<()>,
}

struct Outbound {
    persist: mpsc::UnboundedSender<StoreOp>,
    broadcast: Option<mpsc::UnboundedSender<SyncMessage>>,
}

#[derive(Default)]
struct EngineState {
    table: EntryTable,
    stats: CacheStats,
    /// refresher id -> function, for rebinding after reload or remote sync
    fetchers: HashMap<String, RefreshFn>,
    timers: HashMap<String, Timer>,
    /// key -> token of the refresh attempt whose refresher call is running
    in_flight: HashMap<String, u64>,
    gc: Option<JoinHandle<()>>,
    outbound: Option<Outbound>,
    /// Keys written or removed locally while the initial load runs
    loading: bool,
    load_skips: HashSet<String>,
    load_discard: bool,
}

impl EngineState {
    fn persist(&self, op: StoreOp) {
        if let Some(outbound) = &self.outbound {
            // A closed queue only happens after destroy.
            let _ = outbound.persist.send(op);
        }
    }

    fn broadcast(&self, message: SyncMessage) {
        if let Some(sender) = self.outbound.as_ref().and_then(|o| o.broadcast.as_ref()) {
            let _ = sender.send(message);
        }
    }

    fn cancel_timer(&mut self, key: &str) {
        if let Some(timer) = self.timers.remove(key) {
            timer.handle.abort();
        }
    }

    /// True while a refresh of the entry's current generation is running.
    fn refreshing(&self, key: &str) -> bool {
        match (self.in_flight.get(key), self.table.generation(key)) {
            (Some(running), Some(current)) => *running == current,
            _ => false,
        }
    }

    fn note_local_write(&mut self, key: &str) {
        if self.loading {
            self.load_skips.insert(key.to_string());
        }
    }

    fn refresh_totals(&mut self) {
        self.stats
            .set_totals(self.table.len(), self.table.total_bytes());
    }

    /// Removes one entry along with its timer; persistence and broadcast are
    /// left to the caller.
    fn detach(&mut self, key: &str) -> Option<CacheEntry> {
        self.cancel_timer(key);
        self.note_local_write(key);
        let removed = self.table.remove(key);
        self.refresh_totals();
        removed
    }
}

pub(crate) struct Inner {
    config: CacheConfig,
    policy: EvictionPolicy,
    state: Mutex<EngineState>,
    subscriptions: SubscriptionRegistry,
    store: Arc<dyn PersistentStore>,
    transport: Option<Arc<dyn BroadcastTransport>>,
    diagnostics: RwLock<Option<DiagnosticHook>>,
    destroyed: AtomicBool,
    ready: watch::Sender<bool>,
    loader: Mutex<Option<JoinHandle<()>>>,
    /// Store writer and broadcast forwarder; they exit once destroy drops their queues.
    writers: Mutex<Vec<JoinHandle<()>>>,
}

// == Cache Engine ==
/// Handle to one cache instance. Clones share the same instance.
///
/// Must be created inside a tokio runtime: construction spawns the store
/// writer, the broadcast forwarder and the initial load.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<Inner>,
}

impl CacheEngine {
    // == Constructor ==
    /// Creates an engine over `store`, optionally joined to siblings via `transport`.
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        transport: Option<Arc<dyn BroadcastTransport>>,
    ) -> Self {
        let policy = EvictionPolicy::new(config.max_entries, config.max_bytes);
        let (ready, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            config,
            policy,
            state: Mutex::new(EngineState::default()),
            subscriptions: SubscriptionRegistry::default(),
            store,
            transport,
            diagnostics: RwLock::new(None),
            destroyed: AtomicBool::new(false),
            ready,
            loader: Mutex::new(None),
            writers: Mutex::new(Vec::new()),
        });

        inner.start();
        info!(namespace = %inner.config.namespace, "cache engine started");
        Self { inner }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.config.namespace
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Resolves once the initial load from the store has finished.
    pub async fn ready(&self) -> Result<()> {
        self.inner.ensure_alive()?;
        let mut ready = self.inner.ready.subscribe();
        // The sender lives as long as `inner`, so this only fails on teardown.
        let _ = ready.wait_for(|loaded| *loaded).await;
        self.inner.ensure_alive()
    }

    /// Installs the callback receiving `StoreFailure` and `RefresherFailure`.
    pub fn set_diagnostic_hook<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        self.inner.ensure_alive()?;
        let mut slot = self
            .inner
            .diagnostics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(hook));
        Ok(())
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl` (config default when `None`).
    ///
    /// A bound refresher is scheduled to run shortly before expiry.
    pub fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        refresher: Option<Refresher>,
    ) -> Result<()> {
        self.inner.ensure_alive()?;
        validate_key(key)?;
        let ttl = self.inner.resolve_ttl(ttl)?;

        let changed = {
            let mut state = self.inner.state();
            self.inner.write_locked(&mut state, key, value, ttl, refresher)
        };
        self.inner.notify(&changed);
        Ok(())
    }

    // == Get ==
    /// Reads `key`.
    ///
    /// Expired entries are removed and reported as absent, unless
    /// stale-while-revalidate is requested and a refresher is bound, in which
    /// case the stale value is returned and a refresh runs in the background.
    pub fn get(&self, key: &str, options: GetOptions) -> Result<Option<Value>> {
        self.inner.ensure_alive()?;
        validate_key(key)?;

        let mut state = self.inner.state();
        let now = current_timestamp_ms();

        let (expired, has_refresher) = match state.table.get(key) {
            Some(entry) => (entry.is_expired_at(now), entry.refresher.is_some()),
            None => {
                state.stats.record_miss();
                return Ok(None);
            }
        };

        if !expired {
            state.stats.record_hit();
            state.table.touch(key);
            if options.extend {
                self.inner.extend_locked(&mut state, key);
            }
            return Ok(state.table.get(key).map(|entry| entry.value.clone()));
        }

        if options.stale_while_revalidate && has_refresher {
            state.stats.record_hit();
            state.table.touch(key);
            let stale = state.table.get(key).map(|entry| entry.value.clone());
            let refreshing = state.refreshing(key);
            drop(state);

            if refreshing {
                return Ok(stale);
            }

            let inner = self.inner.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                inner.run_refresh(&key, None).await;
            });
            return Ok(stale);
        }

        state.stats.record_miss();
        state.stats.record_expired();
        let removed = self.inner.remove_locked(&mut state, key);
        drop(state);

        debug!(key = %key, "expired entry removed on read");
        self.inner.notify(&removed);
        Ok(None)
    }

    /// Raw entry value regardless of freshness, without touching the index.
    pub fn get_raw(&self, key: &str) -> Result<Option<Value>> {
        self.inner.ensure_alive()?;
        Ok(self
            .inner
            .state()
            .table
            .get(key)
            .map(|entry| entry.value.clone()))
    }

    // == Mutate ==
    /// Replaces the value of `key` with the result of `mutator`.
    ///
    /// The mutator sees the current fresh value (or `None`). If any other write
    /// or refresh of the key commits while it runs, its result is discarded.
    pub async fn mutate<F, Fut>(&self, key: &str, mutator: F) -> Result<MutateOutcome>
    where
        F: FnOnce(Option<Value>) -> Fut,
        Fut: Future<Output = Value>,
    {
        self.inner.ensure_alive()?;
        validate_key(key)?;

        let (current, ttl, binding, token) = {
            let mut state = self.inner.state();
            let now = current_timestamp_ms();
            let entry = state.table.get(key);
            let current = entry
                .filter(|entry| !entry.is_expired_at(now))
                .map(|entry| entry.value.clone());
            let ttl = entry.map(|entry| entry.ttl);
            // Kept as-is so an id without a local function survives the write.
            let binding = entry.map(|entry| (entry.refresher.clone(), entry.refresher_id.clone()));

            state.cancel_timer(key);
            let token = state.table.bump(key);
            (current, ttl, binding, token)
        };

        let _fence = MutationFence {
            inner: self.inner.clone(),
            key: key.to_string(),
            token,
        };
        let value = mutator(current).await;
        self.inner.ensure_alive()?;

        let changed = {
            let mut state = self.inner.state();
            if state.table.generation(key) != Some(token) {
                state.stats.record_superseded();
                debug!(key = %key, "mutation superseded by a newer write");
                return Ok(MutateOutcome::Superseded);
            }
            let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
            let mut entry = CacheEntry::new(key, value.clone(), ttl);
            if let Some((refresher, refresher_id)) = binding {
                entry.refresher = refresher;
                entry.refresher_id = refresher_id;
            }
            self.inner.commit_locked(&mut state, entry)
        };
        self.inner.notify(&changed);
        Ok(MutateOutcome::Applied(value))
    }

    // == Remove ==
    /// Removes `key` locally, from the store and from every sibling.
    ///
    /// Returns whether an entry was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.inner.ensure_alive()?;
        validate_key(key)?;

        let changed = {
            let mut state = self.inner.state();
            if !state.table.contains(key) {
                // Still fences in-flight mutations and hides the key from the load.
                state.table.remove(key);
                if state.loading {
                    state.note_local_write(key);
                    state.persist(StoreOp::Delete(key.to_string()));
                }
                return Ok(false);
            }
            self.inner.remove_locked(&mut state, key)
        };
        self.inner.notify(&changed);
        Ok(true)
    }

    // == Clear ==
    /// Removes every entry locally, from the store and from every sibling.
    pub fn clear(&self) -> Result<()> {
        self.inner.ensure_alive()?;

        let changed = {
            let mut state = self.inner.state();
            for (_, timer) in state.timers.drain() {
                timer.handle.abort();
            }
            let removed = state.table.clear();
            if state.loading {
                state.load_discard = true;
            }
            state.persist(StoreOp::Clear);

            let keys: Vec<String> = removed.into_iter().map(|entry| entry.key).collect();
            for key in &keys {
                state.broadcast(SyncMessage::delete(key.clone()));
            }
            self.inner.stop_gc_if_empty(&mut state);
            state.refresh_totals();
            keys
        };
        self.inner.notify(&changed);
        Ok(())
    }

    // == Queries ==
    /// True while `key` holds a fresh entry.
    pub fn has(&self, key: &str) -> Result<bool> {
        self.inner.ensure_alive()?;
        Ok(self
            .inner
            .state()
            .table
            .get(key)
            .is_some_and(|entry| !entry.is_expired()))
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.inner.ensure_alive()?;
        let mut keys = self.inner.state().table.keys();
        keys.sort();
        Ok(keys)
    }

    pub fn size(&self) -> Result<usize> {
        self.inner.ensure_alive()?;
        Ok(self.inner.state().table.len())
    }

    /// Full key -> value map, as delivered to whole-cache subscribers.
    pub fn snapshot(&self) -> Result<HashMap<String, Value>> {
        self.inner.ensure_alive()?;
        Ok(self.inner.state().table.snapshot())
    }

    pub fn entry_info(&self, key: &str) -> Result<Option<EntryInfo>> {
        self.inner.ensure_alive()?;
        let state = self.inner.state();
        Ok(state.table.get(key).map(|entry| EntryInfo {
            key: entry.key.clone(),
            expiry: entry.expiry,
            ttl_ms: duration_ms(entry.ttl),
            fresh: !entry.is_expired(),
            refresher_id: entry.refresher_id.clone(),
            refresher_bound: entry.refresher.is_some(),
            generation: entry.generation,
        }))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        self.inner.ensure_alive()?;
        let mut state = self.inner.state();
        state.refresh_totals();
        Ok(state.stats.clone())
    }

    // == Subscriptions ==
    /// Registers a whole-cache listener; it fires immediately with the current snapshot.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&HashMap<String, Value>) + Send + Sync + 'static,
    {
        self.inner.ensure_alive()?;
        let listener: SnapshotListener = Arc::new(listener);
        let subscription = self.inner.subscriptions.add_global(listener.clone());
        let snapshot = self.inner.state().table.snapshot();
        listener(&snapshot);
        Ok(subscription)
    }

    /// Registers a listener for one key; it fires immediately with the current value.
    pub fn subscribe_key<F>(&self, key: &str, listener: F) -> Result<Subscription>
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner.ensure_alive()?;
        validate_key(key)?;
        let listener: KeyListener = Arc::new(listener);
        let subscription = self.inner.subscriptions.add_keyed(key, listener.clone());
        let current = self
            .inner
            .state()
            .table
            .get(key)
            .map(|entry| entry.value.clone());
        listener(current.as_ref());
        Ok(subscription)
    }

    // == Destroy ==
    /// Tears the instance down: timers and background tasks stop, memory is
    /// cleared and every later call fails with `DestroyedInstance`.
    ///
    /// Store contents are kept so another instance can reload them.
    pub fn destroy(&self) -> Result<()> {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return Err(self.inner.destroyed_error());
        }

        {
            let mut state = self.inner.state();
            for (_, timer) in state.timers.drain() {
                timer.handle.abort();
            }
            if let Some(gc) = state.gc.take() {
                gc.abort();
            }
            state.table.clear();
            state.fetchers.clear();
            state.in_flight.clear();
            // Dropping the senders lets the writers drain what is queued, then exit.
            state.outbound = None;
            state.refresh_totals();
        }
        if let Some(loader) = self
            .inner
            .loader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            loader.abort();
        }
        self.inner.subscriptions.clear();
        self.inner.ready.send_replace(true);

        info!(namespace = %self.inner.config.namespace, "cache engine destroyed");
        Ok(())
    }

    /// Destroys the instance, then waits until the store writer and the
    /// broadcast forwarder have handed every queued operation to their adapters.
    pub async fn shutdown(&self) -> Result<()> {
        self.destroy()?;
        let writers = std::mem::take(
            &mut *self
                .inner
                .writers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for writer in writers {
            if let Err(err) = writer.await {
                warn!(error = %err, "writer task ended abnormally");
            }
        }
        debug!(namespace = %self.inner.config.namespace, "outbound queues drained");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("namespace", &self.inner.config.namespace)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// == Internals ==
impl Inner {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn destroyed_error(&self) -> CacheError {
        CacheError::DestroyedInstance(self.config.namespace.clone())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(self.destroyed_error());
        }
        Ok(())
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> Result<Duration> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return Err(CacheError::InvalidArgument(
                "TTL must be greater than zero".to_string(),
            ));
        }
        Ok(ttl)
    }

    /// Spawns the outbound writers, hooks the transport and starts the load.
    fn start(self: &Arc<Self>) {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(self);
        let mut writers = vec![spawn_persist_task(
            self.store.clone(),
            persist_rx,
            Arc::new(move |err: CacheError| {
                if let Some(inner) = weak.upgrade() {
                    inner.state().stats.record_store_failure();
                    inner.report(&err);
                }
            }),
        )];

        let broadcast = self.transport.as_ref().map(|transport| {
            let (tx, rx) = mpsc::unbounded_channel();
            writers.push(spawn_broadcast_task(transport.clone(), rx));
            self.attach_transport(transport.as_ref());
            tx
        });
        *self.writers.lock().unwrap_or_else(PoisonError::into_inner) = writers;

        {
            let mut state = self.state();
            state.outbound = Some(Outbound {
                persist: persist_tx,
                broadcast,
            });
            state.loading = true;
        }

        let loader = tokio::spawn(self.clone().load_from_store());
        *self.loader.lock().unwrap_or_else(PoisonError::into_inner) = Some(loader);
    }

    fn report(&self, err: &CacheError) {
        let hook = self
            .diagnostics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(err);
        }
    }

    /// The local write path: table, persistence, eviction, broadcast,
    /// refresh scheduling. Returns the keys whose subscribers must be notified.
    fn write_locked(
        self: &Arc<Self>,
        state: &mut EngineState,
        key: &str,
        value: Value,
        ttl: Duration,
        refresher: Option<Refresher>,
    ) -> Vec<String> {
        if let Some(Refresher::Identified { id, func }) = &refresher {
            state.fetchers.insert(id.clone(), func.clone());
        }
        let entry = CacheEntry::new(key, value, ttl).bind(refresher);
        self.commit_locked(state, entry)
    }

    /// Commits a fully built entry; `write_locked` minus the refresher registration.
    fn commit_locked(self: &Arc<Self>, state: &mut EngineState, entry: CacheEntry) -> Vec<String> {
        let owned = entry.key.clone();
        let key = owned.as_str();
        state.cancel_timer(key);
        state.note_local_write(key);

        let record = StoredRecord::from(&entry);
        let message = SyncMessage::upsert(&entry);
        state.table.insert(entry);
        state.persist(StoreOp::Put(record));

        let mut changed = self.evict_locked(state, Some(key));
        state.broadcast(message);
        self.schedule_refresh(state, key);
        self.ensure_gc(state);
        state.refresh_totals();

        changed.push(key.to_string());
        changed
    }

    /// Enforces the capacity bounds; evictions behave exactly like `remove`.
    fn evict_locked(self: &Arc<Self>, state: &mut EngineState, protect: Option<&str>) -> Vec<String> {
        let evicted = self.policy.enforce(&mut state.table, protect);
        evicted
            .into_iter()
            .map(|entry| {
                state.cancel_timer(&entry.key);
                state.note_local_write(&entry.key);
                state.stats.record_eviction();
                state.persist(StoreOp::Delete(entry.key.clone()));
                state.broadcast(SyncMessage::delete(entry.key.clone()));
                entry.key
            })
            .collect()
    }

    /// Removes a present key everywhere: table, store, siblings.
    fn remove_locked(self: &Arc<Self>, state: &mut EngineState, key: &str) -> Vec<String> {
        if state.detach(key).is_none() {
            return Vec::new();
        }
        state.persist(StoreOp::Delete(key.to_string()));
        state.broadcast(SyncMessage::delete(key));
        self.stop_gc_if_empty(state);
        vec![key.to_string()]
    }

    fn extend_locked(self: &Arc<Self>, state: &mut EngineState, key: &str) {
        state.table.bump(key);
        let Some(entry) = state.table.get_mut(key) else {
            return;
        };
        entry.extend();
        let record = StoredRecord::from(&*entry);
        state.persist(StoreOp::Put(record));
        self.schedule_refresh(state, key);
    }

    // == GC Lifecycle ==
    fn ensure_gc(self: &Arc<Self>, state: &mut EngineState) {
        if state.gc.is_none() && !state.table.is_empty() && !self.destroyed.load(Ordering::SeqCst)
        {
            state.gc = Some(spawn_gc_task(Arc::downgrade(self), self.config.gc_interval));
        }
    }

    fn stop_gc_if_empty(&self, state: &mut EngineState) {
        if state.table.is_empty() {
            if let Some(gc) = state.gc.take() {
                gc.abort();
            }
        }
    }

    // == Notification ==
    fn notify(&self, changed: &[String]) {
        if changed.is_empty() {
            return;
        }
        let mut keys: Vec<String> = changed.to_vec();
        keys.sort();
        keys.dedup();

        let pending = self.subscriptions.pending_for(&keys);
        if pending.is_empty() {
            return;
        }

        let (snapshot, values) = {
            let state = self.state();
            let snapshot = (!pending.global.is_empty()).then(|| state.table.snapshot());
            let values: HashMap<String, Option<Value>> = pending
                .keyed
                .iter()
                .map(|(key, _)| (key.clone(), state.table.get(key).map(|e| e.value.clone())))
                .collect();
            (snapshot, values)
        };

        if let Some(snapshot) = snapshot {
            for listener in &pending.global {
                listener(&snapshot);
            }
        }
        for (key, listeners) in &pending.keyed {
            let value = values.get(key).and_then(Option::as_ref);
            for listener in listeners {
                listener(value);
            }
        }
    }
}

// == Mutation Fence ==
/// Held across the mutator's `.await`. If the mutation never commits (its
/// future was dropped, or it failed after the await), the key still carries
/// the mutation's token: a parked fence is released and a bound entry gets
/// its refresh timer back.
struct MutationFence {
    inner: Arc<Inner>,
    key: String,
    token: u64,
}

impl Drop for MutationFence {
    fn drop(&mut self) {
        if self.inner.destroyed.load(Ordering::SeqCst)
            || tokio::runtime::Handle::try_current().is_err()
        {
            return;
        }
        let mut state = self.inner.state();
        if state.table.generation(&self.key) != Some(self.token) {
            return;
        }
        if state.table.contains(&self.key) {
            self.inner.schedule_refresh(&mut state, &self.key);
        } else {
            state.table.release(&self.key, self.token);
        }
    }
}

impl Sweep for Inner {
    fn sweep(&self) -> Option<usize> {
        if self.destroyed.load(Ordering::SeqCst) {
            return None;
        }

        let (removed, keep_running) = {
            let mut state = self.state();
            let now = current_timestamp_ms();
            let victims = state
                .table
                .collectable(now, duration_ms(self.config.gc_retention));

            let mut removed = Vec::with_capacity(victims.len());
            for key in victims {
                if state.detach(&key).is_some() {
                    state.persist(StoreOp::Delete(key.clone()));
                    state.broadcast(SyncMessage::delete(key.clone()));
                    removed.push(key);
                }
            }
            state.stats.record_collected(removed.len());

            let keep_running = !state.table.is_empty();
            if !keep_running {
                // This task is the one running; forget its handle without aborting.
                state.gc = None;
            }
            (removed, keep_running)
        };

        let count = removed.len();
        self.notify(&removed);
        keep_running.then_some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use serde_json::json;

    fn engine() -> CacheEngine {
        CacheEngine::new(CacheConfig::default(), Arc::new(MemoryStore::new()), None)
    }

    #[tokio::test]
    async fn test_set_rejects_invalid_arguments() {
        let cache = engine();
        assert!(matches!(
            cache.set("", json!(1), None, None),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.set("k", json!(1), Some(Duration::ZERO), None),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_get_extend_pushes_expiry() {
        let cache = engine();
        cache
            .set("k", json!(1), Some(Duration::from_millis(200)), None)
            .unwrap();
        let before = cache.entry_info("k").unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k", GetOptions::extend()).unwrap(), Some(json!(1)));

        let after = cache.entry_info("k").unwrap().unwrap();
        assert!(after.expiry > before.expiry);
        assert!(after.generation > before.generation);
    }

    #[tokio::test]
    async fn test_expired_read_removes_entry() {
        let cache = engine();
        cache
            .set("k", json!(1), Some(Duration::from_millis(30)), None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!cache.has("k").unwrap());
        assert_eq!(cache.size().unwrap(), 1);
        assert_eq!(cache.get("k", GetOptions::default()).unwrap(), None);
        assert_eq!(cache.size().unwrap(), 0);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_mutate_absent_key_uses_default_ttl() {
        let cache = engine();
        let outcome = cache
            .mutate("counter", |current| async move {
                assert!(current.is_none());
                json!(1)
            })
            .await
            .unwrap();

        assert_eq!(outcome, MutateOutcome::Applied(json!(1)));
        let info = cache.entry_info("counter").unwrap().unwrap();
        assert_eq!(info.ttl_ms, 300_000);
    }

    #[tokio::test]
    async fn test_dropped_mutation_restores_refresh_timer() {
        let cache = engine();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        cache
            .set(
                "k",
                json!(0),
                Some(Duration::from_millis(200)),
                Some(Refresher::anonymous(move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Ok(json!(n)) }
                })),
            )
            .unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.mutate("k", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                json!("never")
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(cache.inner.state().timers.contains_key("k"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(calls.load(Ordering::SeqCst) >= 1);
        let info = cache.entry_info("k").unwrap().unwrap();
        assert!(info.fresh);
        assert!(info.refresher_bound);
    }

    #[tokio::test]
    async fn test_dropped_mutation_releases_absent_key() {
        let cache = engine();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.mutate("ghost", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                json!(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cache.inner.state().table.generation("ghost"), None);
    }

    #[tokio::test]
    async fn test_superseded_mutation_leaves_newer_schedule() {
        let cache = engine();
        cache
            .set(
                "k",
                json!(0),
                None,
                Some(Refresher::anonymous(|_| async { Ok(json!(1)) })),
            )
            .unwrap();

        let writer = cache.clone();
        let outcome = cache
            .mutate("k", |_| async move {
                writer.set("k", json!("set"), None, None).unwrap();
                json!("mutated")
            })
            .await
            .unwrap();

        assert_eq!(outcome, MutateOutcome::Superseded);
        assert_eq!(cache.get_raw("k").unwrap(), Some(json!("set")));
        assert!(!cache.inner.state().timers.contains_key("k"));
    }

    #[tokio::test]
    async fn test_gc_task_lifecycle_follows_table() {
        let cache = engine();
        assert!(cache.inner.state().gc.is_none());

        cache.set("k", json!(1), None, None).unwrap();
        assert!(cache.inner.state().gc.is_some());

        cache.remove("k").unwrap();
        assert!(cache.inner.state().gc.is_none());
    }

    #[tokio::test]
    async fn test_destroy_makes_engine_inert() {
        let cache = engine();
        cache.set("k", json!(1), None, None).unwrap();
        cache.destroy().unwrap();

        assert!(cache.is_destroyed());
        assert!(matches!(
            cache.get("k", GetOptions::default()),
            Err(CacheError::DestroyedInstance(_))
        ));
        assert!(matches!(cache.size(), Err(CacheError::DestroyedInstance(_))));
        assert!(matches!(cache.ready().await, Err(CacheError::DestroyedInstance(_))));
        assert!(matches!(cache.destroy(), Err(CacheError::DestroyedInstance(_))));
        assert!(cache.inner.state().table.is_empty());
    }
}
