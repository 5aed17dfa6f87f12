//! Refresh Scheduler
//!
//! At most one pending timer per key. A timer captures the entry's
//! generation when it is scheduled; when it fires, the refresh only proceeds
//! if the entry still carries that generation. Each attempt bumps the
//! generation again before calling the refresher, so a result is committed
//! only if nothing else touched the key while the call was in flight.
//!
//! While an attempt is in flight for the entry's current generation, forced
//! and stale-while-revalidate refreshes join it instead of starting another.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{CacheEngine, EngineState, Inner, Timer};
use crate::cache::{current_timestamp_ms, into_refresh_fn, validate_key, Refresher};
use crate::error::{CacheError, Result};

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A fresh value was written
    Refreshed,
    /// An attempt for the current value was already running; it will commit
    InFlight,
    /// The key changed while the attempt was pending or in flight
    Superseded,
    /// The key has no entry
    Missing,
    /// The entry has no bound refresher
    NoRefresher,
    /// The refresher failed, then failed again on the retry
    Failed(String),
}

impl CacheEngine {
    /// Refreshes `key` now, ignoring its schedule.
    ///
    /// Refresher errors are not returned as `Err`; they show up as
    /// [`RefreshOutcome::Failed`] and through the diagnostic hook.
    pub async fn refresh(&self, key: &str) -> Result<RefreshOutcome> {
        self.inner.ensure_alive()?;
        validate_key(key)?;
        Ok(self.inner.run_refresh(key, None).await)
    }

    /// Binds `id` to `fetcher` and reschedules every entry that carries `id`.
    pub fn register_fetcher<F, Fut>(&self, id: &str, fetcher: F) -> Result<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.inner.ensure_alive()?;
        if id.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "Fetcher id cannot be empty".to_string(),
            ));
        }

        let func = into_refresh_fn(fetcher);
        let mut state = self.inner.state();
        state.fetchers.insert(id.to_string(), func.clone());

        let carriers: Vec<String> = state
            .table
            .entries()
            .filter(|entry| entry.refresher_id.as_deref() == Some(id))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &carriers {
            if let Some(entry) = state.table.get_mut(key) {
                entry.refresher = Some(func.clone());
            }
            self.inner.schedule_refresh(&mut state, key);
        }

        debug!(id = %id, rebound = carriers.len(), "fetcher registered");
        Ok(())
    }

    /// Refresher ids carried by entries that have no local function yet.
    pub fn missing_fetcher_ids(&self) -> Result<Vec<String>> {
        self.inner.ensure_alive()?;
        let state = self.inner.state();
        let missing: BTreeSet<String> = state
            .table
            .entries()
            .filter_map(|entry| entry.refresher_id.as_ref())
            .filter(|id| !state.fetchers.contains_key(id.as_str()))
            .cloned()
            .collect();
        Ok(missing.into_iter().collect())
    }
}

impl Inner {
    // == Schedule ==
    /// Replaces the key's timer with one firing at `expiry - ttl * margin`,
    /// or on the next tick when that moment has passed.
    pub(super) fn schedule_refresh(self: &Arc<Self>, state: &mut EngineState, key: &str) {
        state.cancel_timer(key);

        let Some(entry) = state.table.get(key) else {
            return;
        };
        if entry.refresher.is_none() {
            return;
        }

        let token = entry.generation;
        let refresh_at = entry.refresh_at(self.config.refresh_margin);
        let delay = Duration::from_millis(refresh_at.saturating_sub(current_timestamp_ms()));

        let engine = Arc::downgrade(self);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = engine.upgrade() {
                inner.fire_timer(owned_key, token).await;
            }
        });

        debug!(key = %key, delay_ms = delay.as_millis() as u64, token, "refresh scheduled");
        state.timers.insert(key.to_string(), Timer { token, handle });
    }

    async fn fire_timer(self: Arc<Self>, key: String, token: u64) {
        {
            let mut state = self.state();
            // Past this point the refresher call is in flight and cannot be
            // aborted; only the generation check can discard its result.
            if state.timers.get(&key).map(|timer| timer.token) == Some(token) {
                state.timers.remove(&key);
            }
        }
        self.run_refresh(&key, Some(token)).await;
    }

    // == Run ==
    /// One refresh attempt with a single immediate retry.
    ///
    /// `expected` is the token captured by a scheduled timer; forced and
    /// stale-while-revalidate refreshes pass `None`.
    pub(super) async fn run_refresh(self: &Arc<Self>, key: &str, expected: Option<u64>) -> RefreshOutcome {
        let (func, token) = {
            let mut state = self.state();
            let (generation, func) = match state.table.get(key) {
                Some(entry) => (entry.generation, entry.refresher.clone()),
                None => return RefreshOutcome::Missing,
            };
            if expected.is_some_and(|expected| expected != generation) {
                state.stats.record_superseded();
                debug!(key = %key, "scheduled refresh superseded before start");
                return RefreshOutcome::Superseded;
            }
            let Some(func) = func else {
                return RefreshOutcome::NoRefresher;
            };
            if expected.is_none() && state.refreshing(key) {
                debug!(key = %key, "refresh already in flight");
                return RefreshOutcome::InFlight;
            }
            let token = state.table.bump(key);
            if expected.is_none() {
                state.cancel_timer(key);
            }
            state.in_flight.insert(key.to_string(), token);
            (func, token)
        };
        let _marker = InFlightMarker {
            inner: self,
            key,
            token,
        };

        let result = match func(key.to_string()).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(key = %key, error = %err, "refresher failed, retrying once");
                func(key.to_string()).await
            }
        };

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(key = %key, error = %message, "refresh abandoned for this cycle");
                self.state().stats.record_refresh_failure();
                self.report(&CacheError::RefresherFailure {
                    key: key.to_string(),
                    message: message.clone(),
                });
                return RefreshOutcome::Failed(message);
            }
        };

        let changed = {
            let mut state = self.state();
            if self.destroyed.load(std::sync::atomic::Ordering::SeqCst)
                || state.table.generation(key) != Some(token)
            {
                state.stats.record_superseded();
                debug!(key = %key, "refresh result discarded, key changed in flight");
                return RefreshOutcome::Superseded;
            }
            let Some(entry) = state.table.get(key) else {
                return RefreshOutcome::Superseded;
            };
            let ttl = entry.ttl;
            let refresher = entry
                .refresher_descriptor()
                .unwrap_or_else(|| Refresher::Anonymous(func.clone()));

            let changed = self.write_locked(&mut state, key, value, ttl, Some(refresher));
            state.stats.record_refresh();
            changed
        };

        self.notify(&changed);
        RefreshOutcome::Refreshed
    }
}

/// Clears the key's in-flight slot when the attempt ends, however it ends.
struct InFlightMarker<'a> {
    inner: &'a Inner,
    key: &'a str,
    token: u64,
}

impl Drop for InFlightMarker<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        if state.in_flight.get(self.key) == Some(&self.token) {
            state.in_flight.remove(self.key);
        }
    }
}
