//! In-flight deduplication and short-TTL caching of GET responses.
//!
//! Concurrent reads of the same key share one future; a successful result is
//! kept for `ttl` and evicted oldest-first once `max_entries` is reached.
//! Failures are never cached. Only GETs go through here.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use futures_util::{
    future::{BoxFuture as SharedSource, Shared},
    FutureExt,
};
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    errors::{Error, Result},
    BoxFuture, API_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCacheConfig {
    /// Lifetime of a cached response. Zero keeps in-flight dedup but caches nothing.
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for ReadCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            max_entries: 100,
        }
    }
}

impl ReadCacheConfig {
    pub fn no_store() -> Self {
        Self {
            ttl: Duration::ZERO,
            max_entries: 0,
        }
    }
}

type InFlight = Shared<SharedSource<'static, std::result::Result<Value, Arc<Error>>>>;

struct Entry {
    value: Value,
    stored_at: Instant,
}

struct Pending {
    future: InFlight,
    /// Callers currently awaiting `future`.
    waiters: usize,
}

#[derive(Default)]
struct CacheState {
    in_flight: HashMap<String, Pending>,
    entries: HashMap<String, Entry>,
    /// Insertion order of `entries`, oldest first.
    order: VecDeque<String>,
}

pub(crate) struct ReadCache {
    config: ReadCacheConfig,
    state: Mutex<CacheState>,
}

impl ReadCache {
    pub fn new(config: ReadCacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a fresh cached value, join an in-flight read, or start `fetch`.
    pub async fn get_or_fetch<F>(&self, path: &str, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value>>,
    {
        let shared = {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get(path) {
                if entry.stored_at.elapsed() < self.config.ttl {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(path, "read cache hit");
                    return Ok(entry.value.clone());
                }
                state.entries.remove(path);
                state.order.retain(|k| k != path);
            }
            match state.in_flight.get_mut(path) {
                Some(existing) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(path, "joining in-flight read");
                    existing.waiters += 1;
                    existing.future.clone()
                }
                None => {
                    let source: SharedSource<'static, _> =
                        fetch().map(|res| res.map_err(Arc::new)).boxed();
                    let shared = source.shared();
                    state.in_flight.insert(
                        path.to_string(),
                        Pending {
                            future: shared.clone(),
                            waiters: 1,
                        },
                    );
                    shared
                }
            }
        };

        let mut waiter = Waiter {
            cache: self,
            path,
            future: shared.clone(),
            settled: false,
        };
        let result = shared.await;
        waiter.settled = true;

        {
            let mut state = self.lock();
            let owner = state
                .in_flight
                .get(path)
                .is_some_and(|current| current.future.ptr_eq(&waiter.future));
            if owner {
                state.in_flight.remove(path);
                if let Ok(value) = &result {
                    self.store(&mut state, path, value.clone());
                }
            }
        }

        result.map_err(|err| err.duplicate())
    }

    fn store(&self, state: &mut CacheState, path: &str, value: Value) {
        if self.config.ttl.is_zero() || self.config.max_entries == 0 {
            return;
        }
        state.order.retain(|k| k != path);
        while state.entries.len() >= self.config.max_entries {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
        state.entries.insert(
            path.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        state.order.push_back(path.to_string());
    }

    /// Forget everything a mutation of `path` may have changed: the owning
    /// workflow's subtree and the workflow list.
    pub fn invalidate_for(&self, path: &str) {
        let scope = workflow_scope(path);
        let collection = format!("{API_PREFIX}/workflows");
        let affected = |key: &str| {
            let key_path = key.split('?').next().unwrap_or(key);
            key_path == scope
                || key_path.starts_with(&format!("{scope}/"))
                || key_path == collection
        };

        let mut state = self.lock();
        state.entries.retain(|key, _| !affected(key));
        state.order.retain(|key| !affected(key));
        state.in_flight.retain(|key, _| !affected(key));
        #[cfg(feature = "tracing")]
        tracing::debug!(path, scope = %scope, "read cache invalidated");
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }
}

/// Unregisters a caller that stops awaiting before the read settles; the
/// last one to leave drops the abandoned request.
struct Waiter<'a> {
    cache: &'a ReadCache,
    path: &'a str,
    future: InFlight,
    settled: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.cache.lock();
        let Some(pending) = state.in_flight.get_mut(self.path) else {
            return;
        };
        if !pending.future.ptr_eq(&self.future) {
            return;
        }
        pending.waiters = pending.waiters.saturating_sub(1);
        if pending.waiters == 0 {
            state.in_flight.remove(self.path);
            #[cfg(feature = "tracing")]
            tracing::debug!(path = self.path, "abandoned in-flight read dropped");
        }
    }
}

/// `/v1/workflows/{id}` for paths under a workflow, the path itself otherwise.
fn workflow_scope(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        [_, "workflows", id, ..] if !matches!(*id, "compile" | "execute") => {
            format!("/{}/workflows/{}", segments[0], id)
        }
        _ => path.to_string(),
    }
}
