//! Deduplicating metadata cache shared by providers.
//!
//! [`MetadataCache::fetch`] guarantees at most one in-flight fetch per key:
//! concurrent callers for the same key wait for the first caller's result
//! instead of issuing their own request. Successful results are kept in a
//! bounded LRU map; failures are handed to the waiters of that fetch and then
//! forgotten, so the next caller retries from scratch.

use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Default number of records kept by [`MetadataCache`].
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

type Outcome<V, E> = Option<Result<V, E>>;

struct CacheState<K, V, E> {
    entries: LruCache<K, V>,
    // Kept apart from `entries` so eviction never touches an in-flight marker.
    in_flight: HashMap<K, watch::Receiver<Outcome<V, E>>>,
}

/// Singleflight LRU cache.
///
/// Meant to be constructed once and shared (behind an `Arc`) by every
/// provider that fetches from the same backend.
pub struct MetadataCache<K, V, E> {
    state: Mutex<CacheState<K, V, E>>,
}

enum Role<V, E> {
    Hit(V),
    Wait(watch::Receiver<Outcome<V, E>>),
    Fetch(watch::Sender<Outcome<V, E>>),
}

impl<K, V, E> MetadataCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V, E>> {
        // Every critical section leaves the maps consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the record for `key`, invoking `fetch_fn` only if nobody else
    /// is already fetching it.
    ///
    /// # Errors
    ///
    /// Returns whatever `fetch_fn` returned, to the caller that ran it and to
    /// every caller that was waiting on that run.
    pub async fn fetch<F, Fut>(&self, key: &K, fetch_fn: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            match self.claim(key) {
                Role::Hit(value) => {
                    trace!("Cache hit");
                    return Ok(value);
                }
                Role::Wait(mut rx) => {
                    debug!("Waiting for in-flight fetch");
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        // The fetcher was dropped before finishing. Start over;
                        // one of the waiters becomes the new fetcher.
                        Err(_) => continue,
                    };
                    if let Some(result) = outcome {
                        return result;
                    }
                }
                Role::Fetch(tx) => {
                    let mut flight = Flight {
                        cache: self,
                        key: Some(key.clone()),
                    };

                    trace!("Cache miss, fetching");
                    let result = fetch_fn().await;
                    flight.finish(result.as_ref().ok());
                    tx.send_replace(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    /// Decides, under the lock, whether this caller hits, waits or fetches.
    fn claim(&self, key: &K) -> Role<V, E> {
        let mut state = self.lock();

        if let Some(value) = state.entries.get(key) {
            return Role::Hit(value.clone());
        }
        if let Some(rx) = state.in_flight.get(key) {
            return Role::Wait(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(key.clone(), rx);
        Role::Fetch(tx)
    }

    /// Looks up `key` without fetching. Counts as a use for LRU ordering.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.lock().entries.cap()
    }

    /// Number of keys currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}

impl<K, V, E> Default for MetadataCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// In-flight marker owned by the fetching caller.
///
/// Dropping it without [`Flight::finish`] (the fetch future was cancelled)
/// still clears the marker, which closes the channel and lets a waiter take
/// over.
struct Flight<'a, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    cache: &'a MetadataCache<K, V, E>,
    key: Option<K>,
}

impl<K, V, E> Flight<'_, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn finish(&mut self, value: Option<&V>) {
        if let Some(key) = self.key.take() {
            let mut state = self.cache.lock();
            state.in_flight.remove(&key);
            if let Some(value) = value {
                if state.entries.push(key, value.clone()).is_some() {
                    trace!("Evicted least recently used record");
                }
            }
        }
    }
}

impl<K, V, E> Drop for Flight<'_, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        self.finish(None);
    }
}
