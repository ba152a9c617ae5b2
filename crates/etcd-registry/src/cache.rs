//! Directory cache invalidated through a sentinel key
//!
//! Directory reads are cached per normalized service name (`*` for all
//! services) with no expiry. Every registry mutation bumps the sentinel key;
//! the watch loop long-polls it and clears the whole cache when it changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use etcd_registry_api::{CacheSetting, Keyspace, ServiceRecord, cache_key};
use moka::sync::Cache;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::directory::{DirectoryReader, pick_random};
use crate::error::{RegistryError, Result};
use crate::store::KeyValueStore;

/// Read-through cache over a [`DirectoryReader`]
pub struct InvalidationCache {
    reader: DirectoryReader,
    store: Arc<dyn KeyValueStore>,
    /// `None` when caching is disabled
    entries: Option<Cache<String, Arc<Vec<ServiceRecord>>>>,
    /// Bumped on every invalidation; a miss that straddles one is not stored
    generation: AtomicU64,
}

impl InvalidationCache {
    pub fn new(store: Arc<dyn KeyValueStore>, keyspace: Keyspace, setting: CacheSetting) -> Self {
        let entries = setting
            .capacity()
            .filter(|capacity| *capacity > 0)
            .map(|capacity| Cache::builder().max_capacity(capacity).build());

        Self {
            reader: DirectoryReader::new(store.clone(), keyspace),
            store,
            entries,
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn reader(&self) -> &DirectoryReader {
        &self.reader
    }

    /// Records for `name` (all services for `None`), from cache when possible
    pub async fn list(&self, name: Option<&str>) -> Result<Vec<ServiceRecord>> {
        let Some(entries) = &self.entries else {
            return self.reader.list(name).await;
        };

        let key = cache_key(name);
        if let Some(records) = entries.get(&key) {
            debug!("Directory cache hit for {}", key);
            return Ok(records.as_ref().clone());
        }

        debug!("Directory cache miss for {}", key);
        let generation = self.generation.load(Ordering::SeqCst);
        let records = self.reader.list(name).await?;
        if self.generation.load(Ordering::SeqCst) == generation {
            entries.insert(key, Arc::new(records.clone()));
        }
        Ok(records)
    }

    /// One record for `name`, picked at random from the (cached) list
    pub async fn lookup(&self, name: Option<&str>) -> Result<Option<ServiceRecord>> {
        let records = self.list(name).await?;
        Ok(pick_random(&records))
    }

    /// Drop every cached directory
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(entries) = &self.entries {
            entries.invalidate_all();
        }
    }

    /// Bump the sentinel key so every watching process clears its cache,
    /// then clear the local cache.
    pub async fn notify_change(&self) {
        let sentinel = self.reader.keyspace().sentinel_key();
        let stamp = chrono::Utc::now().to_rfc3339();
        if let Err(e) = self.store.set(&sentinel, &stamp, None).await {
            warn!("Failed to bump {}: {}", sentinel, e);
        }
        self.invalidate_all();
    }

    /// Start the sentinel watch loop.
    ///
    /// The loop keeps its wait index across transport failures, so a change
    /// made while it backs off is still delivered by the next wait. When the
    /// store rejects the wait (for example 401 once the event index has been
    /// cleared) the loop re-arms from the sentinel's current index and clears
    /// the cache, since changes in the gap can no longer be replayed.
    ///
    /// The loop never ends on its own; abort the returned handle to stop it.
    pub fn spawn_watch_loop(self: &Arc<Self>, backoff: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let sentinel = cache.reader.keyspace().sentinel_key();
            info!("Watching {} for directory changes", sentinel);

            let mut wait_index = None;
            loop {
                let index = match wait_index {
                    Some(index) => index,
                    None => match cache.arm(&sentinel).await {
                        Ok(index) => index,
                        Err(e) => {
                            warn!("Failed to read {}: {}, retrying in {:?}", sentinel, e, backoff);
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                    },
                };

                match cache.store.wait(&sentinel, Some(index)).await {
                    Ok(response) => {
                        debug!(
                            "{} changed at index {}, clearing directory cache",
                            sentinel, response.node.modified_index
                        );
                        cache.invalidate_all();
                        wait_index = Some(response.node.modified_index + 1);
                    }
                    Err(e) if e.is_transport() => {
                        warn!("Watch on {} failed: {}, retrying in {:?}", sentinel, e, backoff);
                        wait_index = Some(index);
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => {
                        warn!(
                            "Watch on {} rejected: {}, re-arming in {:?}",
                            sentinel, e, backoff
                        );
                        wait_index = None;
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        })
    }

    /// Read the sentinel's index to wait from and clear the cache.
    ///
    /// An absent sentinel is created first so the wait always has a concrete
    /// index; waiting without one would skip a change that lands between the
    /// read and the wait.
    async fn arm(&self, sentinel: &str) -> Result<u64> {
        let mut response = self.store.get(sentinel, false).await?;
        if response.is_none() {
            debug!("{} is absent, creating it", sentinel);
            let stamp = chrono::Utc::now().to_rfc3339();
            self.store.set(sentinel, &stamp, None).await?;
            response = self.store.get(sentinel, false).await?;
        }
        let Some(response) = response else {
            return Err(RegistryError::Store {
                status: 404,
                message: format!("{} vanished after being created", sentinel),
            });
        };

        // Anything cached before this point may predate a change we never saw
        self.invalidate_all();
        Ok(response.node.modified_index + 1)
    }
}
