//! Key-value store abstraction and the etcd v2 implementation
//!
//! The registry only needs five operations from its store. `EtcdStore`
//! provides them over the etcd v2 HTTP keys API; `MemoryStore` (see
//! [`crate::memory`]) provides them in-process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_registry_api::KeysResponse;
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::http::{RequestEngine, StoreRequest};
use crate::pool::HostPool;

/// Path of the etcd v2 keys API
pub const KEYS_PATH: &str = "/v2/keys/";

/// Path of the etcd v2 cluster membership endpoint
pub const MACHINES_PATH: &str = "/v2/machines";

/// Operations the registry needs from its backing store.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a key, or a whole subtree when `recursive` is set.
    async fn get(&self, key: &str, recursive: bool) -> Result<Option<KeysResponse>>;

    /// Write a value, optionally with a TTL. Used for writes and lease renewals.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key. Deleting a key that is already gone succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Block until `key` is modified at or after `wait_index`.
    ///
    /// With `None`, waits for the next modification.
    async fn wait(&self, key: &str, wait_index: Option<u64>) -> Result<KeysResponse>;

    /// Current cluster member endpoints, or `None` when the store cannot say.
    async fn machines(&self) -> Result<Option<Vec<String>>>;
}

/// etcd v2 HTTP store
pub struct EtcdStore {
    engine: RequestEngine,
    watch_timeout: Duration,
}

impl EtcdStore {
    pub fn new(engine: RequestEngine, watch_timeout: Duration) -> Self {
        Self {
            engine,
            watch_timeout,
        }
    }

    /// Build a store and its engine over the given host pool
    pub fn from_config(pool: Arc<HostPool>, config: &RegistryConfig) -> Result<Self> {
        let engine = RequestEngine::new(pool, config)?;
        Ok(Self::new(engine, config.watch_timeout))
    }

    pub fn engine(&self) -> &RequestEngine {
        &self.engine
    }

    fn key_path(key: &str) -> String {
        format!("{}{}", KEYS_PATH, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl KeyValueStore for EtcdStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Option<KeysResponse>> {
        let mut request = StoreRequest::get(&Self::key_path(key));
        if recursive {
            request = request.with_query("recursive", true);
        }
        self.engine.execute_json(&request).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut request = StoreRequest::put(&Self::key_path(key)).with_form("value", value);
        if let Some(ttl) = ttl {
            request = request.with_form("ttl", ttl.as_secs());
        }
        self.engine.execute(&request).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let request = StoreRequest::delete(&Self::key_path(key));
        if self.engine.execute(&request).await?.is_none() {
            debug!("Delete of {} ignored, key already gone", key);
        }
        Ok(())
    }

    async fn wait(&self, key: &str, wait_index: Option<u64>) -> Result<KeysResponse> {
        let mut request = StoreRequest::get(&Self::key_path(key))
            .with_query("wait", true)
            .with_timeout(self.watch_timeout);
        if let Some(index) = wait_index {
            request = request.with_query("waitIndex", index);
        }

        self.engine
            .execute_json(&request)
            .await?
            .ok_or_else(|| RegistryError::Store {
                status: 404,
                message: format!("watch on {} returned not found", key),
            })
    }

    async fn machines(&self) -> Result<Option<Vec<String>>> {
        let reply = self.engine.execute(&StoreRequest::get(MACHINES_PATH)).await?;
        Ok(reply.map(|reply| parse_machines(&reply.text())))
    }
}

/// Parse the comma separated body of the membership endpoint
pub fn parse_machines(body: &str) -> Vec<String> {
    body.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}
