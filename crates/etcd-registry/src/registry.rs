//! Registry facade
//!
//! `Registry` owns the store, the lease manager, the directory cache and
//! every background task (membership refresh, sentinel watch, heartbeats).
//! Tasks are aborted on `destroy()` and when the registry is dropped.

use std::sync::Arc;

use etcd_registry_api::{Keyspace, ServiceDescriptor, ServiceRecord};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::InvalidationCache;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::lease::{LeaseInfo, LeaseManager, LeaseTiming};
use crate::pool::{HostPool, spawn_refresh_loop};
use crate::store::{EtcdStore, KeyValueStore};

/// Service registry client.
///
/// Must be created inside a Tokio runtime.
pub struct Registry {
    config: RegistryConfig,
    store: Arc<dyn KeyValueStore>,
    pool: Option<Arc<HostPool>>,
    leases: LeaseManager,
    cache: Arc<InvalidationCache>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    /// Connect using a connection string such as `127.0.0.1:4001,127.0.0.1:4002/prod`
    pub fn connect(connection_string: &str) -> Result<Self> {
        Self::new(RegistryConfig::from_connection_string(connection_string)?)
    }

    /// Create a registry backed by the etcd cluster in `config`
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let pool = Arc::new(HostPool::new(config.hosts.clone()));
        if pool.is_empty() {
            return Err(RegistryError::NoHosts);
        }

        let store: Arc<dyn KeyValueStore> =
            Arc::new(EtcdStore::from_config(pool.clone(), &config)?);

        let mut tasks = Vec::new();
        if config.refresh {
            tasks.push(spawn_refresh_loop(
                pool.clone(),
                store.clone(),
                config.refresh_interval,
            ));
        }

        info!(
            "Registry connected to {:?} (namespace '{}')",
            pool.snapshot(),
            config.namespace
        );
        Ok(Self::assemble(config, store, Some(pool), tasks))
    }

    /// Create a registry over any store, e.g. a [`crate::MemoryStore`]
    pub fn with_store(config: RegistryConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::assemble(config, store, None, Vec::new())
    }

    fn assemble(
        config: RegistryConfig,
        store: Arc<dyn KeyValueStore>,
        pool: Option<Arc<HostPool>>,
        mut tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        let keyspace = Keyspace::new(&config.namespace);
        let leases = LeaseManager::new(store.clone(), keyspace.clone(), LeaseTiming::from(&config));
        let cache = Arc::new(InvalidationCache::new(store.clone(), keyspace, config.cache));
        if cache.is_enabled() {
            tasks.push(cache.spawn_watch_loop(config.watch_backoff));
        }

        Self {
            config,
            store,
            pool,
            leases,
            cache,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Host pool, when backed by an etcd cluster
    pub fn host_pool(&self) -> Option<&Arc<HostPool>> {
        self.pool.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Leases currently held by this process
    pub fn leases(&self) -> Vec<LeaseInfo> {
        self.leases.leases()
    }

    /// Register a service instance and keep it alive until `leave`/`destroy`.
    ///
    /// A bare port converts into a descriptor:
    ///
    /// ```no_run
    /// # async fn run(registry: etcd_registry::Registry) -> etcd_registry::Result<()> {
    /// let record = registry.join("web", 8080).await?;
    /// println!("registered at {}", record.url);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn join(
        &self,
        name: &str,
        descriptor: impl Into<ServiceDescriptor>,
    ) -> Result<ServiceRecord> {
        let record = self.leases.join(name, descriptor.into()).await?;
        self.cache.notify_change().await;
        Ok(record)
    }

    /// Deregister every instance under `name`, or everything for `None`
    pub async fn leave(&self, name: Option<&str>) -> Result<()> {
        self.leases.leave(name).await;
        self.cache.notify_change().await;
        Ok(())
    }

    /// All registered records for `name`, or for every service with `None`
    pub async fn list(&self, name: Option<&str>) -> Result<Vec<ServiceRecord>> {
        self.cache.list(name).await
    }

    /// One registered record for `name`, picked at random
    pub async fn lookup(&self, name: Option<&str>) -> Result<Option<ServiceRecord>> {
        self.cache.lookup(name).await
    }

    /// Deregister everything and stop all background work.
    ///
    /// Later `join` calls fail with [`RegistryError::Destroyed`].
    pub async fn destroy(&self) -> Result<()> {
        let released = self.leases.destroy().await;
        self.abort_tasks();
        self.cache.notify_change().await;
        info!("Registry destroyed, released {} lease(s)", released.len());
        Ok(())
    }

    fn abort_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use etcd_registry_api::CacheSetting;
    use serde_json::json;
    use std::time::Duration;

    fn registry_over(store: &Arc<MemoryStore>) -> Registry {
        Registry::with_store(RegistryConfig::default(), store.clone())
    }

    fn local(port: u16) -> ServiceDescriptor {
        ServiceDescriptor::from(port).with_hostname("127.0.0.1")
    }

    #[tokio::test]
    async fn test_join_then_lookup() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);

        registry.join("test", local(1000)).await.unwrap();
        let record = registry.lookup(Some("test")).await.unwrap().unwrap();

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "name": "test",
                "port": 1000,
                "hostname": "127.0.0.1",
                "host": "127.0.0.1:1000",
                "url": "http://127.0.0.1:1000"
            })
        );
    }

    #[tokio::test]
    async fn test_two_joins_list_two() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);

        registry.join("test", local(1000)).await.unwrap();
        registry.join("test", local(1001)).await.unwrap();

        let records = registry.list(Some("test")).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(registry.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejoin_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);

        let first = registry.join("test", local(1000)).await.unwrap();
        let second = registry.join("test", local(1000)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.list(Some("test")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_own_writes_visible_through_cache() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);

        assert!(registry.lookup(Some("test")).await.unwrap().is_none());
        registry.join("test", local(1000)).await.unwrap();
        assert!(registry.lookup(Some("test")).await.unwrap().is_some());

        registry.leave(Some("test")).await.unwrap();
        assert!(registry.lookup(Some("test")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_leave_keeps_other_names() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);

        registry.join("a", local(1000)).await.unwrap();
        registry.join("b", local(1001)).await.unwrap();
        registry.leave(Some("a")).await.unwrap();

        assert!(registry.lookup(Some("a")).await.unwrap().is_none());
        assert_eq!(registry.list(Some("b")).await.unwrap().len(), 1);
        assert_eq!(registry.leases().len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_bump_sentinel() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::with_store(
            RegistryConfig::default().with_namespace("prod"),
            store.clone(),
        );

        registry.join("test", local(1000)).await.unwrap();
        let after_join = store.value("prod/updated").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&after_join).is_ok());

        let index = store.index();
        registry.leave(None).await.unwrap();
        assert!(store.index() > index);
        assert!(store.value("prod/updated").is_some());
    }

    #[tokio::test]
    async fn test_destroy() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        registry.join("a", local(1000)).await.unwrap();
        registry.join("b", local(1001)).await.unwrap();

        registry.destroy().await.unwrap();

        assert_eq!(store.keys(), vec!["updated".to_string()]);
        assert!(registry.leases().is_empty());
        assert!(registry.tasks.lock().is_empty());
        let err = registry.join("a", local(1000)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Destroyed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_registries_share_directory() {
        let store = Arc::new(MemoryStore::new());
        let producer = registry_over(&store);
        let consumer = registry_over(&store);

        assert!(consumer.lookup(Some("web")).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(10)).await;

        producer.join("web", local(8080)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(consumer.lookup(Some("web")).await.unwrap().is_some());

        producer.destroy().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(consumer.lookup(Some("web")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect() {
        let registry = Registry::connect("127.0.0.1:4001,127.0.0.1:4002/prod?cache=false").unwrap();
        let pool = registry.host_pool().unwrap();
        assert_eq!(
            pool.snapshot().as_slice(),
            ["http://127.0.0.1:4001".to_string(), "http://127.0.0.1:4002".to_string()]
        );
        assert_eq!(registry.config().namespace, "prod");
        assert_eq!(registry.config().cache, CacheSetting::Disabled);
        assert!(registry.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_new_without_hosts() {
        let config = RegistryConfig::with_hosts(Vec::new());
        assert!(matches!(
            Registry::new(config),
            Err(RegistryError::NoHosts)
        ));
        assert!(Registry::connect("https://discovery.etcd.io/abc").is_err());
    }
}
