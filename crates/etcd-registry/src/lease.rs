//! Lease manager - registers service records and keeps them alive
//!
//! Each `join` writes one record under a TTL and starts a heartbeat task that
//! rewrites it until the lease is left or the manager is destroyed. Leases
//! move `Pending -> Active -> Destroyed` and never come back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use etcd_registry_api::{Keyspace, ServiceDescriptor, ServiceRecord, local_ip};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::store::KeyValueStore;

/// Lifecycle state of a lease
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseState {
    /// Initial write in flight
    Pending,
    /// Written and heartbeating
    Active,
    /// Left or destroyed; terminal
    Destroyed,
}

/// TTL and heartbeat periods for leases
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseTiming {
    pub ttl: Duration,
    /// Delay before the next renewal after a success
    pub heartbeat_interval: Duration,
    /// Delay before the next renewal after a failure
    pub heartbeat_retry_interval: Duration,
}

impl Default for LeaseTiming {
    fn default() -> Self {
        Self::from(&RegistryConfig::default())
    }
}

impl From<&RegistryConfig> for LeaseTiming {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            ttl: config.ttl,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_retry_interval: config.heartbeat_retry_interval,
        }
    }
}

/// Snapshot of one lease
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseInfo {
    pub id: u64,
    pub name: String,
    pub key: String,
    pub state: LeaseState,
}

struct LeaseEntry {
    id: u64,
    name: String,
    key: String,
    state: LeaseState,
    heartbeat: Option<JoinHandle<()>>,
}

impl LeaseEntry {
    fn info(&self) -> LeaseInfo {
        LeaseInfo {
            id: self.id,
            name: self.name.clone(),
            key: self.key.clone(),
            state: self.state,
        }
    }

    fn destroy(&mut self) {
        self.state = LeaseState::Destroyed;
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

/// Owns every lease held by this process
pub struct LeaseManager {
    store: Arc<dyn KeyValueStore>,
    keyspace: Keyspace,
    timing: LeaseTiming,
    leases: Mutex<Vec<LeaseEntry>>,
    next_id: AtomicU64,
    destroyed: AtomicBool,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn KeyValueStore>, keyspace: Keyspace, timing: LeaseTiming) -> Self {
        Self {
            store,
            keyspace,
            timing,
            leases: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Current leases in registration order
    pub fn leases(&self) -> Vec<LeaseInfo> {
        self.leases.lock().iter().map(LeaseEntry::info).collect()
    }

    /// Register a service instance and start renewing it.
    ///
    /// Returns the record even when a concurrent `leave`/`destroy` tore the
    /// lease down while the initial write was in flight.
    pub async fn join(&self, name: &str, descriptor: ServiceDescriptor) -> Result<ServiceRecord> {
        if self.is_destroyed() {
            return Err(RegistryError::Destroyed);
        }

        let record = ServiceRecord::from_descriptor(name, descriptor, local_ip);
        let key = self.keyspace.lease_key(name, &record.url);
        let value = serde_json::to_string(&record)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.leases.lock().push(LeaseEntry {
            id,
            name: name.to_string(),
            key: key.clone(),
            state: LeaseState::Pending,
            heartbeat: None,
        });

        if let Err(e) = self.store.set(&key, &value, Some(self.timing.ttl)).await {
            warn!("Failed to register {} at {}: {}", name, key, e);
            self.leases.lock().retain(|lease| lease.id != id);
            self.delete_quietly(&key).await;
            return Err(e);
        }

        let activated = {
            let mut leases = self.leases.lock();
            let destroyed = self.is_destroyed();
            match leases.iter().position(|lease| lease.id == id) {
                Some(index) if !destroyed => {
                    let lease = &mut leases[index];
                    lease.state = LeaseState::Active;
                    lease.heartbeat = Some(spawn_heartbeat(
                        self.store.clone(),
                        key.clone(),
                        value,
                        self.timing,
                    ));
                    true
                }
                Some(index) => {
                    leases.remove(index);
                    false
                }
                None => false,
            }
        };

        if activated {
            info!("Registered {} at {} ({})", name, record.url, key);
        } else {
            info!(
                "Lease for {} was released during registration, removing {}",
                name, key
            );
            self.delete_quietly(&key).await;
        }
        Ok(record)
    }

    /// Release every lease registered under `name`, or all leases for `None`.
    ///
    /// Deletes are best-effort; failures are logged. Returns the released leases.
    pub async fn leave(&self, name: Option<&str>) -> Vec<LeaseInfo> {
        let released: Vec<LeaseEntry> = {
            let mut leases = self.leases.lock();
            let (mut released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *leases)
                .into_iter()
                .partition(|lease| name.is_none_or(|name| lease.name == name));
            *leases = kept;
            for lease in &mut released {
                lease.destroy();
            }
            released
        };

        for lease in &released {
            self.delete_quietly(&lease.key).await;
            info!("Deregistered {} ({})", lease.name, lease.key);
        }

        released.iter().map(LeaseEntry::info).collect()
    }

    /// Permanently shut the manager down and release every lease
    pub async fn destroy(&self) -> Vec<LeaseInfo> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.leave(None).await
    }

    async fn delete_quietly(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!("Failed to delete {}: {}", key, e);
        }
    }
}

impl Drop for LeaseManager {
    fn drop(&mut self) {
        for lease in self.leases.get_mut().iter_mut() {
            lease.destroy();
        }
    }
}

/// Rewrite `key` forever: one interval after success, the retry interval after failure
fn spawn_heartbeat(
    store: Arc<dyn KeyValueStore>,
    key: String,
    value: String,
    timing: LeaseTiming,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = timing.heartbeat_interval;
        loop {
            tokio::time::sleep(delay).await;
            delay = match store.set(&key, &value, Some(timing.ttl)).await {
                Ok(()) => {
                    debug!("Renewed lease {}", key);
                    timing.heartbeat_interval
                }
                Err(e) => {
                    warn!(
                        "Failed to renew lease {}: {}, retrying in {:?}",
                        key, e, timing.heartbeat_retry_interval
                    );
                    timing.heartbeat_retry_interval
                }
            };
        }
    })
}
