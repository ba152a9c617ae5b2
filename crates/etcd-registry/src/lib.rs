//! etcd-registry - service registry client for the etcd v2 keys API
//!
//! This crate provides:
//! - Host pool with round-robin rotation and periodic membership refresh
//! - HTTP request engine with retry, failover, and redirect handling
//! - Lease manager that registers instances and keeps them alive with heartbeats
//! - Directory reader for listing and looking up registered instances
//! - Read-through directory cache invalidated by a sentinel key watch
//! - `Registry` facade tying it all together

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod lease;
pub mod listener;
pub mod memory;
pub mod pool;
pub mod registry;
pub mod store;

pub use cache::InvalidationCache;
pub use config::RegistryConfig;
pub use directory::DirectoryReader;
pub use error::{RegistryError, Result};
pub use http::{RequestEngine, StoreReply, StoreRequest};
pub use lease::{LeaseInfo, LeaseManager, LeaseState, LeaseTiming};
pub use listener::{MembershipEvent, MembershipListener};
pub use memory::{MemoryStore, Operation};
pub use pool::HostPool;
pub use registry::Registry;
pub use store::{EtcdStore, KeyValueStore};

// Model re-exports
pub use etcd_registry_api::{
    CacheSetting, ConnectionOptions, Keyspace, KeysResponse, Node, ServiceDescriptor,
    ServiceRecord,
};
