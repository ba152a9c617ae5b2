//! etcd-registry API - shared models for the service registry
//!
//! This crate provides:
//! - Service record and descriptor types
//! - etcd v2 keys API wire models
//! - Keyspace layout (prefixes, lease keys, sentinel key)
//! - Connection string parsing
//! - Local address detection

pub mod connection;
pub mod etcd;
pub mod keys;
pub mod model;
pub mod utils;

// Re-export commonly used types
pub use connection::{CacheSetting, ConnectionOptions, ConnectionStringError};
pub use etcd::{EtcdErrorBody, KeysResponse, Node};
pub use keys::{ALL_SERVICES, Keyspace, cache_key, normalize_name};
pub use model::{ServiceDescriptor, ServiceRecord};
pub use utils::local_ip;

/// Default etcd client endpoint used when no host is configured
pub const DEFAULT_HOST: &str = "http://127.0.0.1:4001";
