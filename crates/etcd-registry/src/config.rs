//! Registry configuration
//!
//! `RegistryConfig` carries the store endpoints parsed from a connection
//! string plus every timing constant used by the lease, retry, refresh and
//! watch loops.

use std::time::Duration;

use etcd_registry_api::{CacheSetting, ConnectionOptions, DEFAULT_HOST};

use crate::error::Result;

/// TTL written with every lease, in seconds
pub const DEFAULT_TTL_SECS: u64 = 10;

/// Configuration for a [`crate::Registry`]
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Store endpoints (e.g. `http://127.0.0.1:4001`)
    pub hosts: Vec<String>,
    /// Namespace path segment that scopes every key
    pub namespace: String,
    /// Periodically refresh `hosts` from the cluster membership endpoint
    pub refresh: bool,
    /// Directory cache setting
    pub cache: CacheSetting,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds for ordinary requests
    pub read_timeout_ms: u64,
    /// Lease TTL written to the store
    pub ttl: Duration,
    /// Delay between heartbeats after a successful renewal
    pub heartbeat_interval: Duration,
    /// Delay between heartbeats after a failed renewal
    pub heartbeat_retry_interval: Duration,
    /// Delay before retrying a request on the next host
    pub retry_delay: Duration,
    /// Delay between host pool refreshes
    pub refresh_interval: Duration,
    /// Delay before re-arming a failed sentinel watch
    pub watch_backoff: Duration,
    /// Upper bound on a single long-poll
    pub watch_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_HOST.to_string()],
            namespace: String::new(),
            refresh: false,
            cache: CacheSetting::default(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 10000,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_retry_interval: Duration::from_secs(15),
            retry_delay: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(60),
            watch_backoff: Duration::from_secs(5),
            watch_timeout: Duration::from_secs(300),
        }
    }
}

impl RegistryConfig {
    /// Create a config with multiple store endpoints
    pub fn with_hosts(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            ..Default::default()
        }
    }

    /// Parse a connection string such as `127.0.0.1:4001,127.0.0.1:4002/prod?refresh=true`
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let options = ConnectionOptions::parse(connection_string)?;
        Ok(Self::from(options))
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_cache(mut self, cache: CacheSetting) -> Self {
        self.cache = cache;
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Set heartbeat periods after successful and failed renewals
    pub fn with_heartbeat(mut self, interval: Duration, retry_interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_retry_interval = retry_interval;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set watch backoff and long-poll timeout
    pub fn with_watch(mut self, backoff: Duration, timeout: Duration) -> Self {
        self.watch_backoff = backoff;
        self.watch_timeout = timeout;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl From<ConnectionOptions> for RegistryConfig {
    fn from(options: ConnectionOptions) -> Self {
        Self {
            hosts: options.hosts,
            namespace: options.namespace,
            refresh: options.refresh,
            cache: options.cache,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.hosts, vec!["http://127.0.0.1:4001"]);
        assert_eq!(config.ttl, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_retry_interval, Duration::from_secs(15));
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.watch_backoff, Duration::from_secs(5));
        assert_eq!(config.cache, CacheSetting::Size(100));
        assert!(!config.refresh);
    }

    #[test]
    fn test_config_from_connection_string() {
        let config =
            RegistryConfig::from_connection_string("127.0.0.1:4001,127.0.0.1:4002/prod?cache=false")
                .unwrap();
        assert_eq!(
            config.hosts,
            vec!["http://127.0.0.1:4001", "http://127.0.0.1:4002"]
        );
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.cache, CacheSetting::Disabled);
    }

    #[test]
    fn test_config_builder() {
        let config = RegistryConfig::with_hosts(vec!["http://etcd:2379".to_string()])
            .with_namespace("staging")
            .with_refresh(true)
            .with_timeouts(1000, 2000)
            .with_heartbeat(Duration::from_millis(50), Duration::from_millis(150))
            .with_retry_delay(Duration::from_millis(10))
            .with_watch(Duration::from_millis(20), Duration::from_secs(1));

        assert_eq!(config.hosts, vec!["http://etcd:2379"]);
        assert_eq!(config.namespace, "staging");
        assert!(config.refresh);
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(50));
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert_eq!(config.watch_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_config_rejects_bad_connection_string() {
        assert!(RegistryConfig::from_connection_string("https://discovery.etcd.io/x").is_err());
    }
}
