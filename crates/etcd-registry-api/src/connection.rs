//! Connection string parsing
//!
//! Format: `[scheme://]host[:port][,host[:port]...][/namespace][?refresh=..&cache=..]`
//!
//! - `scheme` defaults to `http://` and applies to every host
//! - `namespace` scopes all keys written by the registry
//! - `refresh` enables periodic cluster membership refresh
//! - `cache` is the directory cache size, or `false` to disable it

use std::str::FromStr;
use std::sync::LazyLock;

use crate::DEFAULT_HOST;

/// Default number of directory cache entries
pub const DEFAULT_CACHE_SIZE: u64 = 100;

static CONNECTION_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^([^:]+://)?([^/?]+)(?:/([^?]+))?(?:\?(.+))?$")
        .expect("Invalid regex pattern")
});

static HOST_SEPARATOR: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r",\s*").expect("Invalid regex pattern"));

const DISCOVERY_PREFIX: &str = "https://discovery.etcd.io/";

/// Errors raised while parsing a connection string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionStringError {
    #[error("invalid connection string: {0}")]
    Malformed(String),

    #[error("discovery tokens are not supported: {0}")]
    DiscoveryToken(String),
}

/// Directory cache setting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheSetting {
    Disabled,
    Size(u64),
}

impl Default for CacheSetting {
    fn default() -> Self {
        CacheSetting::Size(DEFAULT_CACHE_SIZE)
    }
}

impl CacheSetting {
    /// Maximum entry count, or `None` when disabled
    pub fn capacity(&self) -> Option<u64> {
        match self {
            CacheSetting::Disabled => None,
            CacheSetting::Size(size) => Some(*size),
        }
    }
}

/// A typed query option value
#[derive(Clone, Debug, PartialEq, Eq)]
enum Setting {
    Bool(bool),
    Int(u64),
    Text(String),
}

impl Setting {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" => None,
            "true" => Some(Setting::Bool(true)),
            "false" => Some(Setting::Bool(false)),
            _ if raw.bytes().all(|b| b.is_ascii_digit()) => {
                raw.parse().ok().map(Setting::Int)
            }
            _ => Some(Setting::Text(raw.to_string())),
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Setting::Bool(b) => *b,
            Setting::Int(n) => *n != 0,
            Setting::Text(s) => !s.is_empty(),
        }
    }
}

/// Parsed connection string
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Store endpoints, each with a scheme (e.g. `http://127.0.0.1:4001`)
    pub hosts: Vec<String>,
    /// Raw namespace path segment (normalized later by `Keyspace`)
    pub namespace: String,
    /// Periodically refresh the host list from the cluster
    pub refresh: bool,
    pub cache: CacheSetting,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_HOST.to_string()],
            namespace: String::new(),
            refresh: false,
            cache: CacheSetting::default(),
        }
    }
}

impl ConnectionOptions {
    pub fn parse(input: &str) -> Result<Self, ConnectionStringError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::default());
        }
        if input.starts_with(DISCOVERY_PREFIX) {
            return Err(ConnectionStringError::DiscoveryToken(input.to_string()));
        }

        let captures = CONNECTION_PATTERN
            .captures(input)
            .ok_or_else(|| ConnectionStringError::Malformed(input.to_string()))?;

        let scheme = captures.get(1).map_or("http://", |m| m.as_str());
        let hosts: Vec<String> = HOST_SEPARATOR
            .split(&captures[2])
            .filter(|h| !h.is_empty())
            .map(|h| format!("{}{}", scheme, h))
            .collect();
        if hosts.is_empty() {
            return Err(ConnectionStringError::Malformed(input.to_string()));
        }

        let namespace = captures
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let query: Vec<(String, String)> = match captures.get(4) {
            Some(qs) => serde_urlencoded::from_str(qs.as_str())
                .map_err(|e| ConnectionStringError::Malformed(format!("{}: {}", input, e)))?,
            None => Vec::new(),
        };
        let setting = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| Setting::parse(v))
        };

        let refresh = setting("refresh").is_some_and(|s| s.is_truthy());
        let cache = match setting("cache") {
            Some(Setting::Bool(false)) | Some(Setting::Int(0)) => CacheSetting::Disabled,
            Some(Setting::Int(size)) => CacheSetting::Size(size),
            _ => CacheSetting::default(),
        };

        Ok(Self {
            hosts,
            namespace,
            refresh,
            cache,
        })
    }
}

impl FromStr for ConnectionOptions {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
