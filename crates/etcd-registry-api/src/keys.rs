//! Keyspace layout for registry data in the store
//!
//! | Key                                          | Content                         |
//! |----------------------------------------------|---------------------------------|
//! | `services/<ns><name>/<sha1(name-url)>`       | JSON service record, with TTL   |
//! | `<ns>updated`                                | RFC 3339 timestamp (sentinel)   |

use std::sync::LazyLock;

use sha1::{Digest, Sha1};

/// Root prefix for all service records
pub const SERVICES_ROOT: &str = "services/";

/// Sentinel key name (relative to the namespace) bumped on every mutation
pub const SENTINEL_KEY: &str = "updated";

/// Cache key used for "all services" reads
pub const ALL_SERVICES: &str = "*";

/// Characters outside this set are replaced when a name is used in a key
static NAME_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("[^a-zA-Z0-9-]").expect("Invalid regex pattern"));

/// Normalize a service name for use as a key segment
///
/// # Examples
///
/// ```
/// use etcd_registry_api::normalize_name;
///
/// assert_eq!(normalize_name("my.service_v2"), "my-service-v2");
/// assert_eq!(normalize_name("api-gateway"), "api-gateway");
/// ```
pub fn normalize_name(name: &str) -> String {
    NAME_PATTERN.replace_all(name, "-").into_owned()
}

/// Cache key for a directory read; `None` means all services
pub fn cache_key(name: Option<&str>) -> String {
    match name {
        Some(name) => normalize_name(name),
        None => ALL_SERVICES.to_string(),
    }
}

/// Namespaced key layout for one registry instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keyspace {
    /// Normalized namespace: empty, or ends with `/` and never starts with one
    namespace: String,
}

impl Keyspace {
    pub fn new(namespace: &str) -> Self {
        let mut namespace = namespace.trim_start_matches('/').to_string();
        if !namespace.is_empty() && !namespace.ends_with('/') {
            namespace.push('/');
        }
        Self { namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix that holds every registered service in this namespace
    pub fn services_prefix(&self) -> String {
        format!("{}{}", SERVICES_ROOT, self.namespace)
    }

    /// Directory key for one service, or the whole namespace when `name` is `None`
    pub fn directory_key(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("{}{}", self.services_prefix(), normalize_name(name)),
            None => self.services_prefix(),
        }
    }

    /// Lease key for a record; stable for a given name and url
    pub fn lease_key(&self, name: &str, url: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!("{}-{}", name, url).as_bytes());
        let digest = const_hex::encode(hasher.finalize());
        format!("{}/{}", self.directory_key(Some(name)), digest)
    }

    /// Key bumped on every registry mutation to fan out cache invalidation
    pub fn sentinel_key(&self) -> String {
        format!("{}{}", self.namespace, SENTINEL_KEY)
    }
}
