//! Service record models
//!
//! A `ServiceDescriptor` is what a caller hands to `join`; a `ServiceRecord`
//! is the resolved, immutable form that gets written to the store and read
//! back by directory lookups.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Field names owned by the record itself. Extra fields using these names
/// are dropped so the stored JSON never carries duplicate keys.
const RESERVED_FIELDS: &[&str] = &["name", "hostname", "port", "protocol", "host", "url"];

/// Default protocol used when deriving a record URL
pub const DEFAULT_PROTOCOL: &str = "http";

/// Caller-supplied description of a service instance.
///
/// Every field is optional; missing values are filled in when the
/// descriptor is resolved into a [`ServiceRecord`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Arbitrary extra fields stored alongside the record
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for a listening port on the local host
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = Some(protocol.to_string());
        self
    }

    /// Override the derived `host` value
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Override the derived `url` value
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Attach an extra field to the record
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

impl From<u16> for ServiceDescriptor {
    fn from(port: u16) -> Self {
        Self::new().with_port(port)
    }
}

/// A registered service instance as stored in the registry.
///
/// `host` and `url` are derived once, when the record is built, and are
/// never recomputed afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub hostname: String,
    /// Written as a number; other clients sometimes store it as a string
    #[serde(
        default,
        deserialize_with = "port_from_number_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub host: String,
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceRecord {
    /// Resolve a descriptor into a record.
    ///
    /// `default_hostname` is only called when the descriptor has no hostname.
    pub fn from_descriptor<F>(name: &str, descriptor: ServiceDescriptor, default_hostname: F) -> Self
    where
        F: FnOnce() -> String,
    {
        let ServiceDescriptor {
            hostname,
            port,
            protocol,
            host,
            url,
            mut extra,
        } = descriptor;

        extra.retain(|key, _| !RESERVED_FIELDS.contains(&key.as_str()));

        let hostname = hostname.unwrap_or_else(default_hostname);
        let host = host.unwrap_or_else(|| match port {
            Some(port) => format!("{}:{}", hostname, port),
            None => hostname.clone(),
        });
        let url = url.unwrap_or_else(|| {
            format!(
                "{}://{}",
                protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL),
                host
            )
        });

        Self {
            name: name.to_string(),
            hostname,
            port,
            protocol,
            host,
            url,
            extra,
        }
    }

    /// Look up an extra field by name
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u16),
        Text(String),
    }

    match Option::<RawPort>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawPort::Number(port)) => Ok(Some(port)),
        Some(RawPort::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawPort::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {:?}", text))),
    }
}
