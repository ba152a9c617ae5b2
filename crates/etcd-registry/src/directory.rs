//! Directory reader - resolves service names into registered records

use std::sync::Arc;

use etcd_registry_api::{Keyspace, Node, ServiceRecord};
use rand::seq::IndexedRandom;
use tracing::debug;

use crate::error::Result;
use crate::store::KeyValueStore;

/// Reads service records straight from the store
pub struct DirectoryReader {
    store: Arc<dyn KeyValueStore>,
    keyspace: Keyspace,
}

impl DirectoryReader {
    pub fn new(store: Arc<dyn KeyValueStore>, keyspace: Keyspace) -> Self {
        Self { store, keyspace }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// All records registered under `name`, or under every name for `None`.
    ///
    /// A missing directory yields an empty list. Values that are not valid
    /// records are skipped.
    pub async fn list(&self, name: Option<&str>) -> Result<Vec<ServiceRecord>> {
        let key = self.keyspace.directory_key(name);
        let Some(response) = self.store.get(&key, true).await? else {
            debug!("Directory {} not found", key);
            return Ok(Vec::new());
        };

        let records = flatten(&response.node)
            .into_iter()
            .filter_map(|node| {
                let value = node.value()?;
                match serde_json::from_str::<ServiceRecord>(value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        debug!("Skipping unreadable entry {}: {}", node.key, e);
                        None
                    }
                }
            })
            .collect();
        Ok(records)
    }

    /// One record for `name`, picked uniformly at random
    pub async fn lookup(&self, name: Option<&str>) -> Result<Option<ServiceRecord>> {
        let records = self.list(name).await?;
        Ok(pick_random(&records))
    }
}

/// Every node carrying a value, depth-first in store order
pub fn flatten(node: &Node) -> Vec<&Node> {
    let mut out = Vec::new();
    collect(node, &mut out);
    out
}

fn collect<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    if node.value().is_some() {
        out.push(node);
    }
    for child in &node.nodes {
        collect(child, out);
    }
}

/// Random selection across records
pub fn pick_random(records: &[ServiceRecord]) -> Option<ServiceRecord> {
    records.choose(&mut rand::rng()).cloned()
}
