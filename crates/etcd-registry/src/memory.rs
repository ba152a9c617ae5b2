//! In-process key-value store
//!
//! `MemoryStore` mirrors the parts of the etcd v2 keys API the registry
//! relies on: a key tree built from `/`-separated paths, TTL expiry,
//! a modification index and blocking waits on a key. Expired keys are purged
//! lazily on the next operation, using the tokio clock so paused-time tests
//! observe expiry.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use etcd_registry_api::{KeysResponse, Node};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{RegistryError, Result};
use crate::store::KeyValueStore;

/// Number of modifications kept for `wait` lookups
const EVENT_HISTORY: usize = 1000;

/// A write recorded by [`MemoryStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Set {
        key: String,
        value: String,
        ttl: Option<u64>,
    },
    Delete {
        key: String,
    },
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    created_index: u64,
    modified_index: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn node(&self, key: &str, now: Instant) -> Node {
        let mut node = Node::leaf(&format!("/{}", key), &self.value, self.modified_index);
        node.created_index = self.created_index;
        node.ttl = self
            .expires_at
            .map(|at| at.saturating_duration_since(now).as_secs() as i64);
        node
    }

    /// Node describing this entry after removal at `index`
    fn tombstone(&self, key: &str, index: u64) -> Node {
        Node {
            key: format!("/{}", key),
            created_index: self.created_index,
            modified_index: index,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
struct Event {
    index: u64,
    key: String,
    response: KeysResponse,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    index: u64,
    events: VecDeque<Event>,
    machines: Option<Vec<String>>,
    unavailable: bool,
    operations: Vec<Operation>,
}

impl State {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(RegistryError::Store {
                status: 503,
                message: "store unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, key: &str, action: &str, node: Node) {
        if self.events.len() == EVENT_HISTORY {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            index: self.index,
            key: key.to_string(),
            response: KeysResponse {
                action: action.to_string(),
                node,
                prev_node: None,
            },
        });
    }

    /// Remove expired entries; returns whether anything changed
    fn purge(&mut self, now: Instant) -> bool {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.index += 1;
                let node = entry.tombstone(key, self.index);
                self.record(key, "expire", node);
            }
        }
        !expired.is_empty()
    }

    fn directory(&self, path: &str, recursive: bool, now: Instant) -> Option<Node> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let mut children = Vec::new();
        let mut seen = BTreeSet::new();
        for (key, entry) in self.entries.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                None => children.push(entry.node(key, now)),
                Some((segment, _)) => {
                    let child = format!("{}{}", prefix, segment);
                    if !seen.insert(child.clone()) {
                        continue;
                    }
                    let node = if recursive {
                        self.directory(&child, true, now)
                    } else {
                        None
                    };
                    children.push(
                        node.unwrap_or_else(|| Node::directory(&format!("/{}", child), Vec::new())),
                    );
                }
            }
        }

        if children.is_empty() && !path.is_empty() {
            return None;
        }
        Some(Node::directory(&format!("/{}", path), children))
    }
}

/// In-memory [`KeyValueStore`]
pub struct MemoryStore {
    state: Mutex<State>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            changes,
        }
    }

    /// Set the member list returned by `machines()`
    pub fn set_machines(&self, machines: Vec<String>) {
        self.state.lock().machines = Some(machines);
    }

    /// Make every operation fail with a 503 store error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
        // Wake waiters so they observe the outage
        self.changes.send_modify(|_| {});
    }

    /// Writes applied so far, oldest first
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().operations.clone()
    }

    /// Current value of a key, if it exists and has not expired
    pub fn value(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        self.purge(&mut state);
        state
            .entries
            .get(normalize_key(key))
            .map(|e| e.value.clone())
    }

    /// All live keys in tree order
    pub fn keys(&self) -> Vec<String> {
        let mut state = self.state.lock();
        self.purge(&mut state);
        state.entries.keys().cloned().collect()
    }

    /// Current modification index
    pub fn index(&self) -> u64 {
        self.state.lock().index
    }

    fn purge(&self, state: &mut State) {
        if state.purge(Instant::now()) {
            self.changes.send_replace(state.index);
        }
    }
}

fn normalize_key(key: &str) -> &str {
    key.trim_matches('/')
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Option<KeysResponse>> {
        let key = normalize_key(key);
        let mut state = self.state.lock();
        state.check_available()?;
        self.purge(&mut state);

        let now = Instant::now();
        let node = match state.entries.get(key) {
            Some(entry) => Some(entry.node(key, now)),
            None => state.directory(key, recursive, now),
        };

        Ok(node.map(|node| KeysResponse {
            action: "get".to_string(),
            node,
            prev_node: None,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = normalize_key(key);
        let mut state = self.state.lock();
        state.check_available()?;
        self.purge(&mut state);

        let now = Instant::now();
        state.index += 1;
        let index = state.index;
        let created_index = state
            .entries
            .get(key)
            .map(|e| e.created_index)
            .unwrap_or(index);
        let entry = Entry {
            value: value.to_string(),
            created_index,
            modified_index: index,
            expires_at: ttl.map(|ttl| now + ttl),
        };
        let node = entry.node(key, now);
        state.entries.insert(key.to_string(), entry);
        state.record(key, "set", node);
        state.operations.push(Operation::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl: ttl.map(|ttl| ttl.as_secs()),
        });
        drop(state);

        self.changes.send_replace(index);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = normalize_key(key);
        let mut state = self.state.lock();
        state.check_available()?;
        self.purge(&mut state);

        state.operations.push(Operation::Delete {
            key: key.to_string(),
        });
        let Some(entry) = state.entries.remove(key) else {
            return Ok(());
        };

        state.index += 1;
        let index = state.index;
        state.record(key, "delete", entry.tombstone(key, index));
        drop(state);

        self.changes.send_replace(index);
        Ok(())
    }

    async fn wait(&self, key: &str, wait_index: Option<u64>) -> Result<KeysResponse> {
        let key = normalize_key(key);
        // Subscribe before reading state so no modification is missed
        let mut changes = self.changes.subscribe();
        let from = match wait_index {
            Some(index) => index,
            None => self.state.lock().index + 1,
        };

        loop {
            {
                let mut state = self.state.lock();
                state.check_available()?;
                self.purge(&mut state);
                if let Some(event) = state
                    .events
                    .iter()
                    .find(|event| event.index >= from && event.key == key)
                {
                    return Ok(event.response.clone());
                }
            }

            changes
                .changed()
                .await
                .map_err(|e| RegistryError::Other(e.into()))?;
        }
    }

    async fn machines(&self) -> Result<Option<Vec<String>>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.machines.clone())
    }
}
