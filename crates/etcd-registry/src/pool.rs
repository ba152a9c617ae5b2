//! Host pool with round-robin rotation and membership refresh
//!
//! The endpoint list is an immutable `Arc<Vec<String>>` that is swapped
//! wholesale on refresh, so readers always see a fully formed list.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::listener::{MembershipEvent, MembershipListener};
use crate::store::KeyValueStore;

/// Ordered set of store endpoints.
pub struct HostPool {
    hosts: RwLock<Arc<Vec<String>>>,
    cursor: AtomicUsize,
    listeners: RwLock<Vec<Arc<dyn MembershipListener>>>,
}

impl HostPool {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: RwLock::new(Arc::new(normalize_hosts(hosts))),
            cursor: AtomicUsize::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Current endpoint list
    pub fn snapshot(&self) -> Arc<Vec<String>> {
        self.hosts.read().clone()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    /// Next endpoint in round-robin order
    pub fn next(&self) -> Option<String> {
        let hosts = self.snapshot();
        if hosts.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(hosts[index % hosts.len()].clone())
    }

    /// Register a listener for membership changes
    pub fn add_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.listeners.write().push(listener);
    }

    /// Replace the endpoint list if it differs from the current one.
    ///
    /// Returns `true` when the pool changed. Empty lists are ignored.
    pub fn replace(&self, hosts: Vec<String>) -> bool {
        let hosts = normalize_hosts(hosts);
        if hosts.is_empty() {
            return false;
        }

        let event = {
            let mut guard = self.hosts.write();
            if guard.as_slice() == hosts.as_slice() {
                return false;
            }
            let previous = std::mem::replace(&mut *guard, Arc::new(hosts));
            MembershipEvent {
                previous,
                current: guard.clone(),
            }
        };

        info!(
            "Store membership changed to {:?} (added {:?}, removed {:?})",
            event.current,
            event.added(),
            event.removed()
        );

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_change(&event);
        }
        true
    }

    /// Fetch the cluster member list and swap it in if it changed.
    pub async fn refresh(&self, store: &dyn KeyValueStore) -> Result<bool> {
        match store.machines().await? {
            Some(machines) => Ok(self.replace(machines)),
            None => {
                debug!("Membership endpoint returned not found");
                Ok(false)
            }
        }
    }
}

/// Start the periodic membership refresh loop.
///
/// The loop never ends on its own; abort the returned handle to stop it.
pub fn spawn_refresh_loop(
    pool: Arc<HostPool>,
    store: Arc<dyn KeyValueStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match pool.refresh(store.as_ref()).await {
                Ok(changed) => debug!("Host pool refresh complete, changed={}", changed),
                Err(e) => warn!("Host pool refresh failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    })
}

fn normalize_hosts(hosts: Vec<String>) -> Vec<String> {
    hosts
        .into_iter()
        .map(|h| h.trim().trim_end_matches('/').to_string())
        .filter(|h| !h.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn pool_of(hosts: &[&str]) -> HostPool {
        HostPool::new(hosts.iter().map(|h| h.to_string()).collect())
    }

    #[test]
    fn test_next_round_robin() {
        let pool = pool_of(&["http://a:4001", "http://b:4001", "http://c:4001"]);

        let picked: Vec<String> = (0..4).filter_map(|_| pool.next()).collect();
        assert_eq!(
            picked,
            vec!["http://a:4001", "http://b:4001", "http://c:4001", "http://a:4001"]
        );
    }

    #[test]
    fn test_next_empty() {
        let pool = pool_of(&[]);
        assert!(pool.is_empty());
        assert!(pool.next().is_none());
    }

    #[test]
    fn test_hosts_are_normalized() {
        let pool = pool_of(&[" http://a:4001/ ", ""]);
        assert_eq!(pool.snapshot().as_slice(), ["http://a:4001".to_string()]);
    }

    #[test]
    fn test_replace_notifies_only_on_change() {
        let pool = pool_of(&["http://a:4001"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        pool.add_listener(Arc::new(move |event: &MembershipEvent| {
            assert_eq!(event.previous.as_slice(), ["http://a:4001".to_string()]);
            assert_eq!(event.added(), vec!["http://b:4001"]);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!pool.replace(vec!["http://a:4001".to_string()]));
        assert!(!pool.replace(Vec::new()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(pool.replace(vec![
            "http://a:4001".to_string(),
            "http://b:4001".to_string()
        ]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_replace() {
        let pool = pool_of(&["http://a:4001"]);
        let before = pool.snapshot();
        pool.replace(vec!["http://b:4001".to_string()]);

        assert_eq!(before.as_slice(), ["http://a:4001".to_string()]);
        assert_eq!(pool.snapshot().as_slice(), ["http://b:4001".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_from_store() {
        let pool = pool_of(&["http://a:4001"]);
        let store = MemoryStore::new();

        // No membership information: nothing changes
        assert!(!pool.refresh(&store).await.unwrap());

        store.set_machines(vec![
            "http://a:4001".to_string(),
            "http://b:4001".to_string(),
        ]);
        assert!(pool.refresh(&store).await.unwrap());
        assert!(!pool.refresh(&store).await.unwrap());
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_keeps_running_after_failure() {
        let pool = Arc::new(pool_of(&["http://a:4001"]));
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let handle = spawn_refresh_loop(pool.clone(), store.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pool.len(), 1);

        store.set_unavailable(false);
        store.set_machines(vec!["http://c:4001".to_string()]);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(pool.snapshot().as_slice(), ["http://c:4001".to_string()]);

        handle.abort();
    }
}
