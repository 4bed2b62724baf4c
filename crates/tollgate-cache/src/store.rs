//! Coordination store contract and the in-process implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::StoreError;

/// Capacity of the change notification channel.
const WATCH_CAPACITY: usize = 256;

/// What happened to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Put(Bytes),
    Delete,
}

/// A change notification for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub path: String,
    pub change: Change,
}

impl ConfigEvent {
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.change {
            Change::Put(bytes) => Some(bytes),
            Change::Delete => None,
        }
    }
}

/// A hierarchical key/value store with change notification.
///
/// This is all the cache needs from whatever holds the configuration of
/// record: read a node, enumerate a subtree, write, delete and subscribe to
/// changes. Subscribers only see changes made after they subscribed.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Bytes>, StoreError>;

    /// Every node whose path starts with `prefix`, in path order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError>;

    async fn put(&self, path: &str, value: Bytes) -> Result<(), StoreError>;

    /// Returns whether the node existed.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;

    fn watch(&self) -> broadcast::Receiver<ConfigEvent>;
}

/// In-memory [`ConfigStore`].
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, Bytes>>,
    events: broadcast::Sender<ConfigEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn notify(&self, path: &str, change: Change) {
        // No subscribers is fine.
        let _ = self.events.send(ConfigEvent {
            path: path.to_string(),
            change,
        });
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.nodes.read().get(path).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError> {
        let nodes = self.nodes.read();
        Ok(nodes
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect())
    }

    async fn put(&self, path: &str, value: Bytes) -> Result<(), StoreError> {
        self.nodes.write().insert(path.to_string(), value.clone());
        self.notify(path, Change::Put(value));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let existed = self.nodes.write().remove(path).is_some();
        if existed {
            self.notify(path, Change::Delete);
        }
        Ok(existed)
    }

    fn watch(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.read("/tollgate/plugin/waf").await.unwrap(), None);

        store
            .put("/tollgate/plugin/waf", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(
            store.read("/tollgate/plugin/waf").await.unwrap(),
            Some(Bytes::from_static(b"{}"))
        );

        assert!(store.delete("/tollgate/plugin/waf").await.unwrap());
        assert!(!store.delete("/tollgate/plugin/waf").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let store = MemoryStore::new();
        for path in [
            "/tollgate/plugin/a",
            "/tollgate/plugin/b",
            "/tollgate/rule/s1",
            "/tollgate/pluginx",
        ] {
            store.put(path, Bytes::from_static(b"1")).await.unwrap();
        }
        let listed: Vec<String> = store
            .list("/tollgate/plugin/")
            .await
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(listed, vec!["/tollgate/plugin/a", "/tollgate/plugin/b"]);
    }

    #[tokio::test]
    async fn watchers_receive_changes() {
        let store = MemoryStore::new();
        let mut rx = store.watch();

        store
            .put("/tollgate/rule/s1", Bytes::from_static(b"[]"))
            .await
            .unwrap();
        store.delete("/tollgate/rule/s1").await.unwrap();
        // Deleting an absent node does not notify.
        store.delete("/tollgate/rule/s1").await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.path, "/tollgate/rule/s1");
        assert_eq!(first.payload(), Some(&b"[]"[..]));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.change, Change::Delete);
        assert!(rx.try_recv().is_err());
    }
}
