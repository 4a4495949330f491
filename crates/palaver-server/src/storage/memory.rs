//! In-memory storage implementations for testing and simulation.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use palaver_proto::StoredMessage;

use super::{HistoryStore, StorageError, UserDirectory, pair_key};

/// In-memory user directory.
///
/// Backed by a `HashSet` behind `Arc<Mutex<>>` so clones share state.
/// Infallible in practice; the `Result` surface exists to match the trait.
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl MemoryUserDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the directory with pre-existing account names.
    ///
    /// Used in tests to model names registered through the external
    /// identity service rather than through a live session.
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn seed(&self, names: impl IntoIterator<Item = impl Into<String>>) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.extend(names.into_iter().map(Into::into));
    }
}

impl UserDirectory for MemoryUserDirectory {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test/simulation code.
    #[allow(clippy::expect_used)]
    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").contains(name))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test/simulation code.
    #[allow(clippy::expect_used)]
    fn add(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").insert(name.to_string()))
    }
}

/// In-memory history store.
///
/// Conversations are keyed by the canonical ordered pair; messages stay in
/// append order within each conversation.
#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<Mutex<HashMap<(String, String), Vec<StoredMessage>>>>,
}

impl MemoryHistoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages, across all pairs.
    ///
    /// Useful for asserting that failed routes persisted nothing.
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn message_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").values().map(Vec::len).sum()
    }
}

impl HistoryStore for MemoryHistoryStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test/simulation code.
    #[allow(clippy::expect_used)]
    fn append(&self, message: &StoredMessage) -> Result<(), StorageError> {
        let (a, b) = pair_key(&message.from, &message.to);
        let key = (a.to_string(), b.to_string());

        self.inner.lock().expect("Mutex poisoned").entry(key).or_default().push(message.clone());

        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for
    /// test/simulation code.
    #[allow(clippy::expect_used)]
    fn query(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StorageError> {
        let (first, second) = pair_key(a, b);
        let key = (first.to_string(), second.to_string());

        Ok(self.inner.lock().expect("Mutex poisoned").get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, to: &str, content: &str, timestamp: u64) -> StoredMessage {
        StoredMessage {
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    #[test]
    fn directory_records_names_once() {
        let directory = MemoryUserDirectory::new();

        assert!(!directory.exists("alice").unwrap());
        assert!(directory.add("alice").unwrap());
        assert!(directory.exists("alice").unwrap());
        assert!(!directory.add("alice").unwrap());
    }

    #[test]
    fn seeded_names_exist() {
        let directory = MemoryUserDirectory::new();
        directory.seed(["taken", "reserved"]);

        assert!(directory.exists("taken").unwrap());
        assert!(directory.exists("reserved").unwrap());
        assert!(!directory.exists("free").unwrap());
    }

    #[test]
    fn query_is_symmetric_in_the_pair() {
        let store = MemoryHistoryStore::new();
        store.append(&message("alice", "bob", "hi", 1)).unwrap();
        store.append(&message("bob", "alice", "hello", 2)).unwrap();

        let forward = store.query("alice", "bob").unwrap();
        let backward = store.query("bob", "alice").unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].content, "hi");
        assert_eq!(forward[1].content, "hello");
    }

    #[test]
    fn pairs_are_isolated() {
        let store = MemoryHistoryStore::new();
        store.append(&message("alice", "bob", "hi", 1)).unwrap();
        store.append(&message("alice", "carol", "hey", 2)).unwrap();

        assert_eq!(store.query("alice", "bob").unwrap().len(), 1);
        assert_eq!(store.query("alice", "carol").unwrap().len(), 1);
        assert!(store.query("bob", "carol").unwrap().is_empty());
        assert_eq!(store.message_count(), 2);
    }

    #[test]
    fn empty_pair_query_returns_empty_vec() {
        let store = MemoryHistoryStore::new();
        assert!(store.query("nobody", "noone").unwrap().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryHistoryStore::new();
        let clone = store.clone();

        clone.append(&message("alice", "bob", "hi", 1)).unwrap();
        assert_eq!(store.message_count(), 1);
    }
}
