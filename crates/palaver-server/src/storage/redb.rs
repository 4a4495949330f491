//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. One
//! database file holds both collaborators: the user directory and the chat
//! log. All state survives server restarts.

use std::{path::Path, sync::Arc};

use palaver_proto::StoredMessage;
use redb::{Database, ReadableTable, TableDefinition};

use super::{HistoryStore, StorageError, UserDirectory, pair_key};

/// Table: users
/// Key: display name (UTF-8 bytes)
/// Value: empty (presence-only set)
const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");

/// Table: messages
/// Key: `len(a): u32 BE | a | len(b): u32 BE | b | seq: u64 BE` where
/// `(a, b)` is the canonical ordered pair. The length prefixes keep keys of
/// different pairs from sharing a byte prefix, so range scans over one pair
/// never leak into another.
/// Value: JSON-encoded [`StoredMessage`]
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc). The
/// same value is passed to the relay twice: once as the [`UserDirectory`]
/// and once as the [`HistoryStore`].
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the USERS and MESSAGES tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the database cannot be opened or
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db =
            Database::create(path.as_ref()).map_err(|e| StorageError::Backend(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let _ = txn.open_table(USERS).map_err(|e| StorageError::Backend(e.to_string()))?;
            let _ = txn.open_table(MESSAGES).map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Count existing messages for a pair (the next sequence number).
    fn count_pair<T: ReadableTable<&'static [u8], &'static [u8]>>(
        table: &T,
        prefix: &[u8],
    ) -> Result<u64, StorageError> {
        let start = encode_message_key(prefix, 0);
        let end = encode_message_key(prefix, u64::MAX);

        let results = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut count = 0u64;
        for result in results {
            result.map_err(|e| StorageError::Backend(e.to_string()))?;
            count += 1;
        }

        Ok(count)
    }
}

impl UserDirectory for RedbStore {
    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = txn.open_table(USERS).map_err(|e| StorageError::Backend(e.to_string()))?;

        let found = table
            .get(name.as_bytes())
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .is_some();

        Ok(found)
    }

    fn add(&self, name: &str) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Backend(e.to_string()))?;

        let newly_added = {
            let mut table =
                txn.open_table(USERS).map_err(|e| StorageError::Backend(e.to_string()))?;

            let empty: &[u8] = &[];
            let previous = table
                .insert(name.as_bytes(), empty)
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            previous.is_none()
        };

        txn.commit().map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(newly_added)
    }
}

impl HistoryStore for RedbStore {
    fn append(&self, message: &StoredMessage) -> Result<(), StorageError> {
        let (a, b) = pair_key(&message.from, &message.to);
        let prefix = encode_pair_prefix(a, b);

        let bytes = serde_json::to_vec(message)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut table =
                txn.open_table(MESSAGES).map_err(|e| StorageError::Backend(e.to_string()))?;

            let seq = Self::count_pair(&table, &prefix)?;
            let key = encode_message_key(&prefix, seq);

            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    fn query(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StorageError> {
        let (first, second) = pair_key(a, b);
        let prefix = encode_pair_prefix(first, second);

        let txn = self.db.begin_read().map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StorageError::Backend(e.to_string()))?;

        let start = encode_message_key(&prefix, 0);
        let end = encode_message_key(&prefix, u64::MAX);

        let results = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut messages = Vec::new();
        for result in results {
            let (_, value) = result.map_err(|e| StorageError::Backend(e.to_string()))?;

            let message: StoredMessage = serde_json::from_slice(value.value())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            messages.push(message);
        }

        Ok(messages)
    }
}

/// Encode the canonical pair as a length-prefixed byte prefix.
fn encode_pair_prefix(a: &str, b: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(8 + a.len() + b.len());
    prefix.extend_from_slice(&(a.len() as u32).to_be_bytes());
    prefix.extend_from_slice(a.as_bytes());
    prefix.extend_from_slice(&(b.len() as u32).to_be_bytes());
    prefix.extend_from_slice(b.as_bytes());
    prefix
}

/// Append the sequence number to a pair prefix.
fn encode_message_key(prefix: &[u8], seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}
