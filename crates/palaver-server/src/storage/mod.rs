//! Storage abstractions for the relay's two external collaborators.
//!
//! The relay treats persistence as a pair of narrow, trait-shaped contracts:
//!
//! - [`UserDirectory`]: the persisted set of display names ever recorded,
//!   consulted (and extended) during registration.
//! - [`HistoryStore`]: the append-only log of delivered messages, queryable
//!   by participant pair.
//!
//! Both traits are synchronous (no async) to keep the driver's event
//! processing a plain function of its inputs. Implementations must be
//! `Clone + Send + Sync`; they typically share internal state via `Arc`, so
//! clones observe the same underlying data. The relay survives any failure
//! here: a failing directory degrades to "name unknown" and a failing
//! history store degrades to empty replays.

mod error;
mod memory;
mod redb;

pub use error::StorageError;
pub use memory::{MemoryHistoryStore, MemoryUserDirectory};
use palaver_proto::StoredMessage;

pub use self::redb::RedbStore;

/// Persisted set of display names, used only for uniqueness checks.
pub trait UserDirectory: Clone + Send + Sync + 'static {
    /// Whether `name` has ever been recorded.
    fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Record `name`. Returns `true` if it was newly recorded, `false` if
    /// it was already present.
    fn add(&self, name: &str) -> Result<bool, StorageError>;
}

/// Append-only log of delivered messages, queryable by participant pair.
///
/// The pair is unordered: `query(a, b)` and `query(b, a)` return the same
/// conversation, in append order.
pub trait HistoryStore: Clone + Send + Sync + 'static {
    /// Append one delivered message.
    fn append(&self, message: &StoredMessage) -> Result<(), StorageError>;

    /// All messages exchanged between `a` and `b`, oldest first.
    ///
    /// A pair with no recorded traffic yields an empty vector, not an
    /// error.
    fn query(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StorageError>;
}

/// Canonical (ordered) form of an unordered participant pair.
///
/// Both store implementations key conversations by this so that
/// `query(a, b)` and `query(b, a)` hit the same log.
pub(crate) fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}
