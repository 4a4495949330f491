//! Connection registry: the authoritative live username → session mapping.
//!
//! The registry is the one structure every connection touches, so all
//! mutation goes through [`ConnectionRegistry::register`] and
//! [`ConnectionRegistry::deregister`]; the raw map is never exposed. The
//! relay driver owns the registry and processes events one at a time, which
//! gives every operation here single-critical-section semantics: a
//! name-availability check and the matching insert can never interleave
//! with another registration.
//!
//! Registration also cross-checks the persisted [`UserDirectory`]: a name
//! that already belongs to a persisted account may not be claimed as a live
//! handle. Names the registry itself recorded during this process's
//! lifetime are exempt from that check, so a user who disconnects can
//! immediately reconnect under the same name.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::storage::UserDirectory;

/// Why a registration was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The requested name was empty after trimming.
    #[error("username cannot be empty")]
    EmptyName,

    /// The name is held by a live session or a persisted account.
    #[error("username '{0}' is already in use")]
    NameInUse(String),
}

/// Live username → session-id mapping.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Display name → session ID of the one live session holding it
    names: HashMap<String, u64>,
    /// Names this registry recorded in the directory itself; exempt from
    /// the persisted-account collision check on re-registration
    recorded: HashSet<String>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `session_id`.
    ///
    /// Rejects an empty (post-trim) name, a name held by a live session,
    /// and a name that collides with a persisted account the registry did
    /// not record itself. On success the name is inserted into the live map
    /// and recorded in the directory.
    ///
    /// A directory read failure degrades to "name unknown" rather than
    /// rejecting the registration; a record failure is logged and the
    /// registration stands (the live map remains authoritative for
    /// presence).
    ///
    /// # Errors
    ///
    /// - `RegisterError::EmptyName` if `name` trims to nothing
    /// - `RegisterError::NameInUse` on any collision
    pub fn register<D: UserDirectory>(
        &mut self,
        name: &str,
        session_id: u64,
        directory: &D,
    ) -> Result<(), RegisterError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegisterError::EmptyName);
        }

        if self.names.contains_key(name) {
            return Err(RegisterError::NameInUse(name.to_string()));
        }

        let persisted = directory.exists(name).unwrap_or_else(|e| {
            tracing::warn!("directory lookup failed for '{}': {}", name, e);
            false
        });

        if persisted && !self.recorded.contains(name) {
            return Err(RegisterError::NameInUse(name.to_string()));
        }

        self.names.insert(name.to_string(), session_id);

        match directory.add(name) {
            Ok(_) => {
                self.recorded.insert(name.to_string());
            },
            Err(e) => {
                // Presence still works off the live map; durability of the
                // directory entry is best-effort.
                tracing::warn!("failed to record '{}' in directory: {}", name, e);
            },
        }

        Ok(())
    }

    /// Release `name`. Idempotent: removing an absent name is a no-op.
    ///
    /// Returns whether a live entry was actually removed, so callers can
    /// suppress roster broadcasts for no-op removals.
    pub fn deregister(&mut self, name: &str) -> bool {
        self.names.remove(name).is_some()
    }

    /// Session ID currently holding `name`, if any.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.names.get(name).copied()
    }

    /// Whether `name` is held by a live session.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// All currently registered names, sorted.
    ///
    /// Sorted so roster frames are deterministic on the wire.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Session IDs of all registered sessions (broadcast targets).
    #[must_use]
    pub fn session_ids(&self) -> Vec<u64> {
        self.names.values().copied().collect()
    }

    /// Number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no names are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
