//! In-process identity cache.
//!
//! Authoritative only while this process is the single writer of the store.
//! In shared-writer mode every lookup misses and inserts are dropped, so all
//! reads go to the store.

use dashmap::DashMap;
use naming_types::{Identifier, Identity, IdentityKey};

use crate::config::StoreMode;

/// Identity cache keyed both by identity key and by identifier.
pub struct IdentityCache {
    mode: StoreMode,
    by_key: DashMap<IdentityKey, Identity>,
    by_identifier: DashMap<Identifier, Identity>,
}

impl IdentityCache {
    pub fn new(mode: StoreMode) -> Self {
        Self {
            mode,
            by_key: DashMap::new(),
            by_identifier: DashMap::new(),
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn is_authoritative(&self) -> bool {
        self.mode == StoreMode::SingleWriter
    }

    pub fn lookup_identifier(&self, identifier: &Identifier) -> Option<Identity> {
        if !self.is_authoritative() {
            return None;
        }
        self.by_identifier
            .get(identifier)
            .map(|entry| entry.value().clone())
    }

    pub fn lookup_key(&self, key: IdentityKey) -> Option<Identity> {
        if !self.is_authoritative() {
            return None;
        }
        self.by_key.get(&key).map(|entry| entry.value().clone())
    }

    /// Insert-if-absent. Returns the cached value, which is the earlier entry
    /// when another task published first.
    pub fn insert_identifier(&self, identifier: Identifier, identity: Identity) -> Identity {
        if !self.is_authoritative() {
            return identity;
        }
        self.by_key
            .entry(identity.key)
            .or_insert_with(|| identity.clone());
        self.by_identifier
            .entry(identifier)
            .or_insert(identity)
            .value()
            .clone()
    }

    pub fn insert_key(&self, identity: Identity) -> Identity {
        if !self.is_authoritative() {
            return identity;
        }
        self.by_key
            .entry(identity.key)
            .or_insert(identity)
            .value()
            .clone()
    }

    pub fn invalidate(&self, identity: &Identity) {
        self.invalidate_key(identity.key);
    }

    /// Drop the key entry and every identifier entry resolving to it.
    pub fn invalidate_key(&self, key: IdentityKey) {
        self.by_key.remove(&key);
        self.by_identifier.retain(|_, cached| cached.key != key);
        tracing::trace!(key = %key, "invalidated cached identity");
    }

    pub fn clear(&self) {
        self.by_key.clear();
        self.by_identifier.clear();
    }

    /// Number of cached identifier entries.
    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty() && self.by_key.is_empty()
    }
}
