//! In-memory reference implementation of the identity store.
//!
//! Deterministic and test-friendly. A transaction takes the single writer
//! slot, works on a private copy of the committed state and swaps it in on
//! commit, so readers never observe a half-applied merge.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use naming_types::{Category, Identifier, Identity, IdentityKey, SignedReply, SuccessionRecord};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{key_value, value_key, Row, RewriteSummary};
use crate::reference::ReferenceColumn;
use crate::traits::{IdentityStore, StoreTransaction};
use crate::{StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct StoreState {
    identities: BTreeMap<IdentityKey, Identity>,
    index: BTreeMap<Identifier, IdentityKey>,
    successors: BTreeMap<Identifier, SuccessionRecord>,
    tables: BTreeMap<String, Vec<Row>>,
}

impl StoreState {
    fn get_by_key(&self, key: IdentityKey) -> StoreResult<Identity> {
        self.identities
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("identity {} not found", key)))
    }

    fn get_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<Identity>> {
        match self.index.get(identifier) {
            Some(key) => self.get_by_key(*key).map(Some),
            None => Ok(None),
        }
    }

    fn identifiers_of(&self, key: IdentityKey) -> Vec<Identifier> {
        self.index
            .iter()
            .filter(|(_, mapped)| **mapped == key)
            .map(|(identifier, _)| identifier.clone())
            .collect()
    }

    fn column_keys(&self, column: &ReferenceColumn) -> StoreResult<Vec<IdentityKey>> {
        let Some(rows) = self.tables.get(&column.table) else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        for row in rows {
            if let Some(value) = row.get(&column.column) {
                if let Some(key) = value_key(value)? {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn rewrite_column(
        &mut self,
        column: &ReferenceColumn,
        old: IdentityKey,
        survivor: IdentityKey,
    ) -> RewriteSummary {
        let mut summary = RewriteSummary::default();
        let Some(rows) = self.tables.get_mut(&column.table) else {
            return summary;
        };

        let old_value = key_value(old);
        let (matching, mut kept): (Vec<Row>, Vec<Row>) = std::mem::take(rows)
            .into_iter()
            .partition(|row| row.get(&column.column) == Some(&old_value));

        for mut row in matching {
            row.insert(column.column.clone(), key_value(survivor));
            let collides = !column.unique_columns.is_empty()
                && kept.iter().any(|existing| {
                    existing.get(&column.column) == row.get(&column.column)
                        && column
                            .unique_columns
                            .iter()
                            .all(|unique| existing.get(unique) == row.get(unique))
                });
            if collides {
                summary.deleted += 1;
            } else {
                summary.rewritten += 1;
                kept.push(row);
            }
        }

        *rows = kept;
        summary
    }
}

/// In-memory identity store.
pub struct InMemoryIdentityStore {
    state: Arc<RwLock<StoreState>>,
    writer: Arc<Mutex<()>>,
    next_key: Arc<AtomicU64>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            writer: Arc::new(Mutex::new(())),
            next_key: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Number of identity rows.
    pub fn identity_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.identities.len())
    }

    /// Number of recorded successions.
    pub fn successor_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.successors.len())
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }
}

impl Default for InMemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn get_by_key(&self, key: IdentityKey) -> StoreResult<Identity> {
        self.read()?.get_by_key(key)
    }

    async fn get_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<Identity>> {
        self.read()?.get_by_identifier(identifier)
    }

    async fn get_successor(
        &self,
        identifier: &Identifier,
    ) -> StoreResult<Option<SuccessionRecord>> {
        Ok(self.read()?.successors.get(identifier).cloned())
    }

    async fn identifiers_of(&self, key: IdentityKey) -> StoreResult<Vec<Identifier>> {
        Ok(self.read()?.identifiers_of(key))
    }

    async fn column_keys(&self, column: &ReferenceColumn) -> StoreResult<Vec<IdentityKey>> {
        self.read()?.column_keys(column)
    }

    async fn rows(&self, table: &str) -> StoreResult<Vec<Row>> {
        Ok(self.read()?.tables.get(table).cloned().unwrap_or_default())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let writer = self.writer.clone().lock_owned().await;
        let working = self.read()?.clone();
        Ok(Box::new(InMemoryTransaction {
            working,
            committed: self.state.clone(),
            next_key: self.next_key.clone(),
            _writer: writer,
        }))
    }
}

/// Transaction over [`InMemoryIdentityStore`].
pub struct InMemoryTransaction {
    working: StoreState,
    committed: Arc<RwLock<StoreState>>,
    next_key: Arc<AtomicU64>,
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn get_by_key(&self, key: IdentityKey) -> StoreResult<Identity> {
        self.working.get_by_key(key)
    }

    async fn get_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<Identity>> {
        self.working.get_by_identifier(identifier)
    }

    async fn get_successor(
        &self,
        identifier: &Identifier,
    ) -> StoreResult<Option<SuccessionRecord>> {
        Ok(self.working.successors.get(identifier).cloned())
    }

    async fn create_identity(
        &mut self,
        identifier: &Identifier,
        category: Category,
        provenance: Option<SignedReply>,
    ) -> StoreResult<Identity> {
        if let Some(existing) = self.working.index.get(identifier) {
            return Err(StoreError::Conflict(format!(
                "{} already maps to identity {}",
                identifier, existing
            )));
        }

        let raw = self.next_key.fetch_add(1, Ordering::SeqCst);
        let key = IdentityKey::from_raw(raw)
            .ok_or_else(|| StoreError::Backend("identity key space exhausted".to_string()))?;
        let identity = Identity {
            key,
            category,
            address: identifier.clone(),
            provenance,
        };
        self.working.identities.insert(key, identity.clone());
        self.working.index.insert(identifier.clone(), key);
        Ok(identity)
    }

    async fn set_address(
        &mut self,
        key: IdentityKey,
        address: &Identifier,
        provenance: Option<SignedReply>,
    ) -> StoreResult<Identity> {
        if let Some(existing) = self.working.index.get(address) {
            if *existing != key {
                return Err(StoreError::Conflict(format!(
                    "{} already maps to identity {}",
                    address, existing
                )));
            }
        }

        let identity = self
            .working
            .identities
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("identity {} not found", key)))?;
        identity.address = address.clone();
        identity.provenance = provenance;
        let updated = identity.clone();
        self.working.index.insert(address.clone(), key);
        Ok(updated)
    }

    async fn set_successor(&mut self, record: SuccessionRecord) -> StoreResult<()> {
        if let Some(existing) = self.working.successors.get(&record.identifier) {
            return Err(StoreError::Conflict(format!(
                "{} already has successor {}",
                record.identifier, existing.successor
            )));
        }
        self.working
            .successors
            .insert(record.identifier.clone(), record);
        Ok(())
    }

    async fn remap_identifiers(
        &mut self,
        old: IdentityKey,
        survivor: IdentityKey,
    ) -> StoreResult<usize> {
        if !self.working.identities.contains_key(&survivor) {
            return Err(StoreError::NotFound(format!(
                "identity {} not found",
                survivor
            )));
        }
        let mut remapped = 0;
        for key in self.working.index.values_mut() {
            if *key == old {
                *key = survivor;
                remapped += 1;
            }
        }
        Ok(remapped)
    }

    async fn rewrite_column(
        &mut self,
        column: &ReferenceColumn,
        old: IdentityKey,
        survivor: IdentityKey,
    ) -> StoreResult<RewriteSummary> {
        Ok(self.working.rewrite_column(column, old, survivor))
    }

    async fn column_keys(&self, column: &ReferenceColumn) -> StoreResult<Vec<IdentityKey>> {
        self.working.column_keys(column)
    }

    async fn drop_identity(&mut self, key: IdentityKey) -> StoreResult<()> {
        let still_mapped = self.working.identifiers_of(key);
        if !still_mapped.is_empty() {
            return Err(StoreError::InvariantViolation(format!(
                "identity {} is still mapped from {} identifier(s)",
                key,
                still_mapped.len()
            )));
        }
        self.working
            .identities
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("identity {} not found", key)))
    }

    async fn insert_row(&mut self, table: &str, row: Row) -> StoreResult<()> {
        if table.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "table name must not be empty".to_string(),
            ));
        }
        self.working
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut guard = this
            .committed
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))?;
        *guard = this.working;
        tracing::trace!("in-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        tracing::trace!("in-memory transaction rolled back");
        Ok(())
    }
}
