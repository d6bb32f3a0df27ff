use async_trait::async_trait;
use naming_types::{Category, Identifier, Identity, IdentityKey, SignedReply, SuccessionRecord};

use crate::model::{Row, RewriteSummary};
use crate::reference::ReferenceColumn;
use crate::StoreResult;

/// Durable directory of identities, identifier mappings and successions.
///
/// Reads observe committed state only. Every write goes through a
/// [`StoreTransaction`]; the provided single-write helpers wrap one.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Whether the identifier maps to an identity.
    async fn is_mapped(&self, identifier: &Identifier) -> StoreResult<bool> {
        Ok(self.get_by_identifier(identifier).await?.is_some())
    }

    /// Load an identity by key. Keys are never invalid once handed out, so
    /// `NotFound` here is an integrity failure.
    async fn get_by_key(&self, key: IdentityKey) -> StoreResult<Identity>;

    async fn get_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<Identity>>;

    async fn get_successor(&self, identifier: &Identifier)
        -> StoreResult<Option<SuccessionRecord>>;

    /// Every identifier currently mapped to `key`.
    async fn identifiers_of(&self, key: IdentityKey) -> StoreResult<Vec<Identifier>>;

    /// Keys referenced by a registered column (nulls skipped).
    async fn column_keys(&self, column: &ReferenceColumn) -> StoreResult<Vec<IdentityKey>>;

    /// All rows of a collaborator table.
    async fn rows(&self, table: &str) -> StoreResult<Vec<Row>>;

    /// Open a write transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn create_identity(
        &self,
        identifier: &Identifier,
        category: Category,
        provenance: Option<SignedReply>,
    ) -> StoreResult<Identity> {
        let mut txn = self.begin().await?;
        match txn.create_identity(identifier, category, provenance).await {
            Ok(identity) => {
                txn.commit().await?;
                Ok(identity)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    async fn set_address(
        &self,
        key: IdentityKey,
        address: &Identifier,
        provenance: Option<SignedReply>,
    ) -> StoreResult<Identity> {
        let mut txn = self.begin().await?;
        match txn.set_address(key, address, provenance).await {
            Ok(identity) => {
                txn.commit().await?;
                Ok(identity)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    async fn set_successor(&self, record: SuccessionRecord) -> StoreResult<()> {
        let mut txn = self.begin().await?;
        match txn.set_successor(record).await {
            Ok(()) => txn.commit().await,
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    async fn insert_row(&self, table: &str, row: Row) -> StoreResult<()> {
        let mut txn = self.begin().await?;
        match txn.insert_row(table, row).await {
            Ok(()) => txn.commit().await,
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }
}

/// A unit of work against the store.
///
/// Reads see the transaction's own writes. Nothing is visible to other readers
/// until `commit`; `rollback` (or dropping the transaction) discards all of it.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get_by_key(&self, key: IdentityKey) -> StoreResult<Identity>;

    async fn get_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<Identity>>;

    async fn get_successor(&self, identifier: &Identifier)
        -> StoreResult<Option<SuccessionRecord>>;

    /// Assign a fresh key and map `identifier` to it. `Conflict` if mapped.
    async fn create_identity(
        &mut self,
        identifier: &Identifier,
        category: Category,
        provenance: Option<SignedReply>,
    ) -> StoreResult<Identity>;

    /// Relocate: update the address of `key` and map `address` to it.
    async fn set_address(
        &mut self,
        key: IdentityKey,
        address: &Identifier,
        provenance: Option<SignedReply>,
    ) -> StoreResult<Identity>;

    /// Insert-only. An existing record for the identifier is a `Conflict`.
    async fn set_successor(&mut self, record: SuccessionRecord) -> StoreResult<()>;

    /// Point every identifier mapped to `old` at `survivor`.
    async fn remap_identifiers(
        &mut self,
        old: IdentityKey,
        survivor: IdentityKey,
    ) -> StoreResult<usize>;

    /// Rewrite `old` to `survivor` in one reference column, deleting rows
    /// that would collide under the column's uniqueness rule.
    async fn rewrite_column(
        &mut self,
        column: &ReferenceColumn,
        old: IdentityKey,
        survivor: IdentityKey,
    ) -> StoreResult<RewriteSummary>;

    async fn column_keys(&self, column: &ReferenceColumn) -> StoreResult<Vec<IdentityKey>>;

    /// Remove an identity row. Fails while any identifier still maps to it.
    async fn drop_identity(&mut self, key: IdentityKey) -> StoreResult<()>;

    async fn insert_row(&mut self, table: &str, row: Row) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
