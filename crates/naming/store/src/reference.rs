//! Foreign references to identity keys.
//!
//! Any storage module holding identity keys implements [`ReferenceOwner`] and
//! registers it at startup. When identities merge, every registered column is
//! rewritten onto the surviving key inside the merge transaction.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use naming_types::IdentityKey;
use serde::{Deserialize, Serialize};

use crate::model::RewriteSummary;
use crate::traits::StoreTransaction;
use crate::{StoreError, StoreResult};

/// A column holding identity keys, with the columns that together with it
/// form a uniqueness constraint (empty when the column is not unique).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceColumn {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub unique_columns: Vec<String>,
}

impl ReferenceColumn {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            unique_columns: Vec::new(),
        }
    }

    pub fn unique_with<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    fn validate(&self) -> StoreResult<()> {
        if self.table.trim().is_empty() || self.column.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "reference table and column must not be empty".to_string(),
            ));
        }
        if self.unique_columns.iter().any(|c| c.trim().is_empty()) {
            return Err(StoreError::InvalidInput(format!(
                "{} declares an empty unique column",
                self.qualified_name()
            )));
        }
        Ok(())
    }
}

/// Capability of a storage module that holds identity keys.
#[async_trait]
pub trait ReferenceOwner: Send + Sync {
    /// Stable registration name.
    fn name(&self) -> &str;

    /// Columns owned by this module that reference identity keys.
    fn references(&self) -> Vec<ReferenceColumn>;

    /// Rewrite every reference to `old` onto `survivor`.
    async fn rewrite(
        &self,
        txn: &mut dyn StoreTransaction,
        old: IdentityKey,
        survivor: IdentityKey,
    ) -> StoreResult<RewriteSummary> {
        let mut summary = RewriteSummary::default();
        for column in self.references() {
            summary += txn.rewrite_column(&column, old, survivor).await?;
        }
        Ok(summary)
    }
}

/// Owner for a single plainly declared column.
#[derive(Debug, Clone)]
pub struct ColumnReference {
    name: String,
    column: ReferenceColumn,
}

impl ColumnReference {
    pub fn new(column: ReferenceColumn) -> Self {
        Self {
            name: column.qualified_name(),
            column,
        }
    }
}

#[async_trait]
impl ReferenceOwner for ColumnReference {
    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<ReferenceColumn> {
        vec![self.column.clone()]
    }
}

/// Startup-built registry of reference owners. Not persisted.
#[derive(Default)]
pub struct ReferenceRegistry {
    owners: RwLock<BTreeMap<String, Arc<dyn ReferenceOwner>>>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, owner: Arc<dyn ReferenceOwner>) -> StoreResult<()> {
        for column in owner.references() {
            column.validate()?;
        }

        let mut guard = self
            .owners
            .write()
            .map_err(|_| StoreError::Backend("reference registry lock poisoned".to_string()))?;
        let name = owner.name().to_string();
        if guard.contains_key(&name) {
            return Err(StoreError::Conflict(format!(
                "reference owner {} already registered",
                name
            )));
        }
        tracing::debug!(owner = %name, "registered reference owner");
        guard.insert(name, owner);
        Ok(())
    }

    /// Register a plain `(table, column, unique_columns)` declaration.
    pub fn register_column<I, S>(
        &self,
        table: impl Into<String>,
        column: impl Into<String>,
        unique_columns: I,
    ) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let column = ReferenceColumn::new(table, column).unique_with(unique_columns);
        self.register(Arc::new(ColumnReference::new(column)))
    }

    /// Returns whether an owner was removed.
    pub fn unregister(&self, name: &str) -> StoreResult<bool> {
        let mut guard = self
            .owners
            .write()
            .map_err(|_| StoreError::Backend("reference registry lock poisoned".to_string()))?;
        Ok(guard.remove(name).is_some())
    }

    pub fn owners(&self) -> StoreResult<Vec<Arc<dyn ReferenceOwner>>> {
        let guard = self
            .owners
            .read()
            .map_err(|_| StoreError::Backend("reference registry lock poisoned".to_string()))?;
        Ok(guard.values().cloned().collect())
    }

    pub fn columns(&self) -> StoreResult<Vec<ReferenceColumn>> {
        Ok(self
            .owners()?
            .iter()
            .flat_map(|owner| owner.references())
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        self.owners.read().map(|guard| guard.is_empty()).unwrap_or(true)
    }
}
