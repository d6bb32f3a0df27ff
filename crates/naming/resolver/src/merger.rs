//! Identity merge.
//!
//! Merging folds a set of identities into a survivor: every registered
//! reference is rewritten onto the survivor, identifiers are remapped and the
//! merged identity rows are dropped, all inside one transaction. Before the
//! transaction is allowed to commit, no registered column may still reference
//! a merged key.

use std::collections::BTreeSet;
use std::sync::Arc;

use naming_store::{
    IdentityStore, ReferenceRegistry, RewriteSummary, StoreError, StoreTransaction,
};
use naming_types::IdentityKey;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{ResolveError, ResolveResult};

/// What a merge changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub survivor: IdentityKey,
    pub merged: Vec<IdentityKey>,
    pub rewritten: RewriteSummary,
    pub remapped_identifiers: usize,
}

pub struct Merger {
    registry: Arc<ReferenceRegistry>,
}

impl Merger {
    pub fn new(registry: Arc<ReferenceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ReferenceRegistry> {
        &self.registry
    }

    /// Merge `old_keys` into `survivor` in a transaction of its own.
    pub async fn merge(
        &self,
        store: &dyn IdentityStore,
        old_keys: &[IdentityKey],
        survivor: IdentityKey,
    ) -> ResolveResult<MergeReport> {
        let mut txn = store.begin().await?;
        match self.merge_in(txn.as_mut(), old_keys, survivor).await {
            Ok(report) => {
                txn.commit().await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "merge rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Merge inside the caller's transaction. On error the caller must roll
    /// the transaction back.
    pub async fn merge_in(
        &self,
        txn: &mut dyn StoreTransaction,
        old_keys: &[IdentityKey],
        survivor: IdentityKey,
    ) -> ResolveResult<MergeReport> {
        let merged: Vec<IdentityKey> = old_keys
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if merged.contains(&survivor) {
            return Err(ResolveError::invalid(format!(
                "identity {} cannot be merged into itself",
                survivor
            )));
        }
        txn.get_by_key(survivor).await.map_err(missing_key)?;
        for old in &merged {
            txn.get_by_key(*old).await.map_err(missing_key)?;
        }

        let owners = self.registry.owners()?;
        let mut report = MergeReport {
            survivor,
            merged: merged.clone(),
            rewritten: RewriteSummary::default(),
            remapped_identifiers: 0,
        };

        for old in &merged {
            for owner in &owners {
                let summary = owner.rewrite(&mut *txn, *old, survivor).await?;
                tracing::debug!(
                    owner = owner.name(),
                    old = %old,
                    survivor = %survivor,
                    rewritten = summary.rewritten,
                    deleted = summary.deleted,
                    "references rewritten"
                );
                report.rewritten += summary;
            }
            report.remapped_identifiers += txn.remap_identifiers(*old, survivor).await?;
            txn.drop_identity(*old).await?;
        }

        for column in self.registry.columns()? {
            let keys = txn.column_keys(&column).await?;
            if let Some(stale) = keys.iter().find(|key| merged.contains(*key)) {
                error!(
                    column = %column.qualified_name(),
                    key = %stale,
                    survivor = %survivor,
                    "reference survived merge"
                );
                return Err(ResolveError::IntegrityViolation(format!(
                    "{} still references merged identity {}",
                    column.qualified_name(),
                    stale
                )));
            }
        }

        info!(
            survivor = %survivor,
            merged = ?merged,
            rewritten = report.rewritten.rewritten,
            deleted = report.rewritten.deleted,
            remapped = report.remapped_identifiers,
            "identities merged"
        );
        Ok(report)
    }

    /// Scan every registered column for keys with no identity row.
    pub async fn check_integrity(&self, store: &dyn IdentityStore) -> ResolveResult<()> {
        for column in self.registry.columns()? {
            let keys: BTreeSet<IdentityKey> =
                store.column_keys(&column).await?.into_iter().collect();
            for key in keys {
                match store.get_by_key(key).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound(_)) => {
                        error!(
                            column = %column.qualified_name(),
                            key = %key,
                            "dangling identity reference"
                        );
                        return Err(ResolveError::IntegrityViolation(format!(
                            "{} references missing identity {}",
                            column.qualified_name(),
                            key
                        )));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }
}

fn missing_key(err: StoreError) -> ResolveError {
    match err {
        StoreError::NotFound(message) => ResolveError::IntegrityViolation(message),
        other => other.into(),
    }
}
