//! Per-identifier establishment locks.
//!
//! Only one task establishes a given identifier at a time; others wait on the
//! same lock and re-read the store once they get it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use naming_types::Identifier;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{ResolveError, ResolveResult};

type Slots = Arc<DashMap<Identifier, Arc<Mutex<()>>>>;

pub struct EstablishmentLocks {
    slots: Slots,
    timeout: Duration,
}

impl EstablishmentLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Wait for exclusive establishment rights on `identifier`.
    pub async fn acquire(&self, identifier: &Identifier) -> ResolveResult<EstablishmentGuard> {
        let slot = {
            let entry = self
                .slots
                .entry(identifier.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };

        let guard = tokio::time::timeout(self.timeout, slot.lock_owned())
            .await
            .map_err(|_| ResolveError::EstablishmentTimeout(identifier.clone()))?;

        Ok(EstablishmentGuard {
            identifier: identifier.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        })
    }

    /// Identifiers with a held or awaited lock.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }
}

/// Releases the lock on drop and forgets the slot once nobody waits on it.
pub struct EstablishmentGuard {
    identifier: Identifier,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EstablishmentGuard {
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

impl Drop for EstablishmentGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.slots
            .remove_if(&self.identifier, |_, slot| Arc::strong_count(slot) == 1);
    }
}
