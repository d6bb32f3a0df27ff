use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::identifier::{Identifier, InternalIdentifier};
use crate::message::SignedReply;

/// Permanent key of an identity. Assigned once by the store, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(NonZeroU64);

impl IdentityKey {
    pub const fn new(key: NonZeroU64) -> Self {
        Self(key)
    }

    /// Returns `None` for zero.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// The resolved entity an identifier denotes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub key: IdentityKey,
    pub category: Category,
    /// Current address; changes only by relocation.
    pub address: Identifier,
    /// Signed reply that justified creation or the last relocation. `None`
    /// for locally minted identities.
    pub provenance: Option<SignedReply>,
}

impl Identity {
    pub fn is_certified(&self) -> bool {
        self.provenance.is_some()
    }
}

/// A verified "identifier has moved on to successor" record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessionRecord {
    pub identifier: Identifier,
    pub successor: InternalIdentifier,
    pub provenance: Option<SignedReply>,
}

impl SuccessionRecord {
    /// Whether the provenance is a reply about `identifier` naming `successor`.
    pub fn is_backed(&self) -> bool {
        self.provenance.as_ref().is_some_and(|reply| {
            reply.subject == self.identifier && reply.reply.successor.as_ref() == Some(&self.successor)
        })
    }
}
