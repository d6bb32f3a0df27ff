//! Identity query and reply messages (content level, encoding agnostic).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::identifier::{HostIdentifier, Identifier, InternalIdentifier};

/// Request for the identity record of `subject`, sent to its implied host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityQuery {
    pub subject: Identifier,
}

impl IdentityQuery {
    pub fn new(subject: Identifier) -> Self {
        Self { subject }
    }
}

/// What a host asserts about one of its identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityReply {
    pub category: Category,
    #[serde(default)]
    pub predecessors: Vec<Identifier>,
    #[serde(default)]
    pub successor: Option<InternalIdentifier>,
}

impl IdentityReply {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            predecessors: Vec::new(),
            successor: None,
        }
    }

    pub fn with_predecessors(mut self, predecessors: Vec<Identifier>) -> Self {
        self.predecessors = predecessors;
        self
    }

    pub fn with_successor(mut self, successor: InternalIdentifier) -> Self {
        self.successor = Some(successor);
        self
    }

    pub fn names_successor(&self, identifier: &Identifier) -> bool {
        self.successor.as_ref().is_some_and(|successor| identifier == successor)
    }
}

/// A reply together with its signature. Verification is delegated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedReply {
    pub subject: Identifier,
    pub signer: HostIdentifier,
    pub reply: IdentityReply,
    pub signed_at: DateTime<Utc>,
    #[serde(default)]
    pub signature: Vec<u8>,
}

impl SignedReply {
    /// BLAKE3 digest over the canonical JSON encoding, hex encoded.
    pub fn digest(&self) -> String {
        let canonical = serde_json::json!({
            "subject": self.subject,
            "signer": self.signer,
            "category": self.reply.category,
            "predecessors": self.reply.predecessors,
            "successor": self.reply.successor,
            "signed_at": self.signed_at,
            "signature": self.signature,
        });
        blake3::hash(canonical.to_string().as_bytes())
            .to_hex()
            .to_string()
    }
}

/// Outcome of an identity query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponse {
    Found(SignedReply),
    /// The host denies knowledge of the subject.
    NotFound,
}
