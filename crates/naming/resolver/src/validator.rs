//! Predecessor claim validation.
//!
//! A reply about X may name predecessors. Each claimed predecessor P must
//! be of a category X may succeed, and P's own record must name X as its
//! successor. Successions that are proven here but not yet recorded are
//! staged for the caller's transaction, and so are predecessors that are not
//! mapped yet; nothing is persisted.

use std::collections::HashSet;

use async_trait::async_trait;
use naming_types::{
    Category, Identifier, Identity, InternalIdentifier, SignedReply, SuccessionRecord,
};

use crate::context::EstablishmentContext;
use crate::error::{ResolveError, ResolveResult};

/// Where the validator looks up predecessors.
#[async_trait]
pub trait PredecessorSource: Send + Sync {
    /// The identity `identifier` currently maps to, if any.
    async fn mapped_identity(&self, identifier: &Identifier) -> ResolveResult<Option<Identity>>;

    async fn recorded_successor(
        &self,
        identifier: &Identifier,
    ) -> ResolveResult<Option<SuccessionRecord>>;

    /// A verified reply about `identifier` from its host, `None` when the host
    /// denies it or there is no host to ask.
    async fn fetch_reply(
        &self,
        identifier: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Option<SignedReply>>;
}

/// A claimed predecessor with no identity yet. It is created in the
/// successor's transaction and absorbed there, never on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPredecessor {
    pub identifier: Identifier,
    /// Category declared by the predecessor's own host.
    pub category: Category,
    /// The reply naming the successor.
    pub provenance: SignedReply,
}

/// Result of a successful validation.
#[derive(Debug, Clone, Default)]
pub struct ValidatedClaim {
    /// Distinct mapped predecessor identities, in claim order.
    pub predecessors: Vec<Identity>,
    /// Unmapped predecessors, in claim order.
    pub staged: Vec<StagedPredecessor>,
    /// Successions to record along with the subject.
    pub successions: Vec<SuccessionRecord>,
}

impl ValidatedClaim {
    pub fn is_empty(&self) -> bool {
        self.predecessors.is_empty() && self.staged.is_empty()
    }

    /// Number of distinct identities the subject takes over.
    pub fn len(&self) -> usize {
        self.predecessors.len() + self.staged.len()
    }

    /// Category of the only predecessor, when there is exactly one.
    pub fn sole_category(&self) -> Option<Category> {
        match (self.predecessors.as_slice(), self.staged.as_slice()) {
            ([identity], []) => Some(identity.category),
            ([], [staged]) => Some(staged.category),
            _ => None,
        }
    }
}

pub struct PredecessorValidator<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S> PredecessorValidator<'a, S>
where
    S: PredecessorSource + ?Sized,
{
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Validate the predecessors `subject` claims under `category`.
    pub async fn validate(
        &self,
        subject: &Identifier,
        category: Category,
        claimed: &[Identifier],
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<ValidatedClaim> {
        let mut claim = ValidatedClaim::default();
        if claimed.is_empty() {
            return Ok(claim);
        }

        let successor = subject.as_internal().cloned().ok_or_else(|| {
            ResolveError::invalid(format!("{} cannot succeed other identifiers", subject))
        })?;

        let mut seen = HashSet::new();
        for predecessor in claimed {
            if predecessor.is_host() {
                return Err(ResolveError::invalid(format!(
                    "host {} cannot be a predecessor of {}",
                    predecessor, subject
                )));
            }
            if predecessor == subject {
                return Err(ResolveError::invalid(format!(
                    "{} names itself as predecessor",
                    subject
                )));
            }
            if !seen.insert(predecessor) {
                return Err(ResolveError::invalid(format!(
                    "{} claims {} twice",
                    subject, predecessor
                )));
            }

            let recorded = self.source.recorded_successor(predecessor).await?;
            if let Some(record) = &recorded {
                if record.successor != successor {
                    return Err(ResolveError::invalid(format!(
                        "{} already succeeded by {}, not {}",
                        predecessor, record.successor, subject
                    )));
                }
            }

            match self.source.mapped_identity(predecessor).await? {
                Some(identity) => {
                    check_succession(subject, category, predecessor, identity.category)?;
                    match recorded {
                        Some(record) if record.is_backed() => {}
                        Some(_) => {
                            self.confirm_link(predecessor, subject, ctx).await?;
                        }
                        None => {
                            let reply = self.confirm_link(predecessor, subject, ctx).await?;
                            claim
                                .successions
                                .push(succession(predecessor, &successor, reply));
                        }
                    }
                    if !claim.predecessors.iter().any(|p| p.key == identity.key) {
                        claim.predecessors.push(identity);
                    }
                }
                None => {
                    let reply = self.confirm_link(predecessor, subject, ctx).await?;
                    let declared = reply.reply.category;
                    if !declared.accepts(predecessor) {
                        return Err(ResolveError::invalid(format!(
                            "{} cannot have category {}",
                            predecessor, declared
                        )));
                    }
                    check_succession(subject, category, predecessor, declared)?;
                    if recorded.is_none() {
                        claim
                            .successions
                            .push(succession(predecessor, &successor, reply.clone()));
                    }
                    claim.staged.push(StagedPredecessor {
                        identifier: predecessor.clone(),
                        category: declared,
                        provenance: reply,
                    });
                }
            }
        }

        tracing::debug!(
            subject = %subject,
            predecessors = claim.predecessors.len(),
            unmapped = claim.staged.len(),
            successions = claim.successions.len(),
            "predecessor claim validated"
        );
        Ok(claim)
    }

    /// The predecessor's host must name `subject` as its successor.
    async fn confirm_link(
        &self,
        predecessor: &Identifier,
        subject: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<SignedReply> {
        let reply = self
            .source
            .fetch_reply(predecessor, ctx)
            .await?
            .ok_or_else(|| {
                ResolveError::invalid(format!(
                    "no signed record of {} to confirm succession by {}",
                    predecessor, subject
                ))
            })?;

        if !reply.reply.names_successor(subject) {
            return Err(ResolveError::invalid(format!(
                "{} does not name {} as its successor",
                predecessor, subject
            )));
        }
        Ok(reply)
    }
}

fn check_succession(
    subject: &Identifier,
    category: Category,
    predecessor: &Identifier,
    predecessor_category: Category,
) -> ResolveResult<()> {
    if category.succeeds(predecessor_category) {
        return Ok(());
    }
    Err(ResolveError::invalid(format!(
        "{} ({}) cannot succeed {} ({})",
        subject, category, predecessor, predecessor_category
    )))
}

fn succession(
    predecessor: &Identifier,
    successor: &InternalIdentifier,
    reply: SignedReply,
) -> SuccessionRecord {
    SuccessionRecord {
        identifier: predecessor.clone(),
        successor: successor.clone(),
        provenance: Some(reply),
    }
}
