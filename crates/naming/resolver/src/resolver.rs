//! Identifier resolution and identity establishment.
//!
//! `resolve` maps an identifier to its current identity. Unknown identifiers
//! are established from the signed reply of their host: the reply's category
//! and claimed predecessors are validated, after which the identity is
//! created, relocated or merged in a single store transaction. Recorded and
//! replied successors are followed to the identity that currently holds the
//! name; a moved identifier is only ever mapped by its successor's
//! transaction.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use naming_store::{IdentityStore, ReferenceRegistry, StoreError, StoreTransaction};
use naming_types::{
    Category, ExternalIdentifier, HostIdentifier, Identifier, Identity, IdentityKey,
    IdentityQuery, InternalIdentifier, QueryResponse, SignedReply, SuccessionRecord,
};
use tracing::{debug, info, instrument, warn};

use crate::cache::IdentityCache;
use crate::config::ResolverConfig;
use crate::context::EstablishmentContext;
use crate::error::{ResolveError, ResolveResult};
use crate::flight::EstablishmentLocks;
use crate::merger::{MergeReport, Merger};
use crate::remote::{RemoteIdentityClient, ReplyVerifier};
use crate::validator::{PredecessorSource, PredecessorValidator, ValidatedClaim};

/// Lifecycle of one establishment, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishmentState {
    Unresolved,
    Validating,
    Created,
    Relocated,
    Merged,
    Resolved,
    Rejected,
}

/// How a resolution obtained its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Served from the in-process cache.
    Cached,
    /// Already mapped in the store.
    Loaded,
    /// A new identity was created.
    Created,
    /// An existing identity moved to this identifier.
    Relocated,
    /// A new identity absorbed its predecessors.
    Merged,
    /// External identifier with no certified successor.
    Uncertified,
    /// The identifier has moved on; the identity is its successor's.
    Superseded,
}

/// An identity together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Establishment {
    pub identity: Identity,
    pub outcome: ResolutionOutcome,
}

impl Establishment {
    fn new(identity: Identity, outcome: ResolutionOutcome) -> Self {
        Self { identity, outcome }
    }
}

/// Where an establishment under lock ended up.
enum Step {
    Done(Establishment),
    /// The host says the identifier has moved on.
    Follow(InternalIdentifier),
}

/// Resolves identifiers and establishes identities.
///
/// Cheap to share behind an `Arc`; all collaborators are injected.
pub struct Resolver {
    config: ResolverConfig,
    local_host: Option<HostIdentifier>,
    store: Arc<dyn IdentityStore>,
    cache: Arc<IdentityCache>,
    remote: Arc<dyn RemoteIdentityClient>,
    verifier: Arc<dyn ReplyVerifier>,
    merger: Merger,
    locks: EstablishmentLocks,
}

impl Resolver {
    pub fn new(
        config: ResolverConfig,
        store: Arc<dyn IdentityStore>,
        remote: Arc<dyn RemoteIdentityClient>,
        verifier: Arc<dyn ReplyVerifier>,
        registry: Arc<ReferenceRegistry>,
    ) -> ResolveResult<Self> {
        let local_host = config.local_host()?;
        let cache = Arc::new(IdentityCache::new(config.store_mode));
        let locks = EstablishmentLocks::new(config.lock_timeout());

        info!(
            local_host = ?local_host.as_ref().map(HostIdentifier::as_str),
            store_mode = ?config.store_mode,
            "resolver ready"
        );

        Ok(Self {
            config,
            local_host,
            store,
            cache,
            remote,
            verifier,
            merger: Merger::new(registry),
            locks,
        })
    }

    /// Share an externally owned cache, for instance between resolvers over
    /// the same store. Its mode must match the configured store mode.
    pub fn with_cache(mut self, cache: Arc<IdentityCache>) -> ResolveResult<Self> {
        if cache.mode() != self.config.store_mode {
            return Err(ResolveError::Config(format!(
                "cache mode {:?} does not match store mode {:?}",
                cache.mode(),
                self.config.store_mode
            )));
        }
        self.cache = cache;
        Ok(self)
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ReferenceRegistry> {
        self.merger.registry()
    }

    /// Resolve an identifier to its current identity, establishing it first
    /// when it is unknown.
    #[instrument(skip(self, identifier), fields(identifier = %identifier))]
    pub async fn resolve(&self, identifier: &Identifier) -> ResolveResult<Identity> {
        Ok(self.establish(identifier).await?.identity)
    }

    /// Parse and resolve.
    pub async fn resolve_str(&self, identifier: &str) -> ResolveResult<Identity> {
        let identifier = Identifier::parse(identifier)?;
        self.resolve(&identifier).await
    }

    /// Like [`Resolver::resolve`], also reporting how the identity was obtained.
    pub async fn establish(&self, identifier: &Identifier) -> ResolveResult<Establishment> {
        let mut ctx = EstablishmentContext::new(self.config.max_establishment_depth);
        self.resolve_in(identifier, &mut ctx).await
    }

    /// Load an identity by key. Keys are permanent, so a missing identity is
    /// an integrity violation.
    pub async fn resolve_key(&self, key: IdentityKey) -> ResolveResult<Identity> {
        if let Some(identity) = self.cache.lookup_key(key) {
            return Ok(identity);
        }
        let identity = self.store.get_by_key(key).await.map_err(|err| match err {
            StoreError::NotFound(message) => ResolveError::IntegrityViolation(message),
            other => other.into(),
        })?;
        Ok(self.cache.insert_key(identity))
    }

    /// Identity of the configured local host, minted without provenance.
    pub async fn mint_local_host(&self) -> ResolveResult<Identity> {
        let host = self
            .local_host
            .clone()
            .ok_or_else(|| ResolveError::Config("no local host configured".to_string()))?;
        self.resolve(&Identifier::Host(host)).await
    }

    /// Merge identities outside of establishment. The survivor keeps its
    /// address; every identifier of the merged identities resolves to it.
    #[instrument(skip(self))]
    pub async fn merge(
        &self,
        old_keys: &[IdentityKey],
        survivor: IdentityKey,
    ) -> ResolveResult<MergeReport> {
        let report = self.merger.merge(self.store.as_ref(), old_keys, survivor).await?;
        for key in &report.merged {
            self.cache.invalidate_key(*key);
        }
        self.cache.invalidate_key(survivor);
        Ok(report)
    }

    /// Verify that no registered column references a missing identity.
    pub async fn check_integrity(&self) -> ResolveResult<()> {
        self.merger.check_integrity(self.store.as_ref()).await
    }

    /// Drop everything cached in-process.
    pub fn shutdown(&self) {
        self.cache.clear();
        debug!("resolver cache cleared");
    }

    /// Resolve within an ongoing resolution: cache, store, then establishment,
    /// following successors to the terminal identity.
    fn resolve_in<'a>(
        &'a self,
        identifier: &'a Identifier,
        ctx: &'a mut EstablishmentContext,
    ) -> BoxFuture<'a, ResolveResult<Establishment>> {
        Box::pin(async move {
            if let Some(identity) = self.cache.lookup_identifier(identifier) {
                return Ok(Establishment::new(identity, ResolutionOutcome::Cached));
            }

            ctx.enter_following(identifier)?;
            let resolved = self.resolve_uncached(identifier, ctx).await;
            ctx.leave_following(identifier);

            let establishment = resolved?;
            let identity = self
                .cache
                .insert_identifier(identifier.clone(), establishment.identity);
            Ok(Establishment::new(identity, establishment.outcome))
        })
    }

    async fn resolve_uncached(
        &self,
        identifier: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Establishment> {
        let establishment = match self.store.get_by_identifier(identifier).await? {
            Some(identity) => Establishment::new(identity, ResolutionOutcome::Loaded),
            None => match self.establish_locked(identifier, ctx).await? {
                Step::Done(establishment) => establishment,
                // The identifier's lock is released here; the successor
                // takes only its own.
                Step::Follow(successor) => {
                    return self.supersede(identifier, successor, ctx).await;
                }
            },
        };

        match self.store.get_successor(identifier).await? {
            Some(record) => {
                let successor = Identifier::from(record.successor);
                debug!(identifier = %identifier, successor = %successor, "following recorded successor");
                let terminal = self.resolve_in(&successor, ctx).await?;
                Ok(Establishment::new(terminal.identity, ResolutionOutcome::Superseded))
            }
            None => Ok(establishment),
        }
    }

    /// Establish an unmapped identifier under its establishment lock. At
    /// most one lock is held at a time.
    async fn establish_locked(
        &self,
        identifier: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Step> {
        let guard = self.locks.acquire(identifier).await?;
        let result = self.establish_unlocked(identifier, ctx).await;
        drop(guard);

        match &result {
            Ok(Step::Done(establishment)) => debug!(
                identifier = %identifier,
                key = %establishment.identity.key,
                outcome = ?establishment.outcome,
                state = ?EstablishmentState::Resolved,
                "establishment finished"
            ),
            Ok(Step::Follow(successor)) => debug!(
                identifier = %identifier,
                successor = %successor,
                "identifier moved to successor"
            ),
            Err(err) => warn!(
                identifier = %identifier,
                error = %err,
                state = ?EstablishmentState::Rejected,
                "establishment failed"
            ),
        }
        result
    }

    async fn establish_unlocked(
        &self,
        identifier: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Step> {
        // Someone may have finished while we waited for the lock.
        if let Some(identity) = self.store.get_by_identifier(identifier).await? {
            return Ok(Step::Done(Establishment::new(identity, ResolutionOutcome::Loaded)));
        }

        debug!(
            identifier = %identifier,
            state = ?EstablishmentState::Unresolved,
            "establishing identity"
        );
        match identifier {
            Identifier::Host(host) => self
                .establish_host(identifier, host, ctx)
                .await
                .map(Step::Done),
            Identifier::Internal(_) => self.establish_internal(identifier, ctx).await,
            Identifier::External(external) => {
                self.establish_external(identifier, external, ctx).await
            }
        }
    }

    async fn establish_host(
        &self,
        identifier: &Identifier,
        host: &HostIdentifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Establishment> {
        if self.local_host.as_ref() == Some(host) {
            info!(host = %host, "minting local host identity");
            return self.create_committed(identifier, Category::Host, None).await;
        }

        let signed = self
            .query_reply(identifier, ctx)
            .await?
            .ok_or_else(|| ResolveError::IdentityNotFound(identifier.clone()))?;
        let reply = &signed.reply;
        if reply.category != Category::Host {
            return Err(ResolveError::invalid(format!(
                "host {} declares category {}",
                host, reply.category
            )));
        }
        if !reply.predecessors.is_empty() || reply.successor.is_some() {
            return Err(ResolveError::invalid(format!(
                "host {} cannot declare predecessors or a successor",
                host
            )));
        }

        self.create_committed(identifier, Category::Host, Some(signed))
            .await
    }

    async fn establish_internal(
        &self,
        identifier: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Step> {
        let signed = self
            .query_reply(identifier, ctx)
            .await?
            .ok_or_else(|| ResolveError::IdentityNotFound(identifier.clone()))?;

        let category = signed.reply.category;
        if !category.accepts(identifier) {
            return Err(ResolveError::invalid(format!(
                "{} cannot have category {}",
                identifier, category
            )));
        }
        if signed.reply.names_successor(identifier) {
            return Err(ResolveError::invalid(format!(
                "{} names itself as successor",
                identifier
            )));
        }

        // A moved identifier is mapped by its successor's establishment,
        // never on its own.
        if let Some(successor) = signed.reply.successor.clone() {
            return Ok(Step::Follow(successor));
        }

        self.establish_claim(identifier, signed, ctx)
            .await
            .map(Step::Done)
    }

    /// Validate the predecessors of a verified reply, then create, relocate
    /// or merge accordingly.
    async fn establish_claim(
        &self,
        identifier: &Identifier,
        signed: SignedReply,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Establishment> {
        let category = signed.reply.category;
        debug!(
            identifier = %identifier,
            predecessors = signed.reply.predecessors.len(),
            state = ?EstablishmentState::Validating,
            "validating predecessors"
        );

        let claim = PredecessorValidator::new(self)
            .validate(identifier, category, &signed.reply.predecessors, ctx)
            .await?;

        let relocating = claim.sole_category() == Some(category);
        if !relocating && claim.len() > 1 && !category.is_internal_person() {
            return Err(ResolveError::invalid(format!(
                "{} ({}) cannot merge {} predecessors",
                identifier,
                category,
                claim.len()
            )));
        }
        self.commit_claim(identifier, category, claim, signed, relocating)
            .await
    }

    /// Write a validated claim in one transaction: unmapped predecessors are
    /// created, successions recorded, then the subject either takes over its
    /// only predecessor or absorbs all of them.
    async fn commit_claim(
        &self,
        identifier: &Identifier,
        category: Category,
        claim: ValidatedClaim,
        signed: SignedReply,
        relocating: bool,
    ) -> ResolveResult<Establishment> {
        let mapped: Vec<IdentityKey> = claim.predecessors.iter().map(|p| p.key).collect();
        let absorbed = claim.len();
        let mut txn = self.store.begin().await?;

        let written = self
            .write_claim(txn.as_mut(), identifier, category, claim, signed, relocating)
            .await;

        match written {
            Ok(identity) => {
                txn.commit().await?;
                for key in &mapped {
                    self.cache.invalidate_key(*key);
                }
                let (outcome, state) = if relocating {
                    (ResolutionOutcome::Relocated, EstablishmentState::Relocated)
                } else if absorbed == 0 {
                    (ResolutionOutcome::Created, EstablishmentState::Created)
                } else {
                    (ResolutionOutcome::Merged, EstablishmentState::Merged)
                };
                info!(
                    identifier = %identifier,
                    key = %identity.key,
                    category = %category,
                    absorbed,
                    state = ?state,
                    "identity established"
                );
                Ok(Establishment::new(identity, outcome))
            }
            Err(err) => {
                abort(txn).await;
                self.recover(identifier, err).await
            }
        }
    }

    async fn write_claim(
        &self,
        txn: &mut dyn StoreTransaction,
        identifier: &Identifier,
        category: Category,
        claim: ValidatedClaim,
        signed: SignedReply,
        relocating: bool,
    ) -> ResolveResult<Identity> {
        let mut absorbed: Vec<IdentityKey> = claim.predecessors.iter().map(|p| p.key).collect();
        for staged in claim.staged {
            let identity = txn
                .create_identity(&staged.identifier, staged.category, Some(staged.provenance))
                .await?;
            absorbed.push(identity.key);
        }
        for record in claim.successions {
            txn.set_successor(record).await?;
        }

        match absorbed.as_slice() {
            [key] if relocating => Ok(txn.set_address(*key, identifier, Some(signed)).await?),
            _ => {
                let identity = txn
                    .create_identity(identifier, category, Some(signed))
                    .await?;
                if !absorbed.is_empty() {
                    self.merger.merge_in(&mut *txn, &absorbed, identity.key).await?;
                }
                Ok(identity)
            }
        }
    }

    async fn establish_external(
        &self,
        identifier: &Identifier,
        external: &ExternalIdentifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Step> {
        let category = Category::for_external(external.kind());
        let Some(signed) = self.query_reply(identifier, ctx).await? else {
            return self.create_uncertified(identifier, category).await.map(Step::Done);
        };
        if signed.reply.category != category {
            return Err(ResolveError::invalid(format!(
                "{} declared as {}, expected {}",
                identifier, signed.reply.category, category
            )));
        }

        match signed.reply.successor.clone() {
            Some(successor) => Ok(Step::Follow(successor)),
            None => self.create_uncertified(identifier, category).await.map(Step::Done),
        }
    }

    async fn create_uncertified(
        &self,
        identifier: &Identifier,
        category: Category,
    ) -> ResolveResult<Establishment> {
        let created = self.create_committed(identifier, category, None).await?;
        if created.outcome == ResolutionOutcome::Loaded {
            return Ok(created);
        }
        info!(identifier = %identifier, key = %created.identity.key, "uncertified external identity");
        Ok(Establishment::new(created.identity, ResolutionOutcome::Uncertified))
    }

    /// The reply for `identifier` names a successor. Resolve the successor;
    /// its establishment must claim `identifier` as a predecessor, which maps
    /// `identifier` onto the successor's identity in the same transaction.
    async fn supersede(
        &self,
        identifier: &Identifier,
        successor: InternalIdentifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Establishment> {
        let successor = Identifier::from(successor);
        debug!(identifier = %identifier, successor = %successor, "following declared successor");

        let terminal = self.resolve_in(&successor, ctx).await?;

        let own = self.store.get_by_identifier(identifier).await?;
        let successors = self.store.get_by_identifier(&successor).await?;
        match (own, successors) {
            (Some(own), Some(next)) if own.key == next.key => {
                Ok(Establishment::new(terminal.identity, ResolutionOutcome::Superseded))
            }
            _ => Err(ResolveError::invalid(format!(
                "successor {} of {} does not claim it as predecessor",
                successor, identifier
            ))),
        }
    }

    async fn create_committed(
        &self,
        identifier: &Identifier,
        category: Category,
        provenance: Option<SignedReply>,
    ) -> ResolveResult<Establishment> {
        match self
            .store
            .create_identity(identifier, category, provenance)
            .await
        {
            Ok(identity) => {
                info!(
                    identifier = %identifier,
                    key = %identity.key,
                    category = %category,
                    state = ?EstablishmentState::Created,
                    "identity created"
                );
                Ok(Establishment::new(identity, ResolutionOutcome::Created))
            }
            Err(err) => self.recover(identifier, err.into()).await,
        }
    }

    /// A write conflict means another writer mapped the identifier first;
    /// adopt its identity. Anything else is returned as is.
    async fn recover(&self, identifier: &Identifier, err: ResolveError) -> ResolveResult<Establishment> {
        if !matches!(&err, ResolveError::Store(store) if store.is_conflict()) {
            return Err(err);
        }
        match self.store.get_by_identifier(identifier).await? {
            Some(identity) => {
                debug!(identifier = %identifier, key = %identity.key, "adopted identity established concurrently");
                Ok(Establishment::new(identity, ResolutionOutcome::Loaded))
            }
            None => Err(err),
        }
    }

    /// Ask the host of `identifier` about it and check the reply. Replies are
    /// remembered for the rest of the resolution.
    async fn query_reply(
        &self,
        identifier: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Option<SignedReply>> {
        if let Some(reply) = ctx.cached_reply(identifier) {
            return Ok(Some(reply));
        }
        let Some(host) = identifier.host() else {
            return Ok(None);
        };

        debug!(identifier = %identifier, host = %host, "querying host");
        let response = self
            .remote
            .query(&host, &IdentityQuery::new(identifier.clone()))
            .await?;

        let signed = match response {
            QueryResponse::NotFound => {
                debug!(identifier = %identifier, host = %host, "host denies identifier");
                return Ok(None);
            }
            QueryResponse::Found(signed) => signed,
        };

        self.verifier.verify(&signed).map_err(|err| {
            ResolveError::invalid(format!("reply about {} from {}: {}", identifier, host, err))
        })?;
        if signed.signer != host {
            return Err(ResolveError::invalid(format!(
                "reply about {} signed by {} instead of {}",
                identifier, signed.signer, host
            )));
        }
        if &signed.subject != identifier {
            return Err(ResolveError::invalid(format!(
                "reply from {} is about {} instead of {}",
                host, signed.subject, identifier
            )));
        }

        debug!(
            identifier = %identifier,
            signer = %signed.signer,
            digest = %signed.digest(),
            "verified reply"
        );
        ctx.remember_reply(signed.clone());
        Ok(Some(signed))
    }
}

#[async_trait]
impl PredecessorSource for Resolver {
    async fn mapped_identity(&self, identifier: &Identifier) -> ResolveResult<Option<Identity>> {
        Ok(self.store.get_by_identifier(identifier).await?)
    }

    async fn recorded_successor(
        &self,
        identifier: &Identifier,
    ) -> ResolveResult<Option<SuccessionRecord>> {
        Ok(self.store.get_successor(identifier).await?)
    }

    async fn fetch_reply(
        &self,
        identifier: &Identifier,
        ctx: &mut EstablishmentContext,
    ) -> ResolveResult<Option<SignedReply>> {
        self.query_reply(identifier, ctx).await
    }
}

async fn abort(txn: Box<dyn StoreTransaction>) {
    if let Err(err) = txn.rollback().await {
        warn!(error = %err, "rollback failed");
    }
}
