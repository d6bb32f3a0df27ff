//! Scripted network and wiring shared by the resolver scenarios.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use naming_resolver::{
    RemoteError, RemoteIdentityClient, ReplyVerifier, Resolver, ResolverConfig,
    VerificationError,
};
use naming_store::{key_value, InMemoryIdentityStore, ReferenceRegistry, Row};
use naming_types::{
    Category, HostIdentifier, Identifier, IdentityKey, IdentityQuery, IdentityReply,
    InternalIdentifier, QueryResponse, SignedReply,
};

pub fn id(text: &str) -> Identifier {
    Identifier::parse(text).unwrap()
}

pub fn internal(text: &str) -> InternalIdentifier {
    InternalIdentifier::parse(text).unwrap()
}

fn signature_of(signer: &HostIdentifier) -> Vec<u8> {
    format!("signed-by:{}", signer).into_bytes()
}

/// A reply about `subject` correctly signed by `signer`.
pub fn signed_by(subject: &str, signer: &str, reply: IdentityReply) -> SignedReply {
    let signer = HostIdentifier::parse(signer).unwrap();
    SignedReply {
        subject: id(subject),
        signature: signature_of(&signer),
        signer,
        reply,
        signed_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    }
}

/// A reply about `subject` correctly signed by the subject's own host.
pub fn signed(subject: &str, reply: IdentityReply) -> SignedReply {
    let host = id(subject).host().unwrap();
    signed_by(subject, host.as_str(), reply)
}

pub fn person() -> IdentityReply {
    IdentityReply::new(Category::NaturalPerson)
}

/// Accepts exactly the signatures produced by [`signed_by`].
pub struct SignatureCheck;

impl ReplyVerifier for SignatureCheck {
    fn verify(&self, reply: &SignedReply) -> Result<(), VerificationError> {
        if reply.signature == signature_of(&reply.signer) {
            Ok(())
        } else {
            Err(VerificationError(format!("bad signature from {}", reply.signer)))
        }
    }
}

/// Hosts answering from a table of replies.
#[derive(Default)]
pub struct MockNetwork {
    replies: Mutex<HashMap<Identifier, SignedReply>>,
    unreachable: Mutex<HashSet<HostIdentifier>>,
    queries: Mutex<HashMap<Identifier, usize>>,
    total: AtomicUsize,
    delay: Option<Duration>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Publish a correctly signed reply for `subject`.
    pub fn publish(&self, subject: &str, reply: IdentityReply) {
        self.publish_signed(signed(subject, reply));
    }

    pub fn publish_signed(&self, reply: SignedReply) {
        self.replies
            .lock()
            .unwrap()
            .insert(reply.subject.clone(), reply);
    }

    /// Publish a reply whose signature will not verify.
    pub fn publish_forged(&self, subject: &str, reply: IdentityReply) {
        let mut forged = signed(subject, reply);
        forged.signature = b"forged".to_vec();
        self.publish_signed(forged);
    }

    pub fn unreachable(&self, host: &str) {
        self.unreachable
            .lock()
            .unwrap()
            .insert(HostIdentifier::parse(host).unwrap());
    }

    pub fn total_queries(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn queries_for(&self, subject: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .get(&id(subject))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RemoteIdentityClient for MockNetwork {
    async fn query(
        &self,
        host: &HostIdentifier,
        query: &IdentityQuery,
    ) -> Result<QueryResponse, RemoteError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .queries
            .lock()
            .unwrap()
            .entry(query.subject.clone())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.lock().unwrap().contains(host) {
            return Err(RemoteError::Network(format!("{} unreachable", host)));
        }

        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(&query.subject)
            .cloned()
            .map(QueryResponse::Found)
            .unwrap_or(QueryResponse::NotFound))
    }
}

/// A resolver wired to an in-memory store and a scripted network.
pub struct Harness {
    pub store: Arc<InMemoryIdentityStore>,
    pub network: Arc<MockNetwork>,
    pub registry: Arc<ReferenceRegistry>,
    pub resolver: Arc<Resolver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default())
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        Self::build(
            config,
            Arc::new(InMemoryIdentityStore::new()),
            Arc::new(MockNetwork::new()),
            Arc::new(ReferenceRegistry::new()),
        )
    }

    pub fn build(
        config: ResolverConfig,
        store: Arc<InMemoryIdentityStore>,
        network: Arc<MockNetwork>,
        registry: Arc<ReferenceRegistry>,
    ) -> Self {
        let resolver = Resolver::new(
            config,
            store.clone(),
            network.clone(),
            Arc::new(SignatureCheck),
            registry.clone(),
        )
        .unwrap();

        Self {
            store,
            network,
            registry,
            resolver: Arc::new(resolver),
        }
    }

    pub fn identity_count(&self) -> usize {
        self.store.identity_count().unwrap()
    }
}

pub fn membership(group: &str, member: IdentityKey) -> Row {
    let mut row = Row::new();
    row.insert("group".to_string(), serde_json::json!(group));
    row.insert("member".to_string(), key_value(member));
    row
}
