//! End-to-end establishment scenarios against the in-memory store.

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use naming_resolver::{ResolutionOutcome, ResolveError, ResolverConfig, StoreMode};
use naming_store::{
    IdentityStore, InMemoryIdentityStore, ReferenceColumn, ReferenceOwner, ReferenceRegistry,
    RewriteSummary, StoreError, StoreResult, StoreTransaction,
};
use naming_types::{Category, IdentityKey, IdentityReply, SuccessionRecord};

use support::{id, internal, membership, person, signed, Harness, MockNetwork};

#[tokio::test]
async fn remote_host_is_cached_after_first_resolution() {
    let h = Harness::new();
    h.network
        .publish("core.example.net", IdentityReply::new(Category::Host));

    let first = h.resolver.establish(&id("core.example.net")).await.unwrap();
    let second = h.resolver.establish(&id("core.example.net")).await.unwrap();

    assert_eq!(first.outcome, ResolutionOutcome::Created);
    assert_eq!(second.outcome, ResolutionOutcome::Cached);
    assert_eq!(first.identity.key, second.identity.key);
    assert_eq!(first.identity.category, Category::Host);
    assert!(first.identity.is_certified());
    assert_eq!(h.network.total_queries(), 1);
}

#[tokio::test]
async fn local_host_is_minted_without_query() {
    let h = Harness::with_config(ResolverConfig::default().with_local_host("core.example.net"));

    let minted = h.resolver.mint_local_host().await.unwrap();
    let again = h.resolver.resolve_str("core.example.net").await.unwrap();

    assert_eq!(minted.key, again.key);
    assert_eq!(minted.category, Category::Host);
    assert!(minted.provenance.is_none());
    assert_eq!(h.network.total_queries(), 0);
}

#[tokio::test]
async fn mint_without_local_host_is_config_error() {
    let h = Harness::new();
    let err = h.resolver.mint_local_host().await.unwrap_err();
    assert!(matches!(err, ResolveError::Config(_)));
}

#[tokio::test]
async fn host_must_declare_host_category() {
    let h = Harness::new();
    h.network.publish("rogue.example.net", person());

    let err = h.resolver.resolve_str("rogue.example.net").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert!(!h.store.is_mapped(&id("rogue.example.net")).await.unwrap());
}

#[tokio::test]
async fn new_person_gets_fresh_identity() {
    let h = Harness::new();
    h.network.publish("alice@example.net", person());

    let established = h.resolver.establish(&id("alice@example.net")).await.unwrap();

    assert_eq!(established.outcome, ResolutionOutcome::Created);
    let identity = established.identity;
    assert_eq!(identity.address, id("alice@example.net"));
    assert_eq!(identity.category, Category::NaturalPerson);
    assert_eq!(
        identity.provenance.as_ref().map(|p| p.subject.clone()),
        Some(id("alice@example.net"))
    );
    assert_eq!(h.identity_count(), 1);
}

#[tokio::test]
async fn repeated_resolution_is_idempotent() {
    let h = Harness::new();
    h.network.publish("alice@example.net", person());

    let mut keys = Vec::new();
    for _ in 0..3 {
        keys.push(h.resolver.resolve_str("alice@example.net").await.unwrap().key);
    }
    h.resolver.shutdown();
    keys.push(h.resolver.resolve_str("alice@example.net").await.unwrap().key);

    assert!(keys.iter().all(|key| *key == keys[0]));
    assert_eq!(h.network.total_queries(), 1);
}

#[tokio::test]
async fn unknown_identifier_is_not_found() {
    let h = Harness::new();
    let err = h.resolver.resolve_str("ghost@example.net").await.unwrap_err();
    assert!(matches!(err, ResolveError::IdentityNotFound(_)));
    assert!(err.is_rejection());
}

#[tokio::test]
async fn forged_reply_is_rejected() {
    let h = Harness::new();
    h.network.publish_forged("alice@example.net", person());

    let err = h.resolver.resolve_str("alice@example.net").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert_eq!(h.identity_count(), 0);
}

#[tokio::test]
async fn reply_signed_by_other_host_is_rejected() {
    let h = Harness::new();
    h.network.publish_signed(support::signed_by(
        "alice@example.net",
        "elsewhere.example.org",
        person(),
    ));

    let err = h.resolver.resolve_str("alice@example.net").await.unwrap_err();
    assert!(err.to_string().contains("elsewhere.example.org"));
    assert_eq!(h.identity_count(), 0);
}

#[tokio::test]
async fn category_must_accept_identifier() {
    let h = Harness::new();
    h.network
        .publish("alice@example.net", IdentityReply::new(Category::EmailPerson));

    let err = h.resolver.resolve_str("alice@example.net").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
}

#[tokio::test]
async fn network_failure_is_transient() {
    let h = Harness::new();
    h.network.publish("alice@example.net", person());
    h.network.unreachable("example.net");

    let err = h.resolver.resolve_str("alice@example.net").await.unwrap_err();
    assert!(matches!(err, ResolveError::Remote(_)));
    assert!(err.is_transient());
    assert_eq!(h.identity_count(), 0);
}

#[tokio::test]
async fn predecessor_relocates_in_place() {
    let h = Harness::new();
    h.network.publish("alice@example.net", person());
    let original = h.resolver.resolve_str("alice@example.net").await.unwrap();

    let moved = person().with_successor(internal("alice@newdomain.net"));
    h.store
        .set_successor(SuccessionRecord {
            identifier: id("alice@example.net"),
            successor: internal("alice@newdomain.net"),
            provenance: Some(signed("alice@example.net", moved)),
        })
        .await
        .unwrap();
    h.network.publish(
        "alice@newdomain.net",
        person().with_predecessors(vec![id("alice@example.net")]),
    );

    let relocated = h.resolver.establish(&id("alice@newdomain.net")).await.unwrap();
    assert_eq!(relocated.outcome, ResolutionOutcome::Relocated);
    assert_eq!(relocated.identity.key, original.key);
    assert_eq!(relocated.identity.address, id("alice@newdomain.net"));

    let old_name = h.resolver.establish(&id("alice@example.net")).await.unwrap();
    assert_eq!(old_name.outcome, ResolutionOutcome::Superseded);
    assert_eq!(old_name.identity.key, original.key);
    assert_eq!(old_name.identity.address, id("alice@newdomain.net"));

    assert_eq!(h.network.queries_for("alice@example.net"), 1);
    assert_eq!(h.identity_count(), 1);
}

#[tokio::test]
async fn predecessor_with_unconfirmed_succession_is_rejected() {
    let h = Harness::new();
    h.network.publish("alice@example.net", person());
    h.resolver.resolve_str("alice@example.net").await.unwrap();

    // Recorded without provenance, and the host no longer confirms it.
    h.store
        .set_successor(SuccessionRecord {
            identifier: id("alice@example.net"),
            successor: internal("alice@newdomain.net"),
            provenance: None,
        })
        .await
        .unwrap();
    h.network.publish(
        "alice@newdomain.net",
        person().with_predecessors(vec![id("alice@example.net")]),
    );

    let err = h.resolver.resolve_str("alice@newdomain.net").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert!(!h.store.is_mapped(&id("alice@newdomain.net")).await.unwrap());
    assert_eq!(h.identity_count(), 1);
}

#[tokio::test]
async fn predecessor_naming_other_successor_is_rejected() {
    let h = Harness::new();
    h.network.publish(
        "alice@example.net",
        person().with_successor(internal("alice@elsewhere.net")),
    );
    h.network.publish(
        "alice@newdomain.net",
        person().with_predecessors(vec![id("alice@example.net")]),
    );

    let err = h.resolver.resolve_str("alice@newdomain.net").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert!(!h.store.is_mapped(&id("alice@newdomain.net")).await.unwrap());
    assert!(!h.store.is_mapped(&id("alice@example.net")).await.unwrap());
    assert_eq!(h.store.successor_count().unwrap(), 0);
}

async fn two_members(h: &Harness) -> (IdentityKey, IdentityKey) {
    h.registry
        .register_column("memberships", "member", ["group"])
        .unwrap();
    h.network.publish("alice@a.example", person());
    h.network.publish("alice@b.example", person());
    let p1 = h.resolver.resolve_str("alice@a.example").await.unwrap().key;
    let p2 = h.resolver.resolve_str("alice@b.example").await.unwrap().key;

    h.store.insert_row("memberships", membership("ops", p1)).await.unwrap();
    h.store.insert_row("memberships", membership("ops", p2)).await.unwrap();
    h.store.insert_row("memberships", membership("dev", p2)).await.unwrap();

    for p in ["alice@a.example", "alice@b.example"] {
        h.network
            .publish(p, person().with_successor(internal("alice@z.example")));
    }
    h.network.publish(
        "alice@z.example",
        person().with_predecessors(vec![id("alice@a.example"), id("alice@b.example")]),
    );
    (p1, p2)
}

#[tokio::test]
async fn predecessors_merge_into_new_identity() {
    let h = Harness::new();
    let (p1, p2) = two_members(&h).await;

    let merged = h.resolver.establish(&id("alice@z.example")).await.unwrap();
    assert_eq!(merged.outcome, ResolutionOutcome::Merged);
    let z = merged.identity.key;
    assert_ne!(z, p1);
    assert_ne!(z, p2);

    let rows = h.store.rows("memberships").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .all(|row| row.get("member") == Some(&naming_store::key_value(z))));

    for old in ["alice@a.example", "alice@b.example"] {
        assert_eq!(h.resolver.resolve_str(old).await.unwrap().key, z);
        assert_eq!(h.store.get_by_identifier(&id(old)).await.unwrap().unwrap().key, z);
    }
    assert_eq!(h.store.successor_count().unwrap(), 2);
    assert_eq!(h.identity_count(), 1);

    h.resolver.check_integrity().await.unwrap();
    let err = h.resolver.resolve_key(p1).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn merge_requires_person_category() {
    let h = Harness::new();
    for t in ["kind@a.example", "kind@b.example"] {
        h.network.publish(
            t,
            IdentityReply::new(Category::SyntacticType)
                .with_successor(internal("kind@z.example")),
        );
    }
    h.network.publish(
        "kind@z.example",
        IdentityReply::new(Category::SyntacticType)
            .with_predecessors(vec![id("kind@a.example"), id("kind@b.example")]),
    );

    let err = h.resolver.resolve_str("kind@z.example").await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert!(!h.store.is_mapped(&id("kind@z.example")).await.unwrap());
    assert_eq!(h.identity_count(), 0);
}

struct FailingOwner;

#[async_trait]
impl ReferenceOwner for FailingOwner {
    fn name(&self) -> &str {
        "failing"
    }

    fn references(&self) -> Vec<ReferenceColumn> {
        vec![ReferenceColumn::new("audit", "actor")]
    }

    async fn rewrite(
        &self,
        _txn: &mut dyn StoreTransaction,
        _old: IdentityKey,
        _survivor: IdentityKey,
    ) -> StoreResult<RewriteSummary> {
        Err(StoreError::Backend("audit log unavailable".to_string()))
    }
}

#[tokio::test]
async fn failed_merge_leaves_no_trace() {
    let h = Harness::new();
    let (p1, p2) = two_members(&h).await;
    h.registry.register(Arc::new(FailingOwner)).unwrap();

    let err = h.resolver.resolve_str("alice@z.example").await.unwrap_err();
    assert!(matches!(err, ResolveError::Store(_)));

    assert!(!h.store.is_mapped(&id("alice@z.example")).await.unwrap());
    assert_eq!(h.store.successor_count().unwrap(), 0);
    assert_eq!(h.identity_count(), 2);
    assert_eq!(
        h.store.get_by_identifier(&id("alice@a.example")).await.unwrap().unwrap().key,
        p1
    );
    let rows = h.store.rows("memberships").await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .any(|row| row.get("member") == Some(&naming_store::key_value(p2))));
}

#[tokio::test]
async fn declared_successor_is_followed() {
    let h = Harness::new();
    h.network.publish(
        "alice@example.net",
        person().with_successor(internal("alice@newdomain.net")),
    );
    h.network.publish(
        "alice@newdomain.net",
        person().with_predecessors(vec![id("alice@example.net")]),
    );

    let resolved = h.resolver.establish(&id("alice@example.net")).await.unwrap();

    assert_eq!(resolved.outcome, ResolutionOutcome::Superseded);
    assert_eq!(resolved.identity.address, id("alice@newdomain.net"));
    assert_eq!(h.identity_count(), 1);
    assert_eq!(h.network.queries_for("alice@example.net"), 1);
    assert_eq!(
        h.resolver.resolve_str("alice@newdomain.net").await.unwrap().key,
        resolved.identity.key
    );
}

#[tokio::test]
async fn successor_that_does_not_claim_back_is_rejected() {
    let h = Harness::new();
    h.network.publish(
        "alice@example.net",
        person().with_successor(internal("alice@newdomain.net")),
    );
    h.network.publish("alice@newdomain.net", person());

    let err = h.resolver.resolve_str("alice@example.net").await.unwrap_err();

    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert!(!h.store.is_mapped(&id("alice@example.net")).await.unwrap());
}

#[tokio::test]
async fn successor_cycle_is_rejected() {
    let h = Harness::new();
    h.network
        .publish("a@x.example", person().with_successor(internal("b@x.example")));
    h.network
        .publish("b@x.example", person().with_successor(internal("a@x.example")));

    let err = h.resolver.resolve_str("a@x.example").await.unwrap_err();

    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert_eq!(h.identity_count(), 0);
}

#[tokio::test]
async fn predecessor_cycle_is_rejected() {
    let h = Harness::new();
    h.network
        .publish("a@x.example", person().with_predecessors(vec![id("b@x.example")]));
    h.network
        .publish("b@x.example", person().with_predecessors(vec![id("a@x.example")]));

    let err = h.resolver.resolve_str("b@x.example").await.unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(h.identity_count(), 0);
}

#[tokio::test]
async fn long_successor_chain_exceeds_depth() {
    let config = ResolverConfig {
        max_establishment_depth: 3,
        ..Default::default()
    };
    let h = Harness::with_config(config);
    let chain = ["u0@x.example", "u1@x.example", "u2@x.example", "u3@x.example", "u4@x.example"];
    for pair in chain.windows(2) {
        h.network
            .publish(pair[0], person().with_successor(internal(pair[1])));
    }
    h.network.publish("u4@x.example", person());

    let err = h.resolver.resolve_str("u0@x.example").await.unwrap_err();
    assert!(err.to_string().contains("depth"));
}

#[tokio::test]
async fn external_without_host_record_is_uncertified() {
    let h = Harness::new();

    let email = h.resolver.establish(&id("email:bob@mail.example")).await.unwrap();
    assert_eq!(email.outcome, ResolutionOutcome::Uncertified);
    assert_eq!(email.identity.category, Category::EmailPerson);
    assert!(!email.identity.is_certified());
    assert_eq!(h.network.queries_for("email:bob@mail.example"), 1);

    let mobile = h.resolver.establish(&id("mobile:+15551234567")).await.unwrap();
    assert_eq!(mobile.outcome, ResolutionOutcome::Uncertified);
    assert_eq!(mobile.identity.category, Category::MobilePerson);
    assert_eq!(h.network.total_queries(), 1);
}

#[tokio::test]
async fn external_promoted_to_internal_person() {
    let h = Harness::new();
    h.network.publish(
        "email:alice@mail.example",
        IdentityReply::new(Category::EmailPerson).with_successor(internal("alice@example.net")),
    );
    h.network.publish(
        "alice@example.net",
        person().with_predecessors(vec![id("email:alice@mail.example")]),
    );

    let promoted = h
        .resolver
        .establish(&id("email:alice@mail.example"))
        .await
        .unwrap();

    assert_eq!(promoted.outcome, ResolutionOutcome::Superseded);
    assert_eq!(promoted.identity.category, Category::NaturalPerson);
    assert_eq!(promoted.identity.address, id("alice@example.net"));
    assert_eq!(h.identity_count(), 1);
    assert_eq!(
        h.store
            .get_by_identifier(&id("email:alice@mail.example"))
            .await
            .unwrap()
            .unwrap()
            .key,
        promoted.identity.key
    );
    assert_eq!(h.network.queries_for("email:alice@mail.example"), 1);
}

#[tokio::test]
async fn external_successor_must_claim_it() {
    let h = Harness::new();
    h.network.publish(
        "email:alice@mail.example",
        IdentityReply::new(Category::EmailPerson).with_successor(internal("alice@example.net")),
    );
    h.network.publish("alice@example.net", person());

    let err = h
        .resolver
        .resolve_str("email:alice@mail.example")
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::InvalidDeclaration(_)));
    assert!(!h.store.is_mapped(&id("email:alice@mail.example")).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_establishment_queries_once() {
    let network = Arc::new(MockNetwork::with_delay(Duration::from_millis(50)));
    network.publish("alice@example.net", person());
    let h = Harness::build(
        ResolverConfig::default(),
        Arc::new(InMemoryIdentityStore::new()),
        network,
        Arc::new(ReferenceRegistry::new()),
    );

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let resolver = Arc::clone(&h.resolver);
            tokio::spawn(async move { resolver.resolve_str("alice@example.net").await })
        })
        .collect();

    let mut keys = Vec::new();
    for task in tasks {
        keys.push(task.await.unwrap().unwrap().key);
    }

    assert!(keys.iter().all(|key| *key == keys[0]));
    assert_eq!(h.network.queries_for("alice@example.net"), 1);
    assert_eq!(h.identity_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn old_and_new_names_resolve_concurrently() {
    for _ in 0..5 {
        let network = Arc::new(MockNetwork::with_delay(Duration::from_millis(20)));
        network.publish(
            "alice@example.net",
            person().with_successor(internal("alice@newdomain.net")),
        );
        network.publish(
            "alice@newdomain.net",
            person().with_predecessors(vec![id("alice@example.net")]),
        );
        let config = ResolverConfig {
            lock_timeout_ms: 2_000,
            ..Default::default()
        };
        let h = Harness::build(
            config,
            Arc::new(InMemoryIdentityStore::new()),
            network,
            Arc::new(ReferenceRegistry::new()),
        );

        let new_name = {
            let resolver = Arc::clone(&h.resolver);
            tokio::spawn(async move { resolver.resolve_str("alice@newdomain.net").await })
        };
        let old_name = {
            let resolver = Arc::clone(&h.resolver);
            tokio::spawn(async move { resolver.resolve_str("alice@example.net").await })
        };

        let new_identity = new_name.await.unwrap().unwrap();
        let old_identity = old_name.await.unwrap().unwrap();

        assert_eq!(new_identity.key, old_identity.key);
        assert_eq!(old_identity.address, id("alice@newdomain.net"));
        assert_eq!(h.identity_count(), 1);
        assert_eq!(h.store.successor_count().unwrap(), 1);
    }
}

#[tokio::test]
async fn rejected_successor_leaves_predecessor_unmapped() {
    let h = Harness::new();
    h.network.publish(
        "alice@example.net",
        person().with_successor(internal("alice@newdomain.net")),
    );
    h.network.publish(
        "alice@newdomain.net",
        IdentityReply::new(Category::ArtificialPerson)
            .with_predecessors(vec![id("alice@example.net")]),
    );

    let first = h.resolver.resolve_str("alice@example.net").await.unwrap_err();
    assert!(matches!(first, ResolveError::InvalidDeclaration(_)));
    assert!(first.to_string().contains("cannot succeed"));
    assert!(!h.store.is_mapped(&id("alice@example.net")).await.unwrap());
    assert!(!h.store.is_mapped(&id("alice@newdomain.net")).await.unwrap());

    let second = h.resolver.resolve_str("alice@example.net").await.unwrap_err();
    assert!(matches!(second, ResolveError::InvalidDeclaration(_)));
    assert_eq!(h.identity_count(), 0);
    assert_eq!(h.store.successor_count().unwrap(), 0);
}

#[tokio::test]
async fn failed_merge_of_unmapped_predecessor_leaves_no_trace() {
    let h = Harness::new();
    h.registry.register(Arc::new(FailingOwner)).unwrap();
    h.network.publish(
        "email:alice@mail.example",
        IdentityReply::new(Category::EmailPerson).with_successor(internal("alice@example.net")),
    );
    h.network.publish(
        "alice@example.net",
        person().with_predecessors(vec![id("email:alice@mail.example")]),
    );

    let err = h
        .resolver
        .resolve_str("email:alice@mail.example")
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Store(_)));
    assert!(!h.store.is_mapped(&id("email:alice@mail.example")).await.unwrap());
    assert!(!h.store.is_mapped(&id("alice@example.net")).await.unwrap());
    assert_eq!(h.identity_count(), 0);
    assert_eq!(h.store.successor_count().unwrap(), 0);
}

#[tokio::test]
async fn shared_writer_reads_through_to_store() {
    let store = Arc::new(InMemoryIdentityStore::new());
    let network = Arc::new(MockNetwork::new());
    network.publish("alice@example.net", person());
    let registry = Arc::new(ReferenceRegistry::new());

    let first = Harness::build(
        ResolverConfig::shared_writer(),
        store.clone(),
        network.clone(),
        registry.clone(),
    );
    let second = Harness::build(ResolverConfig::shared_writer(), store, network, registry);

    let created = first.resolver.establish(&id("alice@example.net")).await.unwrap();
    let loaded = second.resolver.establish(&id("alice@example.net")).await.unwrap();
    let reloaded = first.resolver.establish(&id("alice@example.net")).await.unwrap();

    assert_eq!(created.outcome, ResolutionOutcome::Created);
    assert_eq!(loaded.outcome, ResolutionOutcome::Loaded);
    assert_eq!(reloaded.outcome, ResolutionOutcome::Loaded);
    assert_eq!(created.identity.key, loaded.identity.key);
    assert!(first.resolver.cache().is_empty());
    assert_eq!(first.resolver.cache().mode(), StoreMode::SharedWriter);
    assert_eq!(first.network.total_queries(), 1);
}

#[tokio::test]
async fn explicit_merge_keeps_survivor_address() {
    let h = Harness::new();
    h.registry
        .register_column("memberships", "member", Vec::<String>::new())
        .unwrap();
    h.network.publish("alice@a.example", person());
    h.network.publish("alice@b.example", person());
    let old = h.resolver.resolve_str("alice@a.example").await.unwrap();
    let survivor = h.resolver.resolve_str("alice@b.example").await.unwrap();
    h.store
        .insert_row("memberships", membership("ops", old.key))
        .await
        .unwrap();

    let report = h.resolver.merge(&[old.key], survivor.key).await.unwrap();
    assert_eq!(report.rewritten, RewriteSummary { rewritten: 1, deleted: 0 });

    let resolved = h.resolver.resolve_str("alice@a.example").await.unwrap();
    assert_eq!(resolved.key, survivor.key);
    assert_eq!(resolved.address, id("alice@b.example"));
    assert_eq!(h.resolver.resolve_key(survivor.key).await.unwrap(), survivor);
}
