// Integration tests for claiming and tagging
mod common;

use common::{harness, provision_ready, seed_available};
use futures_util::future::join_all;
use neptune_broker::PoolStore;
use neptune_common::{BrokerError, InstanceState};
use neptune_providers::inventory::ResourceRef;
use std::collections::HashSet;

#[tokio::test]
async fn test_claim_is_fifo_by_creation_time() {
    let h = harness(0);
    seed_available(&h, "neptune-young", 10).await;
    seed_available(&h, "neptune-old", 600).await;
    seed_available(&h, "neptune-mid", 120).await;

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(h.broker.claim("small", "acct-7").await.unwrap().name);
    }
    assert_eq!(order, vec!["neptune-old", "neptune-mid", "neptune-young"]);

    let err = h.broker.claim("small", "acct-7").await.unwrap_err();
    assert_eq!(err, BrokerError::PoolExhausted { plan: "small".into() });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_get_distinct_instances() {
    let h = harness(0);
    for i in 0..8 {
        seed_available(&h, &format!("neptune-{:02}", i), 100 - i).await;
    }

    let handles = (0..8).map(|i| {
        let broker = h.broker.clone();
        tokio::spawn(async move { broker.claim("small", &format!("billing-{}", i)).await })
    });
    let results = join_all(handles).await;

    let names: HashSet<String> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().name)
        .collect();
    assert_eq!(names.len(), 8);
    assert!(matches!(
        h.broker.claim("small", "late").await,
        Err(BrokerError::PoolExhausted { .. })
    ));
    assert!(h
        .store
        .records()
        .await
        .iter()
        .all(|r| r.state == InstanceState::Claimed && r.billing_code.is_some()));
}

#[tokio::test]
async fn test_claim_validation_happens_before_any_call() {
    let h = harness(0);
    seed_available(&h, "neptune-a", 10).await;
    let calls_before = h.resources.calls().await.len();

    for (plan, billing) in [("", "acct"), ("huge", "acct"), ("small", ""), ("small", "   ")] {
        let err = h.broker.claim(plan, billing).await.unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)), "{} / {:?}", plan, billing);
    }
    assert_eq!(h.resources.calls().await.len(), calls_before);
    assert_eq!(h.store.count_capacity("small").await.unwrap(), 1);
}

#[tokio::test]
async fn test_claim_returns_connection_details() {
    let h = harness(1);
    let names = provision_ready(&h, 1).await;

    let outcome = h.broker.claim("small", "acct-1").await.unwrap();
    assert_eq!(outcome.name, names[0]);
    let looked_up = h.broker.lookup(&outcome.name).await.unwrap();
    assert_eq!(looked_up, outcome.connection);
    assert!(outcome.connection.database_url.ends_with(":8182"));
}

#[tokio::test]
async fn test_claim_survives_tagging_failure_with_warning() {
    let h = harness(0);
    seed_available(&h, "neptune-a", 10).await;
    h.resources.fail_always("tag_cluster").await;

    let outcome = h.broker.claim("small", "acct-9").await.unwrap();
    assert_eq!(outcome.name, "neptune-a");
    match outcome.warning {
        Some(BrokerError::PartialFailure { ref failed, ref completed, .. }) => {
            assert_eq!(failed, &vec!["tag_cluster".to_string()]);
            assert_eq!(completed, &vec!["claim".to_string()]);
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
    // Instance tag still applied.
    let tags = h.resources.tags(&ResourceRef::Instance("neptune-a".into())).await;
    assert_eq!(tags.get("billingcode").map(String::as_str), Some("acct-9"));

    let record = h.store.get("neptune-a").await.unwrap().unwrap();
    assert_eq!(record.state, InstanceState::Claimed);
}

#[tokio::test]
async fn test_tag_existing_instance() {
    let h = harness(0);
    seed_available(&h, "neptune-a", 10).await;

    h.broker.tag("neptune-a", "team", "graph").await.unwrap();
    for resource in [
        ResourceRef::Cluster("neptune-a".into()),
        ResourceRef::Instance("neptune-a".into()),
    ] {
        assert_eq!(
            h.resources.tags(&resource).await.get("team").map(String::as_str),
            Some("graph")
        );
    }
}

#[tokio::test]
async fn test_tag_unknown_instance_makes_no_cloud_call() {
    let h = harness(0);

    let err = h.broker.tag("neptune-ghost", "team", "graph").await.unwrap_err();
    assert_eq!(err, BrokerError::NotFound("neptune-ghost".into()));
    assert!(h.resources.calls().await.is_empty());

    for (name, key, value) in [("", "k", "v"), ("n", "", "v"), ("n", "k", "")] {
        assert!(matches!(
            h.broker.tag(name, key, value).await,
            Err(BrokerError::Validation(_))
        ));
    }
    assert!(h.resources.calls().await.is_empty());
}

#[tokio::test]
async fn test_tag_upstream_failure_is_reported() {
    let h = harness(0);
    seed_available(&h, "neptune-a", 10).await;
    h.resources.fail_once("tag_instance").await;

    let err = h.broker.tag("neptune-a", "team", "graph").await.unwrap_err();
    assert!(matches!(err, BrokerError::Upstream { ref operation, .. } if operation == "tag_instance"));
}
