// Integration tests for the Postgres pool store.
// They run against TEST_DATABASE_URL and are skipped when it is not set.
use chrono::{Duration, Utc};
use futures_util::future::join_all;
use neptune_broker::migrations::run_inline_migrations;
use neptune_broker::{PgPoolStore, PoolStore};
use neptune_common::{Credential, InstanceRecord, InstanceState};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

async fn test_store() -> Option<Arc<PgPoolStore>> {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping Postgres store test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to create test database pool");
    MIGRATED
        .get_or_init(|| async {
            run_inline_migrations(&pool)
                .await
                .expect("Failed to run migrations on test database");
        })
        .await;
    Some(Arc::new(PgPoolStore::new(pool)))
}

/// Each test works on its own plan so tests can share one database.
fn unique_plan() -> String {
    format!("pgtest-{}", Uuid::new_v4().simple())
}

async fn insert_provisioning(store: &PgPoolStore, name: &str, plan: &str, age_secs: i64) {
    let record = InstanceRecord::provisioning(
        name,
        plan,
        Utc::now() - Duration::seconds(age_secs),
        Some(Credential::new(format!("AK{}", name), "secret")),
    );
    store.insert(&record, Some("cluster-res")).await.unwrap();
}

async fn insert_available(store: &PgPoolStore, name: &str, plan: &str, age_secs: i64) {
    insert_provisioning(store, name, plan, age_secs).await;
    assert!(store
        .set_endpoint(name, &format!("{}.db:8182", name))
        .await
        .unwrap());
}

async fn cleanup(store: &PgPoolStore, plan: &str) {
    sqlx::query("DELETE FROM teardown_tasks WHERE name LIKE $1 || '%'")
        .bind(plan)
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("DELETE FROM provision WHERE plan = $1")
        .bind(plan)
        .execute(store.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_claim_oldest_is_fifo() {
    let Some(store) = test_store().await else { return };
    let plan = unique_plan();
    for (suffix, age) in [("young", 10), ("old", 300), ("mid", 100)] {
        insert_available(&store, &format!("{}-{}", plan, suffix), &plan, age).await;
    }

    let mut order = Vec::new();
    while let Some(record) = store.claim_oldest(&plan, "acct-1").await.unwrap() {
        assert_eq!(record.state, InstanceState::Claimed);
        assert_eq!(record.billing_code.as_deref(), Some("acct-1"));
        order.push(record.name);
    }
    assert_eq!(
        order,
        vec![
            format!("{}-old", plan),
            format!("{}-mid", plan),
            format!("{}-young", plan)
        ]
    );
    assert_eq!(store.count_capacity(&plan).await.unwrap(), 0);

    cleanup(&store, &plan).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_get_distinct_records() {
    let Some(store) = test_store().await else { return };
    let plan = unique_plan();
    let n = 8;
    for i in 0..n {
        insert_available(&store, &format!("{}-{}", plan, i), &plan, 100 + i).await;
    }

    let claims = (0..n).map(|i| {
        let store = store.clone();
        let plan = plan.clone();
        tokio::spawn(async move { store.claim_oldest(&plan, &format!("acct-{}", i)).await })
    });
    let names: Vec<String> = join_all(claims)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().expect("every claimant gets a record").name)
        .collect();

    let distinct: HashSet<&String> = names.iter().collect();
    assert_eq!(distinct.len(), n as usize);
    assert!(store.claim_oldest(&plan, "late").await.unwrap().is_none());

    cleanup(&store, &plan).await;
}

#[tokio::test]
async fn test_mark_deleting_is_single_shot_and_queues_teardown() {
    let Some(store) = test_store().await else { return };
    let plan = unique_plan();
    let name = format!("{}-a", plan);
    insert_available(&store, &name, &plan, 0).await;

    let before = store.mark_deleting(&name).await.unwrap().unwrap();
    assert_eq!(before.state, InstanceState::Available);
    assert!(store.mark_deleting(&name).await.unwrap().is_none());
    assert_eq!(store.get(&name).await.unwrap().unwrap().state, InstanceState::Deleting);
    assert_eq!(store.count_capacity(&plan).await.unwrap(), 0);
    assert!(store.claim_oldest(&plan, "acct-1").await.unwrap().is_none());

    let queued: Vec<_> = store
        .pending_teardowns()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.name == name)
        .collect();
    assert_eq!(queued.len(), 1);
    assert!(!queued[0].instance_deleted && !queued[0].record_removed);

    assert!(store.mark_deleting(&format!("{}-missing", plan)).await.unwrap().is_none());

    cleanup(&store, &plan).await;
}

#[tokio::test]
async fn test_set_endpoint_is_conditional() {
    let Some(store) = test_store().await else { return };
    let plan = unique_plan();
    let name = format!("{}-a", plan);
    insert_provisioning(&store, &name, &plan, 0).await;
    assert!(store.claim_oldest(&plan, "acct-1").await.unwrap().is_none());

    assert!(!store.set_endpoint(&name, "").await.unwrap());
    assert!(store.set_endpoint(&name, "a.db:8182").await.unwrap());
    assert!(!store.set_endpoint(&name, "other.db:8182").await.unwrap());
    let record = store.get(&name).await.unwrap().unwrap();
    assert_eq!(record.state, InstanceState::Available);
    assert_eq!(record.endpoint.as_deref(), Some("a.db:8182"));
    assert_eq!(store.cluster_resource_id(&name).await.unwrap().as_deref(), Some("cluster-res"));

    // Deleting records never get an endpoint.
    let other = format!("{}-b", plan);
    insert_provisioning(&store, &other, &plan, 0).await;
    store.mark_deleting(&other).await.unwrap();
    assert!(!store.set_endpoint(&other, "b.db:8182").await.unwrap());

    cleanup(&store, &plan).await;
}
