// Common test utilities: router over the in-memory store and mock cloud
#![allow(dead_code)]

use axum::Router;
use neptune_api::app::AppState;
use neptune_api::routes::create_router;
use neptune_broker::{Broker, BrokerSettings, MemoryPoolStore};
use neptune_providers::mock::{MockIdentityApi, MockResourceLifecycle};
use std::sync::Arc;

pub const REGION: &str = "eu-west-1";

pub struct TestApp {
    pub router: Router,
    pub broker: Broker,
    pub resources: Arc<MockResourceLifecycle>,
    pub identity: Arc<MockIdentityApi>,
}

pub fn create_test_app() -> TestApp {
    let resources = Arc::new(MockResourceLifecycle::new(REGION));
    let identity = Arc::new(MockIdentityApi::new());
    let broker = Broker::new(
        Arc::new(MemoryPoolStore::new()),
        resources.clone(),
        identity.clone(),
        BrokerSettings {
            region: REGION.to_string(),
            account_number: "123456789012".to_string(),
            ..Default::default()
        },
    );
    let state = AppState::new(broker.clone());
    TestApp {
        router: create_router().with_state(state),
        broker,
        resources,
        identity,
    }
}

/// Provision `n` "small" instances and bring them to Available.
pub async fn fill_pool(app: &TestApp, n: u32) -> Vec<String> {
    let mut names = Vec::new();
    for _ in 0..n {
        if let neptune_broker::ProvisionOutcome::Created { name, .. } =
            app.broker.ensure_minimum("small", n).await.unwrap()
        {
            names.push(name);
        }
    }
    app.resources.mark_all_available().await;
    app.broker.reconcile_endpoints().await.unwrap();
    names
}
