// Shared fixtures for broker integration tests: in-memory store + mock cloud.
#![allow(dead_code)]

use chrono::{Duration, Utc};
use neptune_broker::{Broker, BrokerSettings, MemoryPoolStore, ProvisioningSettings};
use neptune_common::{Credential, InstanceRecord, InstanceState};
use neptune_providers::inventory::{ClusterSpec, InstanceSpec};
use neptune_providers::mock::{MockIdentityApi, MockResourceLifecycle};
use neptune_providers::ResourceLifecycle;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const REGION: &str = "us-west-2";
pub const ACCOUNT: &str = "123456789012";

pub struct Harness {
    pub broker: Broker,
    pub store: Arc<MemoryPoolStore>,
    pub resources: Arc<MockResourceLifecycle>,
    pub identity: Arc<MockIdentityApi>,
}

pub fn settings(small_minimum: u32) -> BrokerSettings {
    BrokerSettings {
        region: REGION.to_string(),
        account_number: ACCOUNT.to_string(),
        provisioning: ProvisioningSettings {
            name_prefix: "neptune-".to_string(),
            security_group_id: "sg-0123".to_string(),
            subnet_group_name: "neptune-subnets".to_string(),
            kms_key_id: "kms-key-1".to_string(),
            minimums: BTreeMap::from([("small".to_string(), small_minimum)]),
        },
    }
}

pub fn harness(small_minimum: u32) -> Harness {
    let store = Arc::new(MemoryPoolStore::new());
    let resources = Arc::new(MockResourceLifecycle::new(REGION));
    let identity = Arc::new(MockIdentityApi::new());
    let broker = Broker::new(
        store.clone(),
        resources.clone(),
        identity.clone(),
        settings(small_minimum),
    );
    Harness {
        broker,
        store,
        resources,
        identity,
    }
}

/// Put an Available record of plan "small" in the pool, `age_secs` old,
/// backed by a real mock cluster/instance pair.
pub async fn seed_available(h: &Harness, name: &str, age_secs: i64) {
    h.resources
        .create_cluster(&ClusterSpec {
            identifier: name.to_string(),
            engine: "neptune".to_string(),
            subnet_group: "neptune-subnets".to_string(),
            security_group_id: "sg-0123".to_string(),
            kms_key_id: "kms-key-1".to_string(),
            storage_encrypted: true,
            iam_auth: true,
        })
        .await
        .unwrap();
    h.resources
        .create_instance(&InstanceSpec {
            identifier: name.to_string(),
            cluster_identifier: name.to_string(),
            instance_class: "db.r4.large".to_string(),
            engine: "neptune".to_string(),
            subnet_group: "neptune-subnets".to_string(),
            multi_az: false,
            storage_encrypted: true,
            tags: vec![("Name".to_string(), name.to_string())],
        })
        .await
        .unwrap();
    h.resources.mark_available(name).await;

    let mut record = InstanceRecord::provisioning(
        name,
        "small",
        Utc::now() - Duration::seconds(age_secs),
        Some(Credential::new(format!("AKIA{}", name), format!("secret-{}", name))),
    );
    record.endpoint = Some(format!("{}.cluster-mock.{}.neptune.amazonaws.com:8182", name, REGION));
    record.state = InstanceState::Available;
    h.store.seed(record).await;
}

/// Provision `n` instances through the broker and bring them to Available.
pub async fn provision_ready(h: &Harness, n: u32) -> Vec<String> {
    for _ in 0..n {
        h.broker.ensure_minimum("small", n).await.unwrap();
    }
    h.resources.mark_all_available().await;
    h.broker.reconcile_endpoints().await.unwrap();
    h.store
        .records()
        .await
        .into_iter()
        .filter(|r| r.state == InstanceState::Available)
        .map(|r| r.name)
        .collect()
}
