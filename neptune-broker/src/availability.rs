use neptune_common::{BrokerError, ConnectionInfo, InstanceState};

use crate::Broker;

/// Readiness of a cloud instance as reported by the provisioning API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Pending,
    /// `address:port`
    Ready(String),
    Unknown,
}

impl Broker {
    /// Ask the provider whether `name` accepts connections yet. Describe
    /// failures and unknown instances both come back as `Unknown`.
    pub async fn status(&self, name: &str) -> Availability {
        match self.resources.describe_instance(name).await {
            Ok(Some(desc)) => match desc.endpoint {
                Some(ep) if desc.is_available() && !ep.address.is_empty() => {
                    Availability::Ready(ep.to_string())
                }
                _ => Availability::Pending,
            },
            Ok(None) => Availability::Unknown,
            Err(e) => {
                tracing::debug!(name, error = %e, "describe_instance failed");
                Availability::Unknown
            }
        }
    }

    /// Connection details for an existing, fully populated record.
    pub async fn lookup(&self, name: &str) -> Result<ConnectionInfo, BrokerError> {
        let record = self
            .store
            .get(name)
            .await?
            .filter(|r| r.state != InstanceState::Deleting)
            .ok_or_else(|| BrokerError::NotFound(name.to_string()))?;

        record
            .connection_info(self.region())
            .ok_or_else(|| BrokerError::NotReady(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrokerSettings, MemoryPoolStore, PoolStore};
    use chrono::Utc;
    use neptune_common::{Credential, InstanceRecord};
    use neptune_providers::inventory::{ClusterSpec, InstanceSpec};
    use neptune_providers::mock::{MockIdentityApi, MockResourceLifecycle};
    use neptune_providers::ResourceLifecycle;
    use std::sync::Arc;

    fn broker(resources: Arc<MockResourceLifecycle>, store: Arc<MemoryPoolStore>) -> Broker {
        Broker::new(
            store,
            resources,
            Arc::new(MockIdentityApi::new()),
            BrokerSettings {
                region: "us-east-1".into(),
                ..Default::default()
            },
        )
    }

    async fn create(resources: &MockResourceLifecycle, name: &str) {
        resources
            .create_cluster(&ClusterSpec {
                identifier: name.into(),
                engine: "neptune".into(),
                subnet_group: "sn".into(),
                security_group_id: "sg".into(),
                kms_key_id: "kms".into(),
                storage_encrypted: true,
                iam_auth: true,
            })
            .await
            .unwrap();
        resources
            .create_instance(&InstanceSpec {
                identifier: name.into(),
                cluster_identifier: name.into(),
                instance_class: "db.r4.large".into(),
                engine: "neptune".into(),
                subnet_group: "sn".into(),
                multi_az: false,
                storage_encrypted: true,
                tags: vec![],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn status_follows_provider() {
        let resources = Arc::new(MockResourceLifecycle::new("us-east-1"));
        let b = broker(resources.clone(), Arc::new(MemoryPoolStore::new()));

        assert_eq!(b.status("nope").await, Availability::Unknown);

        create(&resources, "db1").await;
        assert_eq!(b.status("db1").await, Availability::Pending);

        resources.mark_available("db1").await;
        assert_eq!(
            b.status("db1").await,
            Availability::Ready("db1.cluster-mock.us-east-1.neptune.amazonaws.com:8182".into())
        );

        resources.fail_once("describe_instance").await;
        assert_eq!(b.status("db1").await, Availability::Unknown);
    }

    #[tokio::test]
    async fn lookup_distinguishes_missing_and_not_ready() {
        let store = Arc::new(MemoryPoolStore::new());
        let b = broker(Arc::new(MockResourceLifecycle::new("us-east-1")), store.clone());

        assert_eq!(b.lookup("ghost").await, Err(BrokerError::NotFound("ghost".into())));

        let record = InstanceRecord::provisioning("db1", "small", Utc::now(), Some(Credential::new("AK", "SK")));
        store.insert(&record, None).await.unwrap();
        assert_eq!(b.lookup("db1").await, Err(BrokerError::NotReady("db1".into())));

        store.set_endpoint("db1", "db1.host:8182").await.unwrap();
        let info = b.lookup("db1").await.unwrap();
        assert_eq!(info.database_url, "db1.host:8182");
        assert_eq!(info.region, "us-east-1");

        store.mark_deleting("db1").await.unwrap();
        assert_eq!(b.lookup("db1").await, Err(BrokerError::NotFound("db1".into())));
    }
}
