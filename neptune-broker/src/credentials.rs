use neptune_common::{BrokerError, Credential};
use serde::Serialize;

use crate::Broker;

const POLICY_VERSION: &str = "2012-10-17";
const POLICY_ACTION: &str = "neptune-db:*";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyDocument<'a> {
    version: &'a str,
    statement: Vec<PolicyStatement<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyStatement<'a> {
    effect: &'a str,
    action: Vec<&'a str>,
    resource: Vec<String>,
}

pub fn policy_name(instance: &str) -> String {
    format!("{}policy", instance)
}

/// Access policy granting full data-plane access to one cluster, addressed
/// by its internal resource id.
pub fn policy_document(
    region: &str,
    account: &str,
    cluster_resource_id: &str,
) -> Result<String, serde_json::Error> {
    let base = format!(
        "arn:aws:neptune-db:{}:{}:{}",
        region, account, cluster_resource_id
    );
    let doc = PolicyDocument {
        version: POLICY_VERSION,
        statement: vec![PolicyStatement {
            effect: "Allow",
            action: vec![POLICY_ACTION],
            resource: vec![base.clone(), format!("{}/*", base)],
        }],
    };
    serde_json::to_string(&doc)
}

fn note(first_err: &mut Option<BrokerError>, name: &str, err: BrokerError) {
    tracing::warn!(name, error = %err, "credential revocation step failed");
    first_err.get_or_insert(err);
}

impl Broker {
    /// Create the identity, key pair and policy for `name`. On failure the
    /// partial identity is removed best-effort so a later attempt starts clean.
    pub async fn issue_credential(
        &self,
        name: &str,
        cluster_resource_id: &str,
    ) -> Result<Credential, BrokerError> {
        let document = policy_document(
            &self.settings.region,
            &self.settings.account_number,
            cluster_resource_id,
        )
        .map_err(|e| BrokerError::validation(e.to_string()))?;
        self.clear_stale_policy(name).await?;

        let mut unattached_policy: Option<String> = None;
        let result = async {
            self.identity
                .create_identity(name)
                .await
                .map_err(|e| BrokerError::upstream("create_identity", e))?;
            let key = self
                .identity
                .create_access_key(name)
                .await
                .map_err(|e| BrokerError::upstream("create_access_key", e))?;
            let policy = self
                .identity
                .create_policy(&policy_name(name), &document)
                .await
                .map_err(|e| BrokerError::upstream("create_policy", e))?;
            unattached_policy = Some(policy.clone());
            self.identity
                .attach_policy(name, &policy)
                .await
                .map_err(|e| BrokerError::upstream("attach_policy", e))?;
            unattached_policy = None;
            Ok::<_, BrokerError>(Credential::new(key.access_key_id, key.secret_access_key))
        }
        .await;

        if let Err(ref err) = result {
            tracing::warn!(name, error = %err, "credential issuance failed, rolling back");
            if let Err(e) = self.revoke_credential(name).await {
                tracing::warn!(name, error = %e, "rollback of partial identity failed");
            }
            if let Some(policy) = unattached_policy {
                if let Err(e) = self.identity.delete_policy(&policy).await {
                    tracing::warn!(name, error = %e, "could not delete unattached policy");
                }
            }
        } else {
            tracing::info!(name, "credential issued");
        }
        result
    }

    /// A policy orphaned by an earlier failed rollback would make every
    /// later `create_policy` for this name collide.
    async fn clear_stale_policy(&self, name: &str) -> Result<(), BrokerError> {
        let stale = self
            .identity
            .find_policy(&policy_name(name))
            .await
            .map_err(|e| BrokerError::upstream("find_policy", e))?;
        if let Some(policy) = stale {
            tracing::info!(name, "removing leftover credential policy");
            self.identity
                .delete_policy(&policy)
                .await
                .map_err(|e| BrokerError::upstream("delete_policy", e))?;
        }
        Ok(())
    }

    /// Remove everything issued for `name`: detach and delete its policies,
    /// delete its keys, then the identity. A missing identity counts as
    /// already revoked. Every step is attempted; the first failure is returned.
    pub async fn revoke_credential(&self, name: &str) -> Result<(), BrokerError> {
        let exists = self
            .identity
            .identity_exists(name)
            .await
            .map_err(|e| BrokerError::upstream("identity_exists", e))?;
        if !exists {
            return Ok(());
        }

        let mut first_err: Option<BrokerError> = None;

        match self.identity.list_attached_policies(name).await {
            Ok(policies) => {
                for policy in policies {
                    if let Err(e) = self.identity.detach_policy(name, &policy).await {
                        note(&mut first_err, name, BrokerError::upstream("detach_policy", e));
                        continue;
                    }
                    if let Err(e) = self.identity.delete_policy(&policy).await {
                        note(&mut first_err, name, BrokerError::upstream("delete_policy", e));
                    }
                }
            }
            Err(e) => note(&mut first_err, name, BrokerError::upstream("list_attached_policies", e)),
        }

        match self.identity.list_access_keys(name).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.identity.delete_access_key(name, &key).await {
                        note(&mut first_err, name, BrokerError::upstream("delete_access_key", e));
                    }
                }
            }
            Err(e) => note(&mut first_err, name, BrokerError::upstream("list_access_keys", e)),
        }

        if first_err.is_none() {
            if let Err(e) = self.identity.delete_identity(name).await {
                note(&mut first_err, name, BrokerError::upstream("delete_identity", e));
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => {
                tracing::info!(name, "credential revoked");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrokerSettings, MemoryPoolStore};
    use neptune_providers::mock::{MockIdentityApi, MockResourceLifecycle};
    use std::sync::Arc;

    fn broker(identity: Arc<MockIdentityApi>) -> Broker {
        Broker::new(
            Arc::new(MemoryPoolStore::new()),
            Arc::new(MockResourceLifecycle::new("us-west-2")),
            identity,
            BrokerSettings {
                region: "us-west-2".into(),
                account_number: "123456789012".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn policy_targets_cluster_resource_id() {
        let doc = policy_document("us-west-2", "123456789012", "cluster-ABC").unwrap();
        let v: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(v["Version"], "2012-10-17");
        let stmt = &v["Statement"][0];
        assert_eq!(stmt["Effect"], "Allow");
        assert_eq!(stmt["Action"][0], "neptune-db:*");
        assert_eq!(
            stmt["Resource"][0],
            "arn:aws:neptune-db:us-west-2:123456789012:cluster-ABC"
        );
        assert_eq!(
            stmt["Resource"][1],
            "arn:aws:neptune-db:us-west-2:123456789012:cluster-ABC/*"
        );
        assert_eq!(policy_name("neptune-1a2b"), "neptune-1a2bpolicy");
    }

    #[tokio::test]
    async fn issue_then_revoke_leaves_nothing_behind() {
        let iam = Arc::new(MockIdentityApi::new());
        let b = broker(iam.clone());

        let cred = b.issue_credential("db1", "cluster-1").await.unwrap();
        assert!(cred.is_complete());
        assert_eq!(iam.attached_documents("db1").await.len(), 1);

        b.revoke_credential("db1").await.unwrap();
        assert_eq!(iam.identity_count().await, 0);
        assert_eq!(iam.policy_count().await, 0);

        // Nothing to revoke the second time.
        b.revoke_credential("db1").await.unwrap();
    }

    #[tokio::test]
    async fn failed_attach_rolls_back_everything() {
        let iam = Arc::new(MockIdentityApi::new());
        let b = broker(iam.clone());
        iam.fail_once("attach_policy").await;

        let err = b.issue_credential("db1", "cluster-1").await.unwrap_err();
        assert!(matches!(err, BrokerError::Upstream { ref operation, .. } if operation == "attach_policy"));
        assert_eq!(iam.identity_count().await, 0);
        assert_eq!(iam.policy_count().await, 0);
    }

    #[tokio::test]
    async fn policy_left_by_failed_rollback_is_replaced() {
        let iam = Arc::new(MockIdentityApi::new());
        let b = broker(iam.clone());
        iam.fail_once("attach_policy").await;
        iam.fail_once("delete_policy").await;

        b.issue_credential("db1", "cluster-1").await.unwrap_err();
        assert_eq!(iam.identity_count().await, 0);
        assert_eq!(iam.policy_count().await, 1);

        let cred = b.issue_credential("db1", "cluster-1").await.unwrap();
        assert!(cred.is_complete());
        assert_eq!(iam.policy_count().await, 1);
        assert_eq!(iam.attached_documents("db1").await.len(), 1);
    }

    #[tokio::test]
    async fn revoke_reports_first_failed_step() {
        let iam = Arc::new(MockIdentityApi::new());
        let b = broker(iam.clone());
        b.issue_credential("db1", "cluster-1").await.unwrap();

        iam.fail_once("delete_access_key").await;
        let err = b.revoke_credential("db1").await.unwrap_err();
        assert!(matches!(err, BrokerError::Upstream { ref operation, .. } if operation == "delete_access_key"));
        assert!(iam.identity_exists("db1").await);

        b.revoke_credential("db1").await.unwrap();
        assert!(!iam.identity_exists("db1").await);
    }
}
