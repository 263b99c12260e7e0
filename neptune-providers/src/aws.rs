use crate::inventory::{
    AccessKeyPair, ClusterHandle, ClusterSpec, Endpoint, InstanceDescription, InstanceHandle,
    InstanceSpec, ResourceRef,
};
use crate::{IdentityApi, ResourceLifecycle};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_neptune::config::Region;
use aws_sdk_neptune::types::Tag;
use aws_sdk_neptune::Client as NeptuneClient;

/// Load shared AWS configuration (credentials chain) pinned to `region`.
pub async fn load_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

/// Neptune cluster/instance lifecycle over the RDS-compatible API.
pub struct AwsNeptuneProvider {
    client: NeptuneClient,
    region: String,
    account_number: String,
}

impl AwsNeptuneProvider {
    pub fn new(config: &aws_config::SdkConfig, region: String, account_number: String) -> Self {
        Self {
            client: NeptuneClient::new(config),
            region,
            account_number,
        }
    }

    fn arn(&self, resource: &ResourceRef) -> String {
        let kind = match resource {
            ResourceRef::Cluster(_) => "cluster",
            ResourceRef::Instance(_) => "db",
        };
        format!(
            "arn:aws:rds:{}:{}:{}:{}",
            self.region,
            self.account_number,
            kind,
            resource.identifier()
        )
    }
}

#[async_trait]
impl ResourceLifecycle for AwsNeptuneProvider {
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterHandle> {
        let resp = self
            .client
            .create_db_cluster()
            .engine(&spec.engine)
            .db_cluster_identifier(&spec.identifier)
            .db_subnet_group_name(&spec.subnet_group)
            .storage_encrypted(spec.storage_encrypted)
            .kms_key_id(&spec.kms_key_id)
            .enable_iam_database_authentication(spec.iam_auth)
            .vpc_security_group_ids(&spec.security_group_id)
            .send()
            .await
            .with_context(|| format!("CreateDBCluster {}", spec.identifier))?;

        let resource_id = resp
            .db_cluster()
            .and_then(|c| c.db_cluster_resource_id())
            .ok_or_else(|| anyhow!("CreateDBCluster {} returned no resource id", spec.identifier))?;

        tracing::debug!(cluster = %spec.identifier, "neptune cluster creation accepted");
        Ok(ClusterHandle {
            identifier: spec.identifier.clone(),
            resource_id: resource_id.to_string(),
        })
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle> {
        let mut req = self
            .client
            .create_db_instance()
            .db_instance_class(&spec.instance_class)
            .db_instance_identifier(&spec.identifier)
            .engine(&spec.engine)
            .db_cluster_identifier(&spec.cluster_identifier)
            .db_subnet_group_name(&spec.subnet_group)
            .multi_az(spec.multi_az)
            .storage_encrypted(spec.storage_encrypted);
        for (key, value) in &spec.tags {
            req = req.tags(Tag::builder().key(key).value(value).build());
        }
        req.send()
            .await
            .with_context(|| format!("CreateDBInstance {}", spec.identifier))?;

        tracing::debug!(instance = %spec.identifier, "neptune instance creation accepted");
        Ok(InstanceHandle {
            identifier: spec.identifier.clone(),
        })
    }

    async fn describe_instance(&self, name: &str) -> Result<Option<InstanceDescription>> {
        let resp = match self
            .client
            .describe_db_instances()
            .db_instance_identifier(name)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_db_instance_not_found_fault())
                    .unwrap_or(false);
                if not_found {
                    return Ok(None);
                }
                return Err(anyhow::Error::new(e).context(format!("DescribeDBInstances {}", name)));
            }
        };

        let Some(inst) = resp.db_instances().first() else {
            return Ok(None);
        };
        let endpoint = inst.endpoint().and_then(|ep| {
            let address = ep.address()?;
            let port = ep.port().and_then(|p| u16::try_from(p).ok())?;
            Some(Endpoint {
                address: address.to_string(),
                port,
            })
        });
        Ok(Some(InstanceDescription {
            identifier: name.to_string(),
            status: inst.db_instance_status().unwrap_or_default().to_string(),
            endpoint,
        }))
    }

    async fn cluster_exists(&self, name: &str) -> Result<bool> {
        match self
            .client
            .describe_db_clusters()
            .db_cluster_identifier(name)
            .send()
            .await
        {
            Ok(resp) => Ok(!resp.db_clusters().is_empty()),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_db_cluster_not_found_fault())
                    .unwrap_or(false);
                if not_found {
                    return Ok(false);
                }
                Err(anyhow::Error::new(e).context(format!("DescribeDBClusters {}", name)))
            }
        }
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        self.client
            .delete_db_instance()
            .db_instance_identifier(name)
            .skip_final_snapshot(true)
            .send()
            .await
            .with_context(|| format!("DeleteDBInstance {}", name))?;
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        self.client
            .delete_db_cluster()
            .db_cluster_identifier(name)
            .skip_final_snapshot(true)
            .send()
            .await
            .with_context(|| format!("DeleteDBCluster {}", name))?;
        Ok(())
    }

    async fn tag_resource(&self, resource: &ResourceRef, key: &str, value: &str) -> Result<()> {
        let arn = self.arn(resource);
        self.client
            .add_tags_to_resource()
            .resource_name(&arn)
            .tags(Tag::builder().key(key).value(value).build())
            .send()
            .await
            .with_context(|| format!("AddTagsToResource {}", arn))?;
        Ok(())
    }
}

/// IAM users, access keys and managed policies.
pub struct AwsIamProvider {
    client: IamClient,
    account_number: String,
}

impl AwsIamProvider {
    pub fn new(config: &aws_config::SdkConfig, account_number: String) -> Self {
        Self {
            client: IamClient::new(config),
            account_number,
        }
    }
}

#[async_trait]
impl IdentityApi for AwsIamProvider {
    async fn identity_exists(&self, name: &str) -> Result<bool> {
        match self.client.get_user().user_name(name).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_entity_exception())
                    .unwrap_or(false);
                if missing {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(e).context(format!("GetUser {}", name)))
                }
            }
        }
    }

    async fn create_identity(&self, name: &str) -> Result<String> {
        let resp = self
            .client
            .create_user()
            .user_name(name)
            .send()
            .await
            .with_context(|| format!("CreateUser {}", name))?;
        let arn = resp
            .user()
            .map(|u| u.arn().to_string())
            .ok_or_else(|| anyhow!("CreateUser {} returned no user", name))?;
        Ok(arn)
    }

    async fn create_access_key(&self, identity: &str) -> Result<AccessKeyPair> {
        let resp = self
            .client
            .create_access_key()
            .user_name(identity)
            .send()
            .await
            .with_context(|| format!("CreateAccessKey {}", identity))?;
        let key = resp
            .access_key()
            .ok_or_else(|| anyhow!("CreateAccessKey {} returned no key", identity))?;
        Ok(AccessKeyPair {
            access_key_id: key.access_key_id().to_string(),
            secret_access_key: key.secret_access_key().to_string(),
        })
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<String> {
        let resp = self
            .client
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
            .with_context(|| format!("CreatePolicy {}", name))?;
        resp.policy()
            .and_then(|p| p.arn())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("CreatePolicy {} returned no arn", name))
    }

    async fn find_policy(&self, name: &str) -> Result<Option<String>> {
        let arn = format!("arn:aws:iam::{}:policy/{}", self.account_number, name);
        match self.client.get_policy().policy_arn(&arn).send().await {
            Ok(_) => Ok(Some(arn)),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_entity_exception())
                    .unwrap_or(false);
                if missing {
                    Ok(None)
                } else {
                    Err(anyhow::Error::new(e).context(format!("GetPolicy {}", name)))
                }
            }
        }
    }

    async fn attach_policy(&self, identity: &str, policy: &str) -> Result<()> {
        self.client
            .attach_user_policy()
            .user_name(identity)
            .policy_arn(policy)
            .send()
            .await
            .with_context(|| format!("AttachUserPolicy {}", identity))?;
        Ok(())
    }

    async fn list_attached_policies(&self, identity: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .list_attached_user_policies()
            .user_name(identity)
            .send()
            .await
            .with_context(|| format!("ListAttachedUserPolicies {}", identity))?;
        Ok(resp
            .attached_policies()
            .iter()
            .filter_map(|p| p.policy_arn().map(str::to_string))
            .collect())
    }

    async fn detach_policy(&self, identity: &str, policy: &str) -> Result<()> {
        self.client
            .detach_user_policy()
            .user_name(identity)
            .policy_arn(policy)
            .send()
            .await
            .with_context(|| format!("DetachUserPolicy {}", identity))?;
        Ok(())
    }

    async fn delete_policy(&self, policy: &str) -> Result<()> {
        self.client
            .delete_policy()
            .policy_arn(policy)
            .send()
            .await
            .with_context(|| format!("DeletePolicy {}", policy))?;
        Ok(())
    }

    async fn list_access_keys(&self, identity: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .list_access_keys()
            .user_name(identity)
            .send()
            .await
            .with_context(|| format!("ListAccessKeys {}", identity))?;
        Ok(resp
            .access_key_metadata()
            .iter()
            .filter_map(|k| k.access_key_id().map(str::to_string))
            .collect())
    }

    async fn delete_access_key(&self, identity: &str, access_key_id: &str) -> Result<()> {
        self.client
            .delete_access_key()
            .user_name(identity)
            .access_key_id(access_key_id)
            .send()
            .await
            .with_context(|| format!("DeleteAccessKey {}", identity))?;
        Ok(())
    }

    async fn delete_identity(&self, identity: &str) -> Result<()> {
        self.client
            .delete_user()
            .user_name(identity)
            .send()
            .await
            .with_context(|| format!("DeleteUser {}", identity))?;
        Ok(())
    }
}
