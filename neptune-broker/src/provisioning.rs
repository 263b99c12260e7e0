use chrono::Utc;
use neptune_common::{BrokerError, InstanceRecord, Plan};
use neptune_providers::inventory::{ClusterSpec, InstanceSpec};
use uuid::Uuid;

use crate::availability::Availability;
use crate::store::StoreError;
use crate::Broker;

const ENGINE: &str = "neptune";
const NAME_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// One instance was requested. Without a credential the record waits
    /// for `reconcile_credentials`.
    Created { name: String, credential_issued: bool },
    /// The pool already had `count` unclaimed records.
    Satisfied { count: u64 },
}

/// `prefix` followed by the first group of a fresh v4 UUID.
pub fn generate_name(prefix: &str) -> String {
    let id = Uuid::new_v4().to_string();
    let head = id.split('-').next().unwrap_or(&id);
    format!("{}{}", prefix, head)
}

impl Broker {
    async fn unique_name(&self) -> Result<String, BrokerError> {
        let prefix = &self.settings.provisioning.name_prefix;
        for _ in 0..NAME_ATTEMPTS {
            let name = generate_name(prefix);
            if !self.store.exists(&name).await? {
                return Ok(name);
            }
            tracing::debug!(name = %name, "generated name already taken, retrying");
        }
        Err(BrokerError::Store(format!(
            "could not find a free instance name after {} attempts",
            NAME_ATTEMPTS
        )))
    }

    fn cluster_spec(&self, name: &str) -> ClusterSpec {
        let p = &self.settings.provisioning;
        ClusterSpec {
            identifier: name.to_string(),
            engine: ENGINE.to_string(),
            subnet_group: p.subnet_group_name.clone(),
            security_group_id: p.security_group_id.clone(),
            kms_key_id: p.kms_key_id.clone(),
            storage_encrypted: true,
            iam_auth: true,
        }
    }

    fn instance_spec(&self, name: &str, plan: &Plan) -> InstanceSpec {
        InstanceSpec {
            identifier: name.to_string(),
            cluster_identifier: name.to_string(),
            instance_class: plan.instance_class.clone(),
            engine: ENGINE.to_string(),
            subnet_group: self.settings.provisioning.subnet_group_name.clone(),
            multi_az: false,
            storage_encrypted: true,
            tags: vec![("Name".to_string(), name.to_string())],
        }
    }

    /// Top up the pool for `plan` by at most one instance.
    ///
    /// Counting and creating are not atomic with claims, so concurrent
    /// passes can overshoot by one; the next pass simply finds the pool
    /// satisfied.
    pub async fn ensure_minimum(&self, plan: &str, minimum: u32) -> Result<ProvisionOutcome, BrokerError> {
        let plan = self.plans.resolve(plan)?.clone();
        let count = self.store.count_capacity(&plan.name).await?;
        if count >= u64::from(minimum) {
            tracing::debug!(plan = %plan.name, count, minimum, "pool satisfied");
            return Ok(ProvisionOutcome::Satisfied { count });
        }

        let name = self.unique_name().await?;
        tracing::info!(name = %name, plan = %plan.name, count, minimum, "provisioning new instance");

        let cluster = self
            .resources
            .create_cluster(&self.cluster_spec(&name))
            .await
            .map_err(|e| BrokerError::upstream("create_cluster", e))?;

        if let Err(e) = self
            .resources
            .create_instance(&self.instance_spec(&name, &plan))
            .await
        {
            tracing::error!(name = %name, error = %e, "instance creation failed, removing cluster");
            if let Err(e) = self.resources.delete_cluster(&name).await {
                tracing::warn!(name = %name, error = %e, "could not remove orphaned cluster");
            }
            return Err(BrokerError::upstream("create_instance", e));
        }

        let credential = match self.issue_credential(&name, &cluster.resource_id).await {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(
                    name = %name,
                    error = %e,
                    "credential not issued, record will wait for reconciliation"
                );
                None
            }
        };
        let credential_issued = credential.is_some();

        let record = InstanceRecord::provisioning(&name, &plan.name, Utc::now(), credential);
        if let Err(e) = self.store.insert(&record, Some(&cluster.resource_id)).await {
            tracing::error!(name = %name, error = %e, "could not record new instance, releasing resources");
            self.release_unrecorded(&name).await;
            return Err(match e {
                StoreError::Duplicate(n) => BrokerError::Store(format!("instance name '{}' already exists", n)),
                other => other.into(),
            });
        }

        tracing::info!(name = %name, plan = %plan.name, credential_issued, "instance recorded");
        Ok(ProvisionOutcome::Created {
            name,
            credential_issued,
        })
    }

    /// Best-effort cleanup for resources created in a cycle whose record
    /// could not be written.
    async fn release_unrecorded(&self, name: &str) {
        if let Err(e) = self.revoke_credential(name).await {
            tracing::warn!(name, error = %e, "could not revoke unrecorded credential");
        }
        if let Err(e) = self.resources.delete_instance(name).await {
            tracing::warn!(name, error = %e, "could not delete unrecorded instance");
        }
        if let Err(e) = self.resources.delete_cluster(name).await {
            tracing::warn!(name, error = %e, "could not delete unrecorded cluster");
        }
    }

    /// Record endpoints for instances the provider now reports ready.
    /// Returns how many records were updated.
    pub async fn reconcile_endpoints(&self) -> Result<usize, BrokerError> {
        let pending = self.store.pending_endpoints().await?;
        let mut updated = 0;
        for record in pending {
            match self.status(&record.name).await {
                Availability::Ready(endpoint) => {
                    if self.store.set_endpoint(&record.name, &endpoint).await? {
                        tracing::info!(name = %record.name, endpoint = %endpoint, "instance ready");
                        updated += 1;
                    }
                }
                Availability::Pending => {
                    tracing::debug!(name = %record.name, "instance still provisioning");
                }
                Availability::Unknown => {
                    tracing::debug!(name = %record.name, "instance status unknown");
                }
            }
        }
        Ok(updated)
    }

    /// Retry credential issuance for records created without one. Any
    /// half-issued identity is removed first. Returns how many records
    /// received a credential.
    pub async fn reconcile_credentials(&self) -> Result<usize, BrokerError> {
        let awaiting = self.store.awaiting_credentials().await?;
        let mut issued = 0;
        for record in awaiting {
            let name = record.name.as_str();
            let Some(resource_id) = self.store.cluster_resource_id(name).await? else {
                tracing::warn!(name, "no cluster resource id recorded, cannot issue credential");
                continue;
            };
            if let Err(e) = self.revoke_credential(name).await {
                tracing::warn!(name, error = %e, "could not clear partial identity, retrying next pass");
                continue;
            }
            let credential = match self.issue_credential(name, &resource_id).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(name, error = %e, "credential issuance failed again");
                    continue;
                }
            };
            if self.store.set_credential(name, &credential).await? {
                issued += 1;
            } else {
                // Record left the pool meanwhile; the new identity has no owner.
                tracing::warn!(name, "record changed during credential issuance, revoking");
                if let Err(e) = self.revoke_credential(name).await {
                    tracing::warn!(name, error = %e, "could not revoke ownerless credential");
                }
            }
        }
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_name_uses_prefix_and_first_uuid_group() {
        let name = generate_name("neptune-");
        let suffix = name.strip_prefix("neptune-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_name("neptune-"), name);
    }
}
