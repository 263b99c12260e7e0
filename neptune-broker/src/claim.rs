use neptune_common::{BrokerError, ConnectionInfo, InstanceState};
use neptune_providers::inventory::ResourceRef;

use crate::Broker;

/// Tag key written on both resources when an instance is claimed.
pub const BILLING_TAG: &str = "billingcode";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub name: String,
    pub connection: ConnectionInfo,
    /// Set when the claim committed but billing tags could not be applied.
    pub warning: Option<BrokerError>,
}

fn require(field: &str, value: &str) -> Result<(), BrokerError> {
    if value.trim().is_empty() {
        return Err(BrokerError::validation(format!("{} is required", field)));
    }
    Ok(())
}

impl Broker {
    /// Hand the oldest available instance of `plan` to `billing_code`.
    pub async fn claim(&self, plan: &str, billing_code: &str) -> Result<ClaimOutcome, BrokerError> {
        let plan = self.plans.resolve(plan)?;
        require("billingcode", billing_code)?;

        let record = self
            .store
            .claim_oldest(&plan.name, billing_code)
            .await?
            .ok_or_else(|| BrokerError::PoolExhausted {
                plan: plan.name.clone(),
            })?;
        tracing::info!(name = %record.name, plan = %plan.name, "instance claimed");

        let connection = record
            .connection_info(self.region())
            .ok_or_else(|| BrokerError::NotReady(record.name.clone()))?;

        // The claim stands even if tagging fails.
        let failed = self.tag_both(&record.name, BILLING_TAG, billing_code, false).await;
        let warning = if failed.is_empty() {
            None
        } else {
            let warning = BrokerError::PartialFailure {
                operation: "claim".to_string(),
                completed: vec!["claim".to_string()],
                failed: failed.into_iter().map(|(step, _)| step).collect(),
            };
            tracing::warn!(name = %record.name, warning = %warning, "claimed without billing tags");
            Some(warning)
        };

        Ok(ClaimOutcome {
            name: record.name,
            connection,
            warning,
        })
    }

    /// Tag the cluster and instance behind `name`. Unknown names are rejected
    /// before any cloud call.
    pub async fn tag(&self, name: &str, key: &str, value: &str) -> Result<(), BrokerError> {
        require("resource", name)?;
        require("name", key)?;
        require("value", value)?;

        let known = self
            .store
            .get(name)
            .await?
            .is_some_and(|r| r.state != InstanceState::Deleting);
        if !known {
            return Err(BrokerError::NotFound(name.to_string()));
        }

        match self.tag_both(name, key, value, true).await.into_iter().next() {
            Some((_, err)) => Err(err),
            None => {
                tracing::info!(name, key, "tag added");
                Ok(())
            }
        }
    }

    /// Apply one tag to the cluster, then the instance. Returns the failed
    /// steps; with `stop_on_error` nothing is attempted after the first one.
    async fn tag_both(
        &self,
        name: &str,
        key: &str,
        value: &str,
        stop_on_error: bool,
    ) -> Vec<(String, BrokerError)> {
        let targets = [
            ("tag_cluster", ResourceRef::Cluster(name.to_string())),
            ("tag_instance", ResourceRef::Instance(name.to_string())),
        ];
        let mut failed = Vec::new();
        for (step, resource) in targets {
            if let Err(e) = self.resources.tag_resource(&resource, key, value).await {
                tracing::warn!(name, step, error = %e, "tagging failed");
                failed.push((step.to_string(), BrokerError::upstream(step, e)));
                if stop_on_error {
                    break;
                }
            }
        }
        failed
    }
}
