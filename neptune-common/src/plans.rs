use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::BrokerError;

/// A sizing tier offered by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Plan {
    pub name: String,
    pub description: String,
    pub instance_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    plans: BTreeMap<String, Plan>,
}

impl PlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Plan> {
        self.plans.get(name)
    }

    /// Resolve a plan name, rejecting empty or unknown names.
    pub fn resolve(&self, name: &str) -> Result<&Plan, BrokerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BrokerError::validation("plan is required"));
        }
        self.get(name)
            .ok_or_else(|| BrokerError::validation(format!("unknown plan '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }

    /// name -> description, the shape served by the plans endpoint.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.plans
            .values()
            .map(|p| (p.name.clone(), p.description.clone()))
            .collect()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new([Plan {
            name: "small".to_string(),
            description: "Small DB Instance - 2vCPU, 15.25 GiB RAM - $245/mo".to_string(),
            instance_class: "db.r4.large".to_string(),
        }])
    }
}
