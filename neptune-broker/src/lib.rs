//! Pool broker for pre-provisioned Neptune instances.
//!
//! Every operation takes the explicit [`Broker`] context: the pool store, the
//! two cloud API clients and the settings they were configured with.

use std::sync::Arc;

use neptune_common::PlanCatalog;
use neptune_providers::{IdentityApi, ResourceLifecycle};

pub mod availability;
pub mod claim;
pub mod credentials;
pub mod migrations;
pub mod preprovision_job;
pub mod provider_manager;
pub mod provisioning;
pub mod settings;
pub mod store;
pub mod teardown;

pub use availability::Availability;
pub use claim::ClaimOutcome;
pub use provisioning::ProvisionOutcome;
pub use settings::{BrokerSettings, ConfigError, Mode, ProvisioningSettings, Settings};
pub use store::{MemoryPoolStore, PgPoolStore, PoolStore, StoreError, TeardownTask};
pub use teardown::{StepStatus, TeardownReport, TeardownStep};

#[derive(Clone)]
pub struct Broker {
    pub store: Arc<dyn PoolStore>,
    pub resources: Arc<dyn ResourceLifecycle>,
    pub identity: Arc<dyn IdentityApi>,
    pub settings: Arc<BrokerSettings>,
    pub plans: Arc<PlanCatalog>,
}

impl Broker {
    pub fn new(
        store: Arc<dyn PoolStore>,
        resources: Arc<dyn ResourceLifecycle>,
        identity: Arc<dyn IdentityApi>,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            store,
            resources,
            identity,
            settings: Arc::new(settings),
            plans: Arc::new(PlanCatalog::default()),
        }
    }

    pub fn with_plans(mut self, plans: PlanCatalog) -> Self {
        self.plans = Arc::new(plans);
        self
    }

    pub fn region(&self) -> &str {
        &self.settings.region
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }
}
