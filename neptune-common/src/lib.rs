use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod plans;

pub use error::BrokerError;
pub use plans::{Plan, PlanCatalog};

/// Billing code stored on records that nobody has claimed yet.
pub const PREPROVISIONED_BILLING_CODE: &str = "preprovisioned";

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Provisioning, // Cloud resources requested, endpoint (or credential) not yet known
    Available,    // Ready and unclaimed
    Claimed,      // Handed to a consumer
    Deleting,     // Teardown in progress
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Provisioning => "provisioning",
            InstanceState::Available => "available",
            InstanceState::Claimed => "claimed",
            InstanceState::Deleting => "deleting",
        }
    }

    /// Provisioning and Available records count toward a plan's minimum.
    pub fn counts_as_capacity(&self) -> bool {
        matches!(self, InstanceState::Provisioning | InstanceState::Available)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Entities ---

/// Access key pair scoped to a single instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credential {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

// Never print the secret half.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub name: String,
    pub plan: String,
    pub state: InstanceState,
    pub created_at: DateTime<Utc>,
    pub billing_code: Option<String>,
    pub endpoint: Option<String>,
    pub credential: Option<Credential>,
}

impl InstanceRecord {
    /// A freshly provisioned record. Without a credential it stays in the
    /// awaiting-credential part of `Provisioning` until one is issued.
    pub fn provisioning(
        name: impl Into<String>,
        plan: impl Into<String>,
        created_at: DateTime<Utc>,
        credential: Option<Credential>,
    ) -> Self {
        Self {
            name: name.into(),
            plan: plan.into(),
            state: InstanceState::Provisioning,
            created_at,
            billing_code: None,
            endpoint: None,
            credential: credential.filter(Credential::is_complete),
        }
    }

    pub fn has_endpoint(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn has_credential(&self) -> bool {
        self.credential.as_ref().is_some_and(Credential::is_complete)
    }

    pub fn awaiting_credential(&self) -> bool {
        self.state == InstanceState::Provisioning && !self.has_credential()
    }

    /// State implied by the record's fields for anything not yet claimed or
    /// being deleted. Used after endpoint/credential updates.
    pub fn derived_unclaimed_state(&self) -> InstanceState {
        if self.has_endpoint() && self.has_credential() {
            InstanceState::Available
        } else {
            InstanceState::Provisioning
        }
    }

    /// Connection details, only once the record is fully usable.
    pub fn connection_info(&self, region: &str) -> Option<ConnectionInfo> {
        let endpoint = self.endpoint.as_deref().filter(|e| !e.is_empty())?;
        let credential = self.credential.as_ref().filter(|c| c.is_complete())?;
        Some(ConnectionInfo {
            database_url: endpoint.to_string(),
            access_key: credential.access_key_id.clone(),
            secret_key: credential.secret_access_key.clone(),
            region: region.to_string(),
        })
    }
}

/// What a claimant needs to connect. Field names follow the environment
/// variables consumers bind them to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ConnectionInfo {
    #[serde(rename = "NEPTUNE_DATABASE_URL")]
    pub database_url: String,
    #[serde(rename = "NEPTUNE_ACCESS_KEY")]
    pub access_key: String,
    #[serde(rename = "NEPTUNE_SECRET_KEY")]
    pub secret_key: String,
    #[serde(rename = "NEPTUNE_REGION")]
    pub region: String,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("database_url", &self.database_url)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}
