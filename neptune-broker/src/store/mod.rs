use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neptune_common::{BrokerError, Credential, InstanceRecord};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryPoolStore;
pub use postgres::PgPoolStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance name '{0}' already exists")]
    Duplicate(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for BrokerError {
    fn from(e: StoreError) -> Self {
        BrokerError::store(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Teardown steps still owed for an instance whose delete did not fully
/// succeed. Re-driven by the scheduled sweep until every flag is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownTask {
    pub name: String,
    pub instance_deleted: bool,
    pub cluster_deleted: bool,
    pub record_removed: bool,
    pub credential_revoked: bool,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TeardownTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_deleted: false,
            cluster_deleted: false,
            record_removed: false,
            credential_revoked: false,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.instance_deleted && self.cluster_deleted && self.record_removed && self.credential_revoked
    }
}

/// Persistent pool records. The only shared mutable state in the system.
///
/// State transitions that other actors may race on (claim, mark deleting,
/// endpoint/credential population) are single conditional writes.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Insert a new `Provisioning` record, remembering the cluster's internal
    /// resource id when known. Fails with [`StoreError::Duplicate`] if the
    /// name is taken.
    async fn insert(&self, record: &InstanceRecord, cluster_resource_id: Option<&str>) -> StoreResult<()>;

    /// Any record, including ones being deleted.
    async fn get(&self, name: &str) -> StoreResult<Option<InstanceRecord>>;
    async fn exists(&self, name: &str) -> StoreResult<bool>;

    /// Records of `plan` that are Provisioning or Available.
    async fn count_capacity(&self, plan: &str) -> StoreResult<u64>;

    /// Unclaimed records with no endpoint yet, oldest first.
    async fn pending_endpoints(&self) -> StoreResult<Vec<InstanceRecord>>;

    /// Unclaimed records whose credential was never issued, oldest first.
    async fn awaiting_credentials(&self) -> StoreResult<Vec<InstanceRecord>>;

    async fn cluster_resource_id(&self, name: &str) -> StoreResult<Option<String>>;

    /// Persist the endpoint if the record is unclaimed and has none yet.
    async fn set_endpoint(&self, name: &str, endpoint: &str) -> StoreResult<bool>;

    /// Persist the credential if the record is unclaimed.
    async fn set_credential(&self, name: &str, credential: &Credential) -> StoreResult<bool>;

    /// Atomically move the oldest Available record of `plan` to Claimed and
    /// return it. `None` when nothing is claimable.
    async fn claim_oldest(&self, plan: &str, billing_code: &str) -> StoreResult<Option<InstanceRecord>>;

    /// Move a record to Deleting unless it already is, and queue an empty
    /// [`TeardownTask`] for it in the same write. Returns the record as it
    /// was before the transition; `None` if missing or already deleting.
    async fn mark_deleting(&self, name: &str) -> StoreResult<Option<InstanceRecord>>;

    async fn remove(&self, name: &str) -> StoreResult<bool>;

    async fn save_teardown(&self, task: &TeardownTask) -> StoreResult<()>;
    async fn pending_teardowns(&self) -> StoreResult<Vec<TeardownTask>>;
    async fn remove_teardown(&self, name: &str) -> StoreResult<()>;
}
