use super::{PoolStore, StoreError, StoreResult, TeardownTask};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use neptune_common::{Credential, InstanceRecord, InstanceState, PREPROVISIONED_BILLING_CODE};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

// `claimed` column values.
const CLAIMED_NO: &str = "no";
const CLAIMED_YES: &str = "yes";
const CLAIMED_DELETING: &str = "deleting";

const RECORD_COLUMNS: &str =
    "name, plan, claimed, makedate, billingcode, endpoint, accesskey, secretkey";

/// Create and configure the broker's connection pool.
pub async fn create_pool(database_url: &str) -> Result<Pool<Postgres>, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .max_lifetime(Duration::from_secs(60 * 60))
        .connect(database_url)
        .await
}

#[derive(Debug, sqlx::FromRow)]
struct ProvisionRow {
    name: String,
    plan: Option<String>,
    claimed: Option<String>,
    makedate: Option<NaiveDateTime>,
    billingcode: Option<String>,
    endpoint: Option<String>,
    accesskey: Option<String>,
    secretkey: Option<String>,
}

/// Derive the lifecycle state from the `provision` columns.
pub(crate) fn state_from_columns(claimed: &str, has_endpoint: bool, has_credential: bool) -> InstanceState {
    match claimed {
        CLAIMED_DELETING => InstanceState::Deleting,
        CLAIMED_YES => InstanceState::Claimed,
        _ if has_endpoint && has_credential => InstanceState::Available,
        _ => InstanceState::Provisioning,
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

impl From<ProvisionRow> for InstanceRecord {
    fn from(row: ProvisionRow) -> Self {
        let endpoint = non_empty(row.endpoint);
        let credential = match (non_empty(row.accesskey), non_empty(row.secretkey)) {
            (Some(ak), Some(sk)) => Some(Credential::new(ak, sk)),
            _ => None,
        };
        let state = state_from_columns(
            row.claimed.as_deref().unwrap_or(CLAIMED_NO),
            endpoint.is_some(),
            credential.is_some(),
        );
        let billing_code =
            non_empty(row.billingcode).filter(|code| code != PREPROVISIONED_BILLING_CODE);
        InstanceRecord {
            name: row.name,
            plan: row.plan.unwrap_or_default(),
            state,
            created_at: row
                .makedate
                .map(|d| d.and_utc())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            billing_code,
            endpoint,
            credential,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TeardownRow {
    name: String,
    instance_deleted: bool,
    cluster_deleted: bool,
    record_removed: bool,
    credential_revoked: bool,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TeardownRow> for TeardownTask {
    fn from(row: TeardownRow) -> Self {
        TeardownTask {
            name: row.name,
            instance_deleted: row.instance_deleted,
            cluster_deleted: row.cluster_deleted,
            record_removed: row.record_removed,
            credential_revoked: row.credential_revoked,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub struct PgPoolStore {
    db: Pool<Postgres>,
}

impl PgPoolStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.db
    }
}

#[async_trait]
impl PoolStore for PgPoolStore {
    async fn insert(&self, record: &InstanceRecord, cluster_resource_id: Option<&str>) -> StoreResult<()> {
        let (accesskey, secretkey) = record
            .credential
            .as_ref()
            .map(|c| (c.access_key_id.as_str(), c.secret_access_key.as_str()))
            .unwrap_or(("", ""));

        let mut tx = self.db.begin().await?;
        let res = sqlx::query(
            "INSERT INTO provision (name, plan, claimed, makedate, billingcode, endpoint, accesskey, secretkey)
             VALUES ($1, $2, $3, $4, $5, '', $6, $7)",
        )
        .bind(&record.name)
        .bind(&record.plan)
        .bind(CLAIMED_NO)
        .bind(record.created_at.naive_utc())
        .bind(PREPROVISIONED_BILLING_CODE)
        .bind(accesskey)
        .bind(secretkey)
        .execute(&mut *tx)
        .await;
        if let Err(e) = res {
            if is_unique_violation(&e) {
                return Err(StoreError::Duplicate(record.name.clone()));
            }
            return Err(e.into());
        }

        if let Some(resource_id) = cluster_resource_id {
            sqlx::query("INSERT INTO provision_resources (name, cluster_resource_id) VALUES ($1, $2)")
                .bind(&record.name)
                .bind(resource_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> StoreResult<Option<InstanceRecord>> {
        let row: Option<ProvisionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM provision WHERE name = $1",
            RECORD_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(InstanceRecord::from))
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM provision WHERE name = $1)")
                .bind(name)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn count_capacity(&self, plan: &str) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM provision WHERE plan = $1 AND claimed = $2")
                .bind(plan)
                .bind(CLAIMED_NO)
                .fetch_one(&self.db)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn pending_endpoints(&self) -> StoreResult<Vec<InstanceRecord>> {
        let rows: Vec<ProvisionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM provision
             WHERE claimed = $1 AND COALESCE(endpoint, '') = ''
             ORDER BY makedate ASC",
            RECORD_COLUMNS
        ))
        .bind(CLAIMED_NO)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(InstanceRecord::from).collect())
    }

    async fn awaiting_credentials(&self) -> StoreResult<Vec<InstanceRecord>> {
        let rows: Vec<ProvisionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM provision
             WHERE claimed = $1
               AND (COALESCE(accesskey, '') = '' OR COALESCE(secretkey, '') = '')
             ORDER BY makedate ASC",
            RECORD_COLUMNS
        ))
        .bind(CLAIMED_NO)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(InstanceRecord::from).collect())
    }

    async fn cluster_resource_id(&self, name: &str) -> StoreResult<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT cluster_resource_id FROM provision_resources WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.db)
                .await?;
        Ok(id)
    }

    async fn set_endpoint(&self, name: &str, endpoint: &str) -> StoreResult<bool> {
        if endpoint.is_empty() {
            return Ok(false);
        }
        let res = sqlx::query(
            "UPDATE provision SET endpoint = $2
             WHERE name = $1 AND claimed = $3 AND COALESCE(endpoint, '') = ''",
        )
        .bind(name)
        .bind(endpoint)
        .bind(CLAIMED_NO)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_credential(&self, name: &str, credential: &Credential) -> StoreResult<bool> {
        if !credential.is_complete() {
            return Ok(false);
        }
        let res = sqlx::query(
            "UPDATE provision SET accesskey = $2, secretkey = $3
             WHERE name = $1 AND claimed = $4",
        )
        .bind(name)
        .bind(&credential.access_key_id)
        .bind(&credential.secret_access_key)
        .bind(CLAIMED_NO)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn claim_oldest(&self, plan: &str, billing_code: &str) -> StoreResult<Option<InstanceRecord>> {
        // Selection and transition in one statement. SKIP LOCKED lets a
        // concurrent claimant move on to the next candidate instead of
        // waiting for (and then losing) the same row.
        let row: Option<ProvisionRow> = sqlx::query_as(&format!(
            "UPDATE provision
             SET claimed = $3, billingcode = $2
             WHERE name = (
                 SELECT name FROM provision
                 WHERE plan = $1
                   AND claimed = $4
                   AND COALESCE(endpoint, '') <> ''
                   AND COALESCE(accesskey, '') <> ''
                   AND COALESCE(secretkey, '') <> ''
                 ORDER BY makedate ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             AND claimed = $4
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(plan)
        .bind(billing_code)
        .bind(CLAIMED_YES)
        .bind(CLAIMED_NO)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(InstanceRecord::from))
    }

    async fn mark_deleting(&self, name: &str) -> StoreResult<Option<InstanceRecord>> {
        let mut tx = self.db.begin().await?;
        let row: Option<ProvisionRow> = sqlx::query_as(
            "WITH prev AS (
                 SELECT name, plan, claimed, makedate, billingcode, endpoint, accesskey, secretkey
                 FROM provision
                 WHERE name = $1 AND claimed IS DISTINCT FROM $2
                 FOR UPDATE
             )
             UPDATE provision p
             SET claimed = $2
             FROM prev
             WHERE p.name = prev.name
             RETURNING prev.name, prev.plan, prev.claimed, prev.makedate, prev.billingcode,
                       prev.endpoint, prev.accesskey, prev.secretkey",
        )
        .bind(name)
        .bind(CLAIMED_DELETING)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        // Queued with the transition so an interrupted delete is still swept.
        sqlx::query(
            "INSERT INTO teardown_tasks (name, created_at, updated_at)
             VALUES ($1, NOW(), NOW())
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(InstanceRecord::from(row)))
    }

    async fn remove(&self, name: &str) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM provision WHERE name = $1")
            .bind(name)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn save_teardown(&self, task: &TeardownTask) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO teardown_tasks
                (name, instance_deleted, cluster_deleted, record_removed, credential_revoked,
                 attempts, last_error, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
             ON CONFLICT (name) DO UPDATE SET
                instance_deleted = EXCLUDED.instance_deleted,
                cluster_deleted = EXCLUDED.cluster_deleted,
                record_removed = EXCLUDED.record_removed,
                credential_revoked = EXCLUDED.credential_revoked,
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                updated_at = NOW()",
        )
        .bind(&task.name)
        .bind(task.instance_deleted)
        .bind(task.cluster_deleted)
        .bind(task.record_removed)
        .bind(task.credential_revoked)
        .bind(task.attempts)
        .bind(task.last_error.as_deref())
        .bind(task.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn pending_teardowns(&self) -> StoreResult<Vec<TeardownTask>> {
        let rows: Vec<TeardownRow> = sqlx::query_as(
            "SELECT name, instance_deleted, cluster_deleted, record_removed, credential_revoked,
                    attempts, last_error, created_at
             FROM teardown_tasks
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(TeardownTask::from).collect())
    }

    async fn remove_teardown(&self, name: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM teardown_tasks WHERE name = $1")
            .bind(name)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
