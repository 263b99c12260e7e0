use sqlx::{Pool, Postgres};

/// Schema for the pool. `provision` is shared with other tooling and must
/// keep this exact shape; the broker's own bookkeeping lives in separate
/// tables keyed by the same name.
const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS provision (
        name character varying(200) PRIMARY KEY,
        plan character varying(200),
        claimed character varying(200),
        makeDate timestamp without time zone DEFAULT now(),
        billingcode character varying(200),
        endpoint character varying(200),
        accesskey character varying(200),
        secretkey character varying(200)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS name_pkey ON provision(name text_ops);

    CREATE TABLE IF NOT EXISTS provision_resources (
        name character varying(200) PRIMARY KEY REFERENCES provision(name) ON DELETE CASCADE,
        cluster_resource_id character varying(200) NOT NULL
    );

    CREATE TABLE IF NOT EXISTS teardown_tasks (
        name character varying(200) PRIMARY KEY,
        instance_deleted boolean NOT NULL DEFAULT false,
        cluster_deleted boolean NOT NULL DEFAULT false,
        record_removed boolean NOT NULL DEFAULT false,
        credential_revoked boolean NOT NULL DEFAULT false,
        attempts integer NOT NULL DEFAULT 0,
        last_error text,
        created_at timestamptz NOT NULL DEFAULT now(),
        updated_at timestamptz NOT NULL DEFAULT now()
    );
"#;

/// Split the schema into individual statements (the simple query protocol
/// used by `execute` takes one statement at a time).
fn statements() -> impl Iterator<Item = &'static str> {
    SCHEMA_SQL.split(';').map(str::trim).filter(|s| !s.is_empty())
}

pub async fn run_inline_migrations(pool: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    tracing::info!("running inline schema migrations");
    for stmt in statements() {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_every_table() {
        let stmts: Vec<&str> = statements().collect();
        assert_eq!(stmts.len(), 4);
        assert!(stmts[0].starts_with("CREATE TABLE IF NOT EXISTS provision ("));
        assert!(stmts.iter().any(|s| s.contains("teardown_tasks")));
        assert!(stmts.iter().any(|s| s.contains("provision_resources")));
    }
}
