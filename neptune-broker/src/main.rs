use std::process::ExitCode;
use std::sync::Arc;

use neptune_broker::migrations::run_inline_migrations;
use neptune_broker::preprovision_job;
use neptune_broker::provider_manager::ProviderManager;
use neptune_broker::store::postgres::create_pool;
use neptune_broker::{Broker, Mode, PgPoolStore, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "preprovision failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = Settings::from_env(Mode::Preprovision)?;

    let pool = create_pool(&settings.database_url).await?;
    run_inline_migrations(&pool).await?;
    tracing::info!("connected to broker database");

    let (resources, identity) = ProviderManager::get_providers(&settings).await?;
    let broker = Broker::new(
        Arc::new(PgPoolStore::new(pool)),
        resources,
        identity,
        settings.broker.clone(),
    );

    if settings.run_as_cron {
        preprovision_job::run(broker, settings.provision_interval).await;
    } else {
        let summary = preprovision_job::run_pass(&broker).await;
        tracing::info!(
            created = ?summary.created,
            endpoints = summary.endpoints_recorded,
            credentials = summary.credentials_issued,
            teardowns = summary.teardowns_finished,
            errors = summary.errors,
            "preprovision pass complete"
        );
    }
    Ok(())
}
