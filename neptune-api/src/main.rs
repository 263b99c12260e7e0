use std::process::ExitCode;
use std::sync::Arc;

use neptune_api::app::{create_cors, create_timeout, AppState};
use neptune_api::routes::create_router;
use neptune_broker::migrations::run_inline_migrations;
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
            tracing::error!(error = %e, "neptune-api stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = Settings::from_env(Mode::Api)?;

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
    let state = AppState::new(broker);

    let app = create_router()
        .layer(create_timeout())
        .layer(create_cors())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.api_bind).await?;
    tracing::info!(addr = %settings.api_bind, "neptune-api listening");
    axum::serve(listener, app).await?;
    Ok(())
}
