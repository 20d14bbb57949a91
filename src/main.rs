use anyhow::Context;
use tracing_subscriber::EnvFilter;

use personal_finance::app::{AppState, build_router};
use personal_finance::config::Config;
use personal_finance::constants::DEFAULT_LOG_FILTER;
use personal_finance::database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let main_db = database::init_main_db(&config.data_path)
        .await
        .context("failed to initialize main DB")?;

    let state = AppState::new(main_db, &config);
    let app = build_router(state, &config)?;

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "server running");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
