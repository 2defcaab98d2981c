use ledger_backend::config::Config;
use ledger_backend::errors::ApiError;
use ledger_backend::state::{load_or_create_oracle_key, AppState};
use ledger_backend::{api, db};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    // Local state lives under DATA_DIR (ignored by git).
    std::fs::create_dir_all(&config.data_dir).map_err(|_| ApiError::Internal)?;

    let db = db::connect(&config.db_url(), config.db_max_connections).await?;
    db::init_schema(&db).await?;

    let oracle_key = load_or_create_oracle_key(config.keys_dir()).await?;
    let addr = config.addr.clone();

    let (state, deliveries) = AppState::new(db, config, oracle_key);
    let _workers = state.start_workers(deliveries);

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|_| ApiError::Internal)?;

    tracing::info!(%addr, "sentencing ledger listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
