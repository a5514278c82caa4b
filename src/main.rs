use anyhow::Result;
use script_intake::{
    AppState, build_router,
    config::{AppConfig, RunMode},
    db,
    services::{content_store::ContentStore, storage_service::StorageService},
};
use std::{fs, io::ErrorKind, path::Path};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;
    tracing::info!(?mode, "starting script-intake with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Database ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    match mode {
        RunMode::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        RunMode::Seed => {
            let count = db::seed_roster(pool.clone()).await?;
            tracing::info!(count, "Demo roster seeded.");
            return Ok(());
        }
        RunMode::Serve => {}
    }

    // --- Content store bucket ---
    StorageService::new(pool.clone(), &cfg.storage_dir, &cfg.bucket)
        .ensure_bucket()
        .await?;

    // --- Build router ---
    let state = AppState::from_config(&cfg, pool)?;
    let scripts = state.scripts.clone();
    let app = build_router(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Waiting for in-flight extractions to finish");
    scripts.wait_for_background().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
