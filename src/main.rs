use std::sync::Arc;

use tracing_subscriber::EnvFilter;

mod agent;
mod ai;
mod billing;
mod bot;
mod config;
mod db;
mod server;

use config::AppConfig;
use db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("🦀 Starting OpenClaw gateway...");

    // Load config
    let config = AppConfig::from_env()?;
    tracing::info!("Config loaded. Public URL: {}", config.app_url);

    // Initialize database
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;
    tracing::info!("Database connected and migrations applied.");

    // One connection pool for every upstream API
    let client = reqwest::Client::builder()
        .user_agent(concat!("openclaw-gateway/", env!("CARGO_PKG_VERSION")))
        .build()?;

    // Build shared application state
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(server::AppState::new(config, Arc::new(db), client)?);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
    }
    tracing::info!("Shutting down.");
}
