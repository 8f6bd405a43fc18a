mod assets;
mod config;
mod encoder;
mod image_gen;
mod models;
mod openai;
mod pipeline;
mod recommendation;
mod routes;

use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = config::get().clone();
    match config.masked_key() {
        Some(masked) => tracing::info!("✅ API key loaded from environment: {}", masked),
        None => tracing::warn!("⚠️ OPENAI_API_KEY not set; users must enter a key in the form"),
    }
    tracing::info!("Using chat model {} and image model {}", config.chat_model, config.image_model);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config)?);

    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
