use financial_search_orchestrator::{api::start_server, config::Config, engine::SearchEngine};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = Config::from_env();
    if config.openai_api_key.is_empty() {
        eprintln!("⚠️  OPENAI_API_KEY not set in .env");
        eprintln!("📌 See .env.example for setup instructions");
    }

    let port = config.port;

    info!("🚀 Financial Search Orchestrator - API Server");
    info!("📍 Port: {}", port);
    info!(
        fast_path = config.enable_fast_path,
        caching = config.enable_caching,
        streaming = config.enable_streaming,
        "Feature flags"
    );

    let engine = Arc::new(SearchEngine::from_config(config)?);

    info!("✅ Search engine initialized");
    info!("📡 Starting API server...");

    start_server(engine, port).await?;

    Ok(())
}
