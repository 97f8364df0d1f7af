use financial_search_orchestrator::{
    config::Config,
    engine::SearchEngine,
    models::{Query, QueryMode, StreamEvent},
};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    dotenv::dotenv().ok();

    info!("Financial Search Orchestrator starting");

    let config = Config::from_env();
    let engine = SearchEngine::from_config(config)?;

    let query = Query::new(
        "What is the latest news about NVDA and how has the stock been doing?",
        QueryMode::Sonar,
    );

    info!(query = %query.text, "Running streaming search");

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let run = tokio::spawn(async move { engine.run_streaming(query, tx).await });

    while let Some(event) = rx.recv().await {
        match &event {
            StreamEvent::Status { content, .. } => println!("[status] {}", content),
            StreamEvent::Result {
                content,
                sources,
                session_id,
            } => {
                println!("\n=== ANSWER ===");
                println!("{}", content);
                if !sources.is_empty() {
                    println!("\nSources:");
                    for (i, source) in sources.iter().enumerate() {
                        println!(
                            "  {}: {} ({})",
                            i + 1,
                            source.title.as_deref().unwrap_or("untitled"),
                            source.url.as_deref().unwrap_or("no url")
                        );
                    }
                }
                if let Some(session_id) = session_id {
                    println!("\nSession: {}", session_id);
                }
            }
            StreamEvent::Error { content, .. } => eprintln!("[error] {}", content),
        }
    }

    run.await??;
    Ok(())
}
