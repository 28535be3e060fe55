use expense_agent_orchestrator::{
    api::start_server, chat::ChatService, config::ChatConfig, store::build_store,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Expense Agent Orchestrator - API Server");
    info!("Port: {}", api_port);

    // Create components
    let store = build_store();
    let registry = Arc::new(create_default_registry(store.clone()));

    let config = ChatConfig::from_env();
    let chat = Arc::new(ChatService::new(&config, registry));

    info!(chat_enabled = chat.is_enabled(), "Components initialized");

    // Start API server
    start_server(store, chat, api_port).await?;

    Ok(())
}
