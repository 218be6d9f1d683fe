use construction_finance_assistant::{
    agent::{Orchestrator, OrchestratorSettings},
    api::start_server,
    config::AppConfig,
    gateway,
    llm::OpenRouterClient,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    if config.model.api_key.is_empty() {
        warn!("OPENROUTER_API_KEY not set; chat requests will fail");
    }

    info!("Construction Finance Assistant - API Server");
    info!(port = config.server.port, model = %config.model.model, "Configuration loaded");

    // Create components
    let gateway = gateway::from_config(&config.gateway)?;
    let model = Arc::new(OpenRouterClient::new(&config.model)?);
    let registry = create_default_registry();

    let orchestrator = Arc::new(Orchestrator::new(
        model,
        registry,
        gateway,
        OrchestratorSettings::from(&config),
    ));

    info!("Orchestrator initialized");

    start_server(orchestrator, config.server.port).await?;

    Ok(())
}
