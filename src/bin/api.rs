use std::sync::Arc;
use stock_query_agent::{
    api::start_server, config::AgentConfig, controller::LoopController, session::SessionStore,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("初始化失败：{}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error>);
        }
    };

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Stock Query Agent - API Server");
    info!("Port: {}", api_port);

    let sessions = Arc::new(SessionStore::from_env());
    let controller = Arc::new(LoopController::from_config(&config, sessions));

    info!("Controller initialized");
    info!("Starting API server...");

    start_server(controller, api_port).await?;

    Ok(())
}
