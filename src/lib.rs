pub mod cli;
pub mod error;
pub mod llm;
pub mod models;
pub mod render;
pub mod server;
pub mod session;

use cli::Args;
use log::{ info, warn };
use server::Server;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Ollama Host: {}", args.ollama_host);
    info!("Default Model: {}", args.default_model);
    info!("Default Temperature: {}", args.default_temperature);
    info!("Default Context Length: {}", args.default_context_length);
    info!(
        "History Turns: {}",
        args.history_turns.map(|n| n.to_string()).unwrap_or_else(|| "all".into())
    );
    info!("Request Timeout: {}s (0 = none)", args.request_timeout_secs);
    info!("HTTP Address: {}", args.http_addr);
    info!("WS Address: {}", args.ws_addr);
    info!("-------------------------");

    args.model_config()?;
    let client = llm::chat::new_client(&args.ollama_host)?;
    match client.list_models().await {
        Ok(models) if models.is_empty() => info!("Model server is reachable but has no models"),
        Ok(models) => info!("Available models: {}", models.join(", ")),
        Err(e) => warn!("Model server not reachable at startup: {}", e),
    }

    let server = Server::new(client, args);
    server.run().await?;

    Ok(())
}
