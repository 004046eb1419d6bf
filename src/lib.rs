pub mod models;
pub mod server;
pub mod llm;
pub mod cli;
pub mod history;
pub mod session;

use cli::Args;
use history::initialize_history_store;
use llm::{ LlmConfig, LlmType };
use llm::chat::new_client;
use log::info;
use server::Server;
use server::api::AppState;
use server::completion::RelayConfig;
use std::error::Error;
use std::time::Duration;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Base URL: {}", args.chat_base_url.as_deref().unwrap_or("<provider default>"));
    info!("Generation API key present: {}", !args.chat_api_key.trim().is_empty());
    info!("Default Model: {}", args.default_model);
    info!("Max Tokens: {}", args.max_tokens);
    info!("Max Duration: {}s", args.max_duration_secs);
    info!("History Store Type: {}", args.history_type);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let llm_type: LlmType = args.chat_llm_type.parse()?;
    let llm_config = LlmConfig {
        llm_type,
        api_key: Some(args.chat_api_key.clone()).filter(|k| !k.trim().is_empty()),
        base_url: args.chat_base_url.clone(),
        request_timeout: Duration::from_secs(args.max_duration_secs),
    };
    let chat = new_client(&llm_config)?;
    info!("Generation provider ready: {:?}", chat.provider());
    let history = initialize_history_store(&args)?;

    let state = AppState {
        chat,
        history,
        relay: RelayConfig::from_args(&args),
    };

    let server = Server::new(args.server_addr.clone(), state, args.clone());
    server.run().await?;

    Ok(())
}
