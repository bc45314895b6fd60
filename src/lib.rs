pub mod analyzer;
pub mod cli;
pub mod config;
pub mod errors;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;
pub mod workspace;

#[cfg(test)]
pub mod test_utils;

use analyzer::Analyzer;
use cli::Args;
use config::tools::load_tools;
use llm::chat::new_client;
use llm::LlmConfig;
use log::{ info, warn };
use server::api::AppState;
use server::Server;
use session::identity::FirebaseIdentityProvider;
use session::SessionKeys;
use std::error::Error;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const WORKSPACE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat Model Override: {}", args.chat_model.as_deref().unwrap_or("none"));
    info!("Chat Timeout: {}", args.chat_timeout_secs.map_or("none".to_string(), |s| format!("{}s", s)));
    info!("Tools Path: {}", args.tools_path.as_deref().unwrap_or("built-in"));
    info!("Max Upload Bytes: {}", args.max_upload_bytes);
    info!("Analyze Rate Limit: {}/s", args.analyze_rate_limit);
    info!("Session TTL: {}s", args.session_ttl_secs);
    info!("Secure Cookies: {}", args.session_cookie_secure);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let tools = load_tools(args.tools_path.as_deref())?;
    info!("Loaded {} tool(s)", tools.iter().count());

    let chat_client = new_client(
        &(LlmConfig {
            api_key: Some(args.chat_api_key.clone()).filter(|k| !k.trim().is_empty()),
            model_override: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
            timeout: args.chat_timeout_secs.map(Duration::from_secs),
        })
    )?;
    info!("Chat client ready at {}", chat_client.get_base_url());

    let secret = match args.session_secret.clone().filter(|s| !s.is_empty()) {
        Some(secret) => secret,
        None => {
            warn!("SESSION_SECRET is not set. Using a random key; sessions end on restart.");
            format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
        }
    };
    let session_keys = SessionKeys::new(secret, args.session_ttl_secs, args.session_cookie_secure);

    let identity = Arc::new(
        FirebaseIdentityProvider::new(args.firebase_api_key.clone(), args.identity_base_url.clone())
    );

    let rate_limit = NonZeroU32::new(args.analyze_rate_limit).ok_or(
        "ANALYZE_RATE_LIMIT must be greater than zero"
    )?;

    let state = AppState::new(
        Analyzer::new(chat_client),
        tools,
        identity,
        session_keys,
        rate_limit,
        args.max_upload_bytes
    );

    Arc::clone(&state.workspaces).spawn_sweeper(WORKSPACE_SWEEP_INTERVAL);

    let addr = args.server_addr.clone();
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
