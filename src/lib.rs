pub mod agent;
pub mod avatar;
pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod repl;
pub mod server;
pub mod session;

use agent::ChatAgent;
use cli::{ Args, Mode };
use config::persona::load_persona;
use log::info;
use server::{ AppState, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Mode: {}", args.mode);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("adapter default"));
    info!("Chat Base URL: {}", args.chat_base_url.as_deref().unwrap_or("adapter default"));
    info!("Gemini API Key: {}", if args.llm_config().api_key.is_some() { "set" } else { "missing" });
    info!("History Size: {}", args.history_size);
    info!("Persona Path: {}", args.persona_path.as_deref().unwrap_or("built-in"));
    info!("Avatar URL: {}", args.avatar_url.as_deref().unwrap_or("none"));
    if args.mode == Mode::Server {
        info!("Server Address: {}", args.server_addr);
        info!("HTTP Port: {:?}", args.http_port);
        info!("TLS Enabled: {}", args.enable_tls);
    }
    info!("-------------------------");

    let persona = load_persona(args.persona_path.as_deref())?;
    let agent = Arc::new(ChatAgent::new(&args.llm_config(), &persona, args.history_size)?);

    match args.mode {
        Mode::Repl => repl::run_repl(agent, persona).await,
        Mode::Server => {
            let avatar = avatar::fetch_avatar_best_effort(args.avatar_url.as_deref()).await;
            let state = AppState {
                agent,
                persona,
                avatar: avatar.map(Arc::new),
            };
            let server = Server::new(args.server_addr.clone(), state, args.clone());
            server.run().await
        }
    }
}
