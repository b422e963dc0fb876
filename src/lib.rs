pub mod cli;
pub mod coach;
pub mod config;
pub mod llm;
pub mod models;
pub mod relay;
pub mod repl;
pub mod server;
pub mod session;

use cli::Args;
use coach::Coach;
use config::Settings;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use tokio::io::BufReader;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let settings = Settings::from_args(&args)?;

    info!("--- Core Configuration ---");
    info!("Persona: {}", settings.persona.name);
    info!("Chat LLM Type: {}", settings.llm.llm_type);
    info!("Chat Model: {}", settings.llm.model());
    info!("Chat Base URL: {}", settings.llm.base_url());
    info!("Interactive: {}", args.interactive);
    if !args.interactive {
        info!("Server Address: {}", args.server_addr);
        info!("TLS Enabled: {}", args.enable_tls);
    }
    info!("-------------------------");

    let coach = Arc::new(Coach::from_settings(&settings)?);

    if args.interactive {
        return repl::run_repl(&coach, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await;
    }

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, coach, args.server_api_key.clone(), args.clone());
    server.run().await?;

    Ok(())
}
