use clap::Parser;
use client_coach::cli::Args;
use dotenv::dotenv;
use log::error;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = client_coach::run(args).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
