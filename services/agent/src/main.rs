use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meditation_agent::openai::OpenAiProvider;
use meditation_agent::{AppState, Config, prompt_loader, serve};
use meditation_core::instructions::PERSONA;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Voice agent that guides meditation sessions over WebSocket")]
struct Cli {
    /// Address to listen on. Overrides BIND_ADDRESS.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting meditation agent...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    let bind_address = args.bind.unwrap_or_else(|| config.bind_address.clone());

    // --- 4. Load Prompts ---
    let persona = prompt_loader::resolve_persona(config.prompts_dir.as_deref(), PERSONA)
        .context("Failed to load prompts")?;

    // --- 5. Initialize API Clients ---
    let provider =
        OpenAiProvider::from_config(&config).context("Failed to initialize OpenAI provider")?;

    // --- 6. Serve ---
    let state = AppState::new(
        Arc::new(provider),
        config.session_config(&persona),
        config.input_sample_rate,
    );
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    serve(listener, state, shutdown_signal()).await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
