use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tidecord_gateway::Client;
use tracing_subscriber::EnvFilter;

mod bot;
mod cli;
mod config;

const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tidecord=info")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;
    // CLI --token overrides config file and environment
    if let Some(token) = args.token {
        config.bot.token = Some(token);
    }
    let token = config.token()?.to_string();

    let bot = bot::Bot::new(&config.bot.prefix, &config.voice.ffmpeg, config.join_timeout());
    let client = Client::builder()
        .token(token)
        .config(config.client_config())
        .handler(bot.clone())
        .build()?;

    client.start()?;
    if !client.wait_until_ready(READY_TIMEOUT).await {
        tracing::warn!("Gateway not ready after {:?}, still trying", READY_TIMEOUT);
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("Shutting down");
        }
        _ = client.join() => {
            tracing::error!("Gateway connection stopped");
        }
    }

    client.stop();
    tokio::task::spawn_blocking(move || bot.shutdown()).await?;
    client.join().await;
    Ok(())
}
