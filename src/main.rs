mod cards;
mod chat;
mod config;
mod entity;
mod event_log;
mod runner;
mod session;
mod utils;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::Config::load()?;

    let log = event_log::EventLog::open(&config.db_path)
        .await
        .context("Failed to open event log")?;

    info!("Initializing runner...");
    let session_id = config.session_id.clone();
    let runner = runner::create_runner(config)?;
    runner.create_session(&session_id).await?;
    let saved = log.max_saved_index(&session_id).await?;
    info!("Session {} ready (last saved event: {})", session_id, saved);
    if saved >= 0 {
        warn!(
            "Session {} already has logged events; turns up to index {} of this run will not be logged",
            session_id, saved
        );
    }

    let mut stdout = std::io::stdout();
    chat::run_chat_loop(
        runner.as_ref(),
        &log,
        &session_id,
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
    )
    .await?;

    chat::print_saved_events(&log, &session_id, &mut stdout).await?;

    Ok(())
}
