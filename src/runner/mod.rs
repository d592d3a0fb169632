use crate::config::Config;
use crate::session::{Content, Session};
use anyhow::Result;
use async_trait::async_trait;
use rig::providers::{anthropic, gemini, openai};
pub use rig_runner::RigRunner;
use std::sync::Arc;
use tokio::sync::mpsc;

mod rig_runner;

#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    TextDelta(String),
    Final(String),
    Error(String),
}

/// The agent side of a conversation. The runner owns the authoritative turn
/// list of every session it has seen.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn create_session(&self, session_id: &str) -> Result<()>;

    /// Streams events for one user message. A successful run ends with
    /// exactly one [`RunnerEvent::Final`].
    async fn run(
        &self,
        session_id: &str,
        message: Content,
        tx: mpsc::Sender<RunnerEvent>,
    ) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Session>;
}

pub fn create_runner(config: Config) -> Result<Arc<dyn AgentRunner>> {
    match config.api_provider.as_str() {
        "openai" => {
            let client: openai::CompletionsClient = openai::CompletionsClient::builder()
                .api_key(&config.api_key)
                .base_url(&config.api_url)
                .build()?;
            Ok(RigRunner::new(config, client) as Arc<dyn AgentRunner>)
        }
        "gemini" => {
            let client = gemini::Client::new(&config.api_key)?;
            Ok(RigRunner::new(config, client) as Arc<dyn AgentRunner>)
        }
        _ => {
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&config.api_key)
                .base_url(&config.api_url)
                .build()?;
            Ok(RigRunner::new(config, client) as Arc<dyn AgentRunner>)
        }
    }
}
