use super::{AgentRunner, RunnerEvent};
use crate::config::Config;
use crate::session::{Content, Session, Turn};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use rig::{
    agent::MultiTurnStreamItem,
    client::CompletionClient,
    completion::{CompletionModel, GetTokenUsage},
    streaming::{StreamedAssistantContent, StreamingPrompt},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

pub struct RigRunner<C: CompletionClient> {
    config: Config,
    client: C,
    sessions: RwLock<HashMap<String, Session>>,
}

impl<C: CompletionClient> RigRunner<C> {
    pub fn new(config: Config, client: C) -> Arc<Self> {
        info!(
            "Agent runner ready ({} / {})",
            config.api_provider, config.model
        );
        Arc::new(Self {
            config,
            client,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.events.clone())
            .with_context(|| format!("Unknown session: {}", session_id))
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .with_context(|| format!("Unknown session: {}", session_id))?;
        session.events.push(turn);
        Ok(())
    }

    async fn run_stream<M, R, A>(
        agent: A,
        prompt: &str,
        tx: &mpsc::Sender<RunnerEvent>,
    ) -> Result<String>
    where
        M: CompletionModel + 'static,
        R: Clone + Unpin + GetTokenUsage,
        A: StreamingPrompt<M, R>,
        <A as StreamingPrompt<M, R>>::Hook: 'static,
    {
        let mut stream = agent.stream_prompt(prompt).await;
        let mut response_text = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(MultiTurnStreamItem::StreamAssistantItem(StreamedAssistantContent::Text(
                    text,
                ))) => {
                    let _ = tx.send(RunnerEvent::TextDelta(text.text.clone())).await;
                    response_text.push_str(&text.text);
                }
                Ok(MultiTurnStreamItem::FinalResponse(res)) => {
                    if response_text.is_empty() {
                        response_text = res.response().to_string();
                    }
                }
                Err(e) => {
                    let _ = tx.send(RunnerEvent::Error(e.to_string())).await;
                    return Err(anyhow::anyhow!("{}", e));
                }
                _ => {}
            }
        }

        Ok(response_text)
    }
}

#[async_trait]
impl<C> AgentRunner for RigRunner<C>
where
    C: CompletionClient + Send + Sync,
    C::CompletionModel: 'static,
{
    async fn create_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        Ok(())
    }

    async fn run(
        &self,
        session_id: &str,
        message: Content,
        tx: mpsc::Sender<RunnerEvent>,
    ) -> Result<()> {
        let user_text = message.first_text().unwrap_or_default().to_string();
        let history = self.history(session_id).await?;
        self.append(session_id, Turn::new(message)).await?;

        let prompt = build_prompt(&history, &user_text);
        debug!(
            "Prompting {} with {} prior turn(s)",
            self.config.model,
            history.len()
        );

        let mut builder = self
            .client
            .agent(&self.config.model)
            .preamble(&self.config.preamble);
        if self.config.disable_reasoning {
            builder = builder.additional_params(serde_json::json!({
                "thinking": { "type": "disabled" }
            }));
        }

        let response = Self::run_stream(builder.build(), &prompt, &tx).await?;

        self.append(
            session_id,
            Turn::new(Content::text(&self.config.agent_name, &response)),
        )
        .await?;
        let _ = tx.send(RunnerEvent::Final(response)).await;

        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .with_context(|| format!("Unknown session: {}", session_id))
    }
}

/// Renders prior turns ahead of the new user message. Turns without text
/// (tool calls and the like) are left out.
fn build_prompt(history: &[Turn], user_text: &str) -> String {
    let mut prompt = String::new();

    let lines: Vec<String> = history
        .iter()
        .filter_map(|turn| {
            turn.text()
                .map(|text| format!("{}: {}", turn.role().unwrap_or("unknown"), text))
        })
        .collect();

    if !lines.is_empty() {
        prompt.push_str("# Conversation So Far\n\n");
        prompt.push_str(&lines.join("\n"));
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!("User: {}", user_text));
    prompt
}
