use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_DB_PATH: &str = "chat_history.db";
const DEFAULT_AGENT_NAME: &str = "triage_doctor_finder_agent";
const DEFAULT_PREAMBLE: &str = "You are a careful health-triage assistant. Interview the patient, \
flag emergencies immediately, and never present your assessment as a diagnosis.";

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    api: ApiConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiConfig {
    provider: String,
    key: String,
    url: String,
    model: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct StorageConfig {
    db_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SessionConfig {
    id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AgentConfig {
    name: Option<String>,
    preamble: Option<String>,
    #[serde(default)]
    disable_reasoning: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_provider: String,
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub db_path: PathBuf,
    pub session_id: String,
    pub agent_name: String,
    pub preamble: String,
    pub disable_reasoning: bool,
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(content).context("Failed to parse config file")?;

        let session_id = config_file
            .session
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            api_provider: config_file.api.provider,
            api_key: config_file.api.key,
            api_url: config_file.api.url,
            model: config_file.api.model,
            db_path: config_file
                .storage
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
                .into(),
            session_id,
            agent_name: config_file
                .agent
                .name
                .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            preamble: config_file
                .agent
                .preamble
                .unwrap_or_else(|| DEFAULT_PREAMBLE.to_string()),
            disable_reasoning: config_file.agent.disable_reasoning,
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }
}
