use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub understanding: UnderstandingConfig,
    pub summarizer: SummarizerConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub knowledge: KnowledgeConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UnderstandingConfig {
    pub model: String,
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SummarizerConfig {
    pub model: String,
    pub max_tokens: usize,
    pub merge_max_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub dimension: usize,
}

/// Tunables for the conversation memory lifecycle.
///
/// The defaults encode the policy contract: a 5-turn recency window, first
/// compaction at turn 6, then one every 5 turns, 24h session timeout.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_max_recent_turns")]
    pub max_recent_turns: usize,
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: i64,
    #[serde(default = "default_compaction_interval")]
    pub compaction_interval: i64,
    #[serde(default = "default_session_timeout_hours")]
    pub session_timeout_hours: i64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_max_recent_turns() -> usize {
    5
}
fn default_summarization_threshold() -> i64 {
    6
}
fn default_compaction_interval() -> i64 {
    5
}
fn default_session_timeout_hours() -> i64 {
    24
}
fn default_queue_capacity() -> usize {
    1_000
}
fn default_worker_count() -> usize {
    2
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_recent_turns: default_max_recent_turns(),
            summarization_threshold: default_summarization_threshold(),
            compaction_interval: default_compaction_interval(),
            session_timeout_hours: default_session_timeout_hours(),
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KnowledgeConfig {
    pub similarity_threshold: f32,
    pub top_k: i64,
    pub company_snippet_limit: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub main_system_prompt: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
