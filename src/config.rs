use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Output dimension of the embedding model, fixed per deployment
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    /// Milvus REST endpoint, e.g. http://localhost:19530
    pub milvus_url: String,
    pub database: String,
    /// Collection holding distilled question/answer memories
    pub collection: String,
    /// Collection the retrieval tool searches
    pub knowledge_collection: String,
    pub top_k: usize,
    /// Minimum cosine similarity for a memory hit to be kept
    pub similarity_threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentConfig {
    /// Prior turns loaded from the history provider per invocation
    pub history_limit: usize,
    /// Supervisor iteration budget
    pub max_retrieval_iterations: u32,
    /// Reasoning-step budget of the retrieval agent
    pub agent_step_limit: u32,
    pub locale: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_limit: 19,
            max_retrieval_iterations: 3,
            agent_step_limit: 25,
            locale: "en-US".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("llm.base_url", "https://api.openai.com/v1")?
            .set_default("llm.api_key", "")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.temperature", 0.7)?
            .set_default("llm.timeout_seconds", 120)?
            .set_default("embedding.base_url", "https://api.openai.com/v1")?
            .set_default("embedding.api_key", "")?
            .set_default("embedding.model", "text-embedding-3-large")?
            .set_default("embedding.dimension", 1024)?
            .set_default("memory.milvus_url", "http://localhost:19530")?
            .set_default("memory.database", "default")?
            .set_default("memory.collection", "memory")?
            .set_default("memory.knowledge_collection", "knowledge")?
            .set_default("memory.top_k", 3)?
            .set_default("memory.similarity_threshold", 0.65)?
            .set_default("agent.history_limit", 19)?
            .set_default("agent.max_retrieval_iterations", 3)?
            .set_default("agent.agent_step_limit", 25)?
            .set_default("agent.locale", "en-US")?
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("RECALL").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
