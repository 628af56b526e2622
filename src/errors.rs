//! Error types for the recall-graph engine
//!
//! Node-level failures (a slow LLM, an unreachable vector store, a missing
//! history record) are caught at the node boundary and replaced with safe
//! defaults, so most of these errors never escape the orchestration graph.
//! The ones that do are the failures the pipeline cannot paper over: a
//! broken configuration, or an answer-synthesis call that produced nothing
//! to show the user.

use thiserror::Error;

/// Main error type for the recall-graph engine
#[derive(Error, Debug)]
pub enum AgentError {
    /// Invalid or missing configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Language model gateway failure
    #[error("Language model error: {0}")]
    LlmError(String),

    /// Embedding service failure
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// Vector store failure
    #[error("Vector store error: {0}")]
    VectorStoreError(String),

    /// Conversation history provider failure
    #[error("History provider error: {0}")]
    HistoryError(String),

    /// Underlying HTTP transport failure
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The model's structured output did not match the expected schema
    #[error("Structured output did not match the expected schema: {raw}")]
    StructuredOutputError {
        /// Raw model output that failed to validate
        raw: String,
    },

    /// The retrieval agent ran out of reasoning steps
    #[error("Retrieval agent exceeded its step limit of {limit}")]
    StepLimitExceeded {
        /// Configured step limit
        limit: u32,
    },

    /// The event channel to the caller was closed mid-stream
    #[error("Event stream closed by the consumer")]
    StreamClosed,
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a new LlmError
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::LlmError(msg.into())
    }

    /// Create a new EmbeddingError
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingError(msg.into())
    }

    /// Create a new VectorStoreError
    pub fn vector_store(msg: impl Into<String>) -> Self {
        Self::VectorStoreError(msg.into())
    }

    /// Create a new StructuredOutputError
    pub fn structured_output(raw: impl Into<String>) -> Self {
        Self::StructuredOutputError { raw: raw.into() }
    }
}
