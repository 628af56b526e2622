//! # recall-graph
//!
//! A conversational agent engine that augments LLM responses with
//! long-term memory (vector-indexed question/answer pairs) and bounded
//! multi-step retrieval.
//!
//! ## Architecture
//!
//! One user turn flows through a small state machine:
//!
//! 1. **Query intake** loads bounded conversation history
//! 2. **Route** decides between a direct answer and the retrieval path
//! 3. **Memory lookup** recalls past Q/A pairs above a similarity cutoff
//! 4. **Supervisor** iteratively issues retrieval sub-tasks under an
//!    iteration budget
//! 5. **Retrieval agent** executes each sub-task with vector-search tools
//! 6. **Finalize** synthesizes the answer from accumulated evidence
//! 7. **Memory update** writes a distilled Q/A memory back — only when
//!    retrieval was actually used
//!
//! ## Components
//!
//! - [`AgentGraph`]: the orchestration service and its entry points
//! - [`WorkflowState`] / [`StatePatch`]: request-scoped state, mutated
//!   only through tagged replace/append/clear operations
//! - [`LanguageModel`], [`Embedder`], [`VectorStore`], [`HistoryProvider`]:
//!   the collaborator seams
//! - [`RetrievalAgent`]: the bounded tool-using sub-agent
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use recall_graph::{
//!     AgentGraph, GraphConfig, InMemoryHistory, InMemoryVectorStore,
//!     OpenAiEmbedder, OpenAiGateway, RetrievalAgent, Settings,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::new()?;
//! let model = Arc::new(OpenAiGateway::new(&settings.llm)?);
//! let embedder = Arc::new(OpenAiEmbedder::new(&settings.embedding)?);
//! let store = Arc::new(InMemoryVectorStore::new());
//! let history = Arc::new(InMemoryHistory::new());
//! let retriever = RetrievalAgent::new(model.clone(), vec![], 25);
//!
//! let graph = AgentGraph::new(
//!     model,
//!     embedder,
//!     store,
//!     history,
//!     retriever,
//!     GraphConfig::from_settings(&settings),
//! );
//! let answer = graph.invoke("What is an ETF?", "session-1", "user-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod errors;
pub mod graph;
pub mod history;
pub mod llm;
pub mod memory;
pub mod prompts;
pub mod retrieval;
pub mod state;

pub use config::{AgentConfig, EmbeddingConfig, LlmConfig, MemoryConfig, Settings};
pub use embedding::{Embedder, OpenAiEmbedder};
pub use errors::{AgentError, Result};
pub use graph::{AgentEvent, AgentGraph, EventStream, GraphConfig, SupervisorDecision};
pub use history::{HistoryProvider, HistoryTurn, InMemoryHistory};
pub use llm::{complete_structured, openai::OpenAiGateway, LanguageModel, TextStream};
pub use memory::{
    in_memory::InMemoryVectorStore, milvus::MilvusVectorStore, MemoryFields, MemoryRecord,
    SearchHit, VectorStore,
};
pub use retrieval::{RetrievalAgent, RetrievalTool, VectorSearchTool, NO_INFORMATION_FOUND};
pub use state::{ChatTurn, NodeId, Role, SeqUpdate, StatePatch, Update, WorkflowState};
