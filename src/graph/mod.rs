//! # Orchestration graph
//!
//! The engine's core: a state machine that walks one conversational turn
//! from intake to answer. Nodes are plain async functions returning a
//! `(StatePatch, NodeId)` pair; an interpreter loop applies the patch and
//! jumps to the returned node until it reaches [`NodeId::End`].
//!
//! ```text
//! Query ─► Route ─┬─► Answer ──────────────────────────────► End
//!                 └─► GetMemory ─► Supervisor ─┬─► RetrievalAgent ─┐
//!                                   ▲          │                   │
//!                                   └──────────┼───────────────────┘
//!                                              └─► DealWithResults ─► UpdateMemory ─► End
//! ```
//!
//! Exactly one node runs at a time; one invocation is strictly sequential.
//! Distinct sessions may run concurrently — the memory collection is the
//! only shared resource, and it is append-only.

pub mod nodes;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::embedding::Embedder;
use crate::errors::{AgentError, Result};
use crate::history::HistoryProvider;
use crate::llm::LanguageModel;
use crate::memory::VectorStore;
use crate::retrieval::RetrievalAgent;
use crate::state::{ChatTurn, NodeId, StatePatch, WorkflowState};

/// Event emitted by [`AgentGraph::invoke_stream`].
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Incremental assistant content.
    Delta(String),
    /// Terminal marker carrying the complete answer.
    Done { final_answer: String },
    /// Terminal marker for a failed invocation.
    Error(String),
}

/// Stream returned by [`AgentGraph::invoke_stream`].
///
/// Dropping it aborts the underlying invocation task, so no further node
/// runs once the consumer is gone.
pub struct EventStream {
    inner: ReceiverStream<AgentEvent>,
    handle: JoinHandle<()>,
}

impl Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Graph-level knobs, usually derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub memory_collection: String,
    pub memory_top_k: usize,
    pub memory_threshold: f32,
    pub max_retrieval_iterations: u32,
    pub history_limit: usize,
    pub locale: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            memory_collection: "memory".to_string(),
            memory_top_k: 3,
            memory_threshold: 0.65,
            max_retrieval_iterations: 3,
            history_limit: 19,
            locale: "en-US".to_string(),
        }
    }
}

impl GraphConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            memory_collection: settings.memory.collection.clone(),
            memory_top_k: settings.memory.top_k,
            memory_threshold: settings.memory.similarity_threshold,
            max_retrieval_iterations: settings.agent.max_retrieval_iterations,
            history_limit: settings.agent.history_limit,
            locale: settings.agent.locale.clone(),
        }
    }
}

/// Structured contract of the supervisor's decision.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorDecision {
    pub needs_more_info: bool,
    #[serde(default)]
    pub task_description_item: String,
}

/// Session/user identifiers of one invocation.
pub(crate) struct InvocationCtx<'a> {
    pub session_id: &'a str,
    pub user_id: &'a str,
}

/// The orchestration service.
///
/// Constructed once at service start with its collaborators injected;
/// invoked per request with request-scoped [`WorkflowState`]. Holds no
/// per-invocation state of its own.
pub struct AgentGraph {
    pub(crate) model: Arc<dyn LanguageModel>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) store: Arc<dyn VectorStore>,
    pub(crate) history: Arc<dyn HistoryProvider>,
    pub(crate) retriever: RetrievalAgent,
    pub(crate) config: GraphConfig,
}

impl AgentGraph {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        history: Arc<dyn HistoryProvider>,
        retriever: RetrievalAgent,
        config: GraphConfig,
    ) -> Self {
        Self {
            model,
            embedder,
            store,
            history,
            retriever,
            config,
        }
    }

    /// Runs one conversational turn to completion and returns the final
    /// answer. Persisting the exchange back into conversation history is
    /// the caller's job.
    pub async fn invoke(&self, user_text: &str, session_id: &str, user_id: &str) -> Result<String> {
        let (answer, _) = self.run_pipeline(user_text, session_id, user_id, None).await?;
        Ok(answer)
    }

    /// Like [`invoke`](Self::invoke), but also returns the terminal
    /// workflow state for inspection.
    pub async fn invoke_traced(
        &self,
        user_text: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<(String, WorkflowState)> {
        self.run_pipeline(user_text, session_id, user_id, None).await
    }

    /// Streaming variant: emits [`AgentEvent::Delta`] chunks while the
    /// answer is synthesized and terminates with [`AgentEvent::Done`] (or
    /// [`AgentEvent::Error`]). Dropping the returned stream aborts the
    /// invocation task outright.
    pub fn invoke_stream(
        self: &Arc<Self>,
        user_text: String,
        session_id: String,
        user_id: String,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(32);
        let graph = Arc::clone(self);

        let handle = tokio::spawn(async move {
            match graph
                .run_pipeline(&user_text, &session_id, &user_id, Some(&tx))
                .await
            {
                Ok((final_answer, _)) => {
                    let _ = tx.send(AgentEvent::Done { final_answer }).await;
                }
                Err(AgentError::StreamClosed) => {
                    debug!("Consumer went away, invocation abandoned");
                }
                Err(e) => {
                    error!("Invocation failed: {}", e);
                    let _ = tx.send(AgentEvent::Error(format!("Error: {e}"))).await;
                }
            }
        });

        EventStream {
            inner: ReceiverStream::new(rx),
            handle,
        }
    }

    async fn run_pipeline(
        &self,
        user_text: &str,
        session_id: &str,
        user_id: &str,
        sink: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<(String, WorkflowState)> {
        let ctx = InvocationCtx {
            session_id,
            user_id,
        };

        let mut state = WorkflowState::default();
        state.messages.push(ChatTurn::user(user_text));

        let mut node = NodeId::Query;
        while node != NodeId::End {
            debug!("Entering node {:?}", node);
            let (patch, next) = self.step(node, &state, &ctx, sink).await?;
            state.apply(patch);
            node = next;
        }

        let answer = state
            .final_answer
            .clone()
            .or_else(|| state.last_assistant_turn().map(str::to_string))
            .ok_or_else(|| AgentError::llm("pipeline ended without producing an answer"))?;

        info!("Invocation complete for session {}", session_id);
        Ok((answer, state))
    }

    /// Synthesis calls go through here so the streaming and non-streaming
    /// entry points share one code path. A closed sink means the consumer
    /// is gone; the invocation stops rather than finishing unobserved.
    pub(crate) async fn complete_streaming(
        &self,
        turns: &[ChatTurn],
        sink: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<String> {
        match sink {
            Some(tx) => {
                let mut stream = self.model.complete_stream(turns).await?;
                let mut answer = String::new();
                while let Some(chunk) = stream.next().await {
                    let piece = chunk?;
                    answer.push_str(&piece);
                    tx.send(AgentEvent::Delta(piece))
                        .await
                        .map_err(|_| AgentError::StreamClosed)?;
                }
                Ok(answer)
            }
            None => self.model.complete(turns).await,
        }
    }

    async fn step(
        &self,
        node: NodeId,
        state: &WorkflowState,
        ctx: &InvocationCtx<'_>,
        sink: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<(StatePatch, NodeId)> {
        match node {
            NodeId::Query => self.query_node(state, ctx).await,
            NodeId::Route => self.route_node(state).await,
            NodeId::Answer => self.answer_node(state, sink).await,
            NodeId::GetMemory => self.get_memory_node(state).await,
            NodeId::Supervisor => self.supervisor_node(state).await,
            NodeId::RetrievalAgent => self.retrieval_agent_node(state).await,
            NodeId::DealWithResults => self.deal_with_results_node(state, sink).await,
            NodeId::UpdateMemory => self.update_memory_node(state).await,
            NodeId::End => Ok((StatePatch::default(), NodeId::End)),
        }
    }
}
