//! Retrieval agent
//!
//! Executes one supervisor-issued sub-task: a small tool-using reasoning
//! loop over retrieval tools, bounded by a step limit. Each pass the model
//! either calls a tool (`{"action": ..., "input": ...}`) or finishes
//! (`{"final": ...}`); tool output is fed back as an observation turn.
//!
//! Failures inside a single tool call degrade to an observation the model
//! can react to; only exhausting the step budget (or the gateway dying)
//! fails the whole sub-task, and the graph maps that to a "no information
//! found" result rather than aborting the invocation.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::errors::{AgentError, Result};
use crate::llm::{parse_structured, LanguageModel};
use crate::memory::VectorStore;
use crate::state::ChatTurn;

/// Fallback result when a sub-task produces nothing usable.
pub const NO_INFORMATION_FOUND: &str = "no relevant information found";

/// Trait for tools the retrieval agent can call.
#[async_trait]
pub trait RetrievalTool: Send + Sync {
    /// Name the model uses to address the tool.
    fn name(&self) -> &str;

    /// One-line description shown in the agent's system prompt.
    fn description(&self) -> &str;

    /// Executes the tool against a free-text input.
    async fn call(&self, input: &str) -> Result<String>;
}

/// Vector-search-backed retrieval tool.
pub struct VectorSearchTool {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    anns_field: String,
    output_fields: Vec<String>,
    top_k: usize,
}

impl VectorSearchTool {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        anns_field: impl Into<String>,
        output_fields: Vec<String>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            anns_field: anns_field.into(),
            output_fields,
            top_k,
        }
    }
}

#[async_trait]
impl RetrievalTool for VectorSearchTool {
    fn name(&self) -> &str {
        "vector_search"
    }

    fn description(&self) -> &str {
        "Semantic search over the knowledge base. Input: a short, specific query."
    }

    async fn call(&self, input: &str) -> Result<String> {
        let vector = self.embedder.embed(input).await?;
        let fields: Vec<&str> = self.output_fields.iter().map(String::as_str).collect();
        let hits = self
            .store
            .search(
                &self.collection,
                &vector,
                &self.anns_field,
                &fields,
                self.top_k,
                None,
            )
            .await?;

        if hits.is_empty() {
            return Ok(NO_INFORMATION_FOUND.to_string());
        }

        let formatted = hits
            .iter()
            .map(|hit| {
                let payload = hit
                    .fields
                    .values()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("[similarity {:.2}] {}", hit.distance, payload)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(formatted)
    }
}

/// One parsed agent reply.
#[derive(Debug, Deserialize)]
struct AgentStep {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default, rename = "final")]
    final_answer: Option<String>,
}

/// Tool-using reasoning agent, bounded by a step limit.
pub struct RetrievalAgent {
    model: Arc<dyn LanguageModel>,
    tools: Vec<Arc<dyn RetrievalTool>>,
    step_limit: u32,
}

impl RetrievalAgent {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Vec<Arc<dyn RetrievalTool>>,
        step_limit: u32,
    ) -> Self {
        Self {
            model,
            tools,
            step_limit,
        }
    }

    fn system_prompt(&self) -> String {
        let tool_list = self
            .tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are a research agent. Gather the information the task asks \
             for using the tools below, then report what you found.\n\n\
             Tools:\n{tool_list}\n\n\
             Reply with exactly one JSON object per turn:\n\
             - To call a tool: {{\"action\": \"<tool name>\", \"input\": \"<tool input>\"}}\n\
             - To finish: {{\"final\": \"<your findings, as plain text>\"}}\n\
             No text outside the JSON object."
        )
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn RetrievalTool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Runs the agent to completion on one task description and returns
    /// its final textual output.
    pub async fn run(&self, task: &str) -> Result<String> {
        let mut transcript = vec![ChatTurn::system(self.system_prompt()), ChatTurn::user(task)];

        for step in 1..=self.step_limit {
            let raw = self.model.complete(&transcript).await?;

            let parsed: AgentStep = match parse_structured(&raw) {
                Ok(parsed) => parsed,
                Err(_) => {
                    // The model broke protocol; its prose is the best
                    // answer we will get.
                    debug!("Agent reply was not JSON at step {}, treating as final", step);
                    return Ok(raw.trim().to_string());
                }
            };

            if let Some(answer) = parsed.final_answer {
                debug!("Agent finished after {} steps", step);
                return Ok(answer);
            }

            let observation = match parsed.action.as_deref() {
                Some(name) => match self.find_tool(name) {
                    Some(tool) => {
                        let input = parsed.input.unwrap_or_default();
                        match tool.call(&input).await {
                            Ok(output) => output,
                            Err(e) => {
                                warn!("Tool '{}' failed: {}", name, e);
                                format!("tool error: {e}")
                            }
                        }
                    }
                    None => format!("unknown tool '{name}'"),
                },
                None => "reply contained neither an action nor a final answer".to_string(),
            };

            transcript.push(ChatTurn::assistant(raw));
            transcript.push(ChatTurn::user(format!("Observation: {observation}")));
        }

        Err(AgentError::StepLimitExceeded {
            limit: self.step_limit,
        })
    }
}
