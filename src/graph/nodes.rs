//! Node implementations
//!
//! Each node reads the current [`WorkflowState`], performs at most a
//! handful of collaborator calls, and returns the patch to apply plus the
//! next node. Transient collaborator failures are caught here and replaced
//! with safe defaults — empty history, no memory hits, a "no information
//! found" retrieval result, a skipped write-back — so the pipeline always
//! reaches an answer. Only answer synthesis itself is allowed to fail the
//! invocation.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AgentEvent, AgentGraph, InvocationCtx, SupervisorDecision};
use crate::errors::Result;
use crate::llm::complete_structured;
use crate::memory::{MemoryFields, MemoryRecord, SearchHit};
use crate::prompts::{self, Template, TemplateVars, NO_UPDATE_SENTINEL};
use crate::retrieval::NO_INFORMATION_FOUND;
use crate::state::{ChatTurn, NodeId, Role, SeqUpdate, StatePatch, Update, WorkflowState};

/// Instruction turn appended before answer synthesis.
const SYNTHESIS_INSTRUCTION: &str =
    "Answer the user's latest question using the reference information above.";

impl AgentGraph {
    fn vars<'a>(&'a self, state: &'a WorkflowState) -> TemplateVars<'a> {
        TemplateVars {
            user_query: &state.user_query,
            locale: &self.config.locale,
            ..Default::default()
        }
    }

    /// Query intake: seeds the fresh state and loads bounded history.
    pub(crate) async fn query_node(
        &self,
        state: &WorkflowState,
        ctx: &InvocationCtx<'_>,
    ) -> Result<(StatePatch, NodeId)> {
        let user_query = state
            .messages
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.clone())
            .unwrap_or_default();

        let mut patch = StatePatch {
            user_query: Update::Replace(user_query.clone()),
            current_iteration: Update::Replace(0),
            max_retrieval_iterations: Update::Replace(self.config.max_retrieval_iterations),
            memory_threshold: Update::Replace(self.config.memory_threshold),
            task_description: SeqUpdate::Clear,
            ..Default::default()
        };

        // Only the first turn of an in-memory conversation reloads history;
        // later turns already carry their context and reloading would
        // inject it twice.
        if state.messages.len() <= 1 {
            let history = match self
                .history
                .get_history(ctx.session_id, ctx.user_id, self.config.history_limit)
                .await
            {
                Ok(turns) => turns,
                Err(e) => {
                    warn!("History load failed, proceeding with empty context: {}", e);
                    Vec::new()
                }
            };

            let mut converted: Vec<ChatTurn> = history
                .into_iter()
                .filter(|t| matches!(t.role, Role::User | Role::Assistant))
                .map(|t| ChatTurn {
                    role: t.role,
                    content: t.content,
                })
                .collect();
            // A caller that persisted the current turn before invoking
            // would otherwise surface the question twice once the route
            // node rebuilds the transcript. Earlier exchanges that happen
            // to repeat the question are left alone.
            if converted
                .last()
                .map_or(false, |t| t.role == Role::User && t.content == user_query)
            {
                converted.pop();
            }
            info!("Loaded {} history turns", converted.len());

            patch.messages = SeqUpdate::Clear;
            patch.history_messages = SeqUpdate::Append(converted);
        }

        Ok((patch, NodeId::Route))
    }

    /// Route: answer directly, or retrieve first.
    pub(crate) async fn route_node(&self, state: &WorkflowState) -> Result<(StatePatch, NodeId)> {
        // Chronological transcript: loaded history, then the current turn.
        // Query intake cleared `messages`, so this append rebuilds it for
        // every downstream node.
        let mut context = state.history_messages.clone();
        context.push(ChatTurn::user(state.user_query.clone()));

        let system = prompts::render(Template::Route, &self.vars(state));
        let mut turns = vec![system];
        turns.extend_from_slice(&context);

        // Anything but the exact literal "true" takes the cheaper path.
        let needs_retrieval = match self.model.complete(&turns).await {
            Ok(text) => text.trim().eq_ignore_ascii_case("true"),
            Err(e) => {
                warn!("Routing call failed, taking the direct path: {}", e);
                false
            }
        };
        info!("Route decision: needs_retrieval = {}", needs_retrieval);

        let patch = StatePatch {
            messages: SeqUpdate::Append(context),
            ..Default::default()
        };
        let next = if needs_retrieval {
            NodeId::GetMemory
        } else {
            NodeId::Answer
        };
        Ok((patch, next))
    }

    /// Direct answer, terminal.
    pub(crate) async fn answer_node(
        &self,
        state: &WorkflowState,
        sink: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<(StatePatch, NodeId)> {
        let system = prompts::render(Template::GeneralAnswer, &self.vars(state));
        let mut turns = vec![system];
        turns.extend_from_slice(&state.messages);

        let response = self.complete_streaming(&turns, sink).await?;

        let patch = StatePatch {
            messages: SeqUpdate::push(ChatTurn::assistant(response)),
            ..Default::default()
        };
        Ok((patch, NodeId::End))
    }

    /// Memory lookup: rewrite, embed, search, filter by threshold.
    pub(crate) async fn get_memory_node(
        &self,
        state: &WorkflowState,
    ) -> Result<(StatePatch, NodeId)> {
        let system = prompts::render(Template::GetMemory, &self.vars(state));
        let mut turns = vec![system];
        turns.extend_from_slice(&state.messages);

        let rewrite = match self.model.complete(&turns).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => state.user_query.clone(),
            Err(e) => {
                warn!("Query rewrite failed, recalling with the raw query: {}", e);
                state.user_query.clone()
            }
        };
        info!("Recall query: {}", rewrite);

        let hits = match self.embedder.embed(&rewrite).await {
            Ok(vector) => self
                .store
                .search(
                    &self.config.memory_collection,
                    &vector,
                    "question_embedding",
                    &["question", "answer"],
                    self.config.memory_top_k,
                    None,
                )
                .await
                .unwrap_or_else(|e| {
                    warn!("Memory search failed, continuing without memories: {}", e);
                    Vec::new()
                }),
            Err(e) => {
                warn!("Recall embedding failed, continuing without memories: {}", e);
                Vec::new()
            }
        };

        // Precision over recall: hits below the cutoff are dropped rather
        // than risk contaminating the answer.
        let total = hits.len();
        let qualifying: Vec<MemoryFields> = hits
            .iter()
            .filter(|h| h.distance >= state.memory_threshold)
            .map(SearchHit::memory_fields)
            .collect();
        info!(
            "Kept {}/{} memory hits above threshold {}",
            qualifying.len(),
            total,
            state.memory_threshold
        );

        let patch = StatePatch {
            rewrite_query: Update::Replace(rewrite),
            memory_info: SeqUpdate::Append(qualifying),
            ..Default::default()
        };
        Ok((patch, NodeId::Supervisor))
    }

    /// Supervisor: decide whether the accumulated evidence suffices.
    pub(crate) async fn supervisor_node(
        &self,
        state: &WorkflowState,
    ) -> Result<(StatePatch, NodeId)> {
        // Hard stop, regardless of what the model would say.
        if state.current_iteration >= state.max_retrieval_iterations {
            info!(
                "Reached iteration budget ({}), finalizing",
                state.max_retrieval_iterations
            );
            return Ok((StatePatch::default(), NodeId::DealWithResults));
        }

        let vars = TemplateVars {
            user_query: &state.user_query,
            memory_info: &state.memory_info,
            retrieved_information: &state.retrieved_information,
            task_description: &state.task_description,
            locale: &self.config.locale,
            ..Default::default()
        };
        let system = prompts::render(Template::Supervisor, &vars);
        let mut turns = vec![system];
        turns.extend_from_slice(&state.messages);

        let decision = match complete_structured::<SupervisorDecision>(self.model.as_ref(), &turns)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Supervisor output unusable, finalizing: {}", e);
                SupervisorDecision {
                    needs_more_info: false,
                    task_description_item: String::new(),
                }
            }
        };

        let mut patch = StatePatch::default();
        if decision.needs_more_info {
            patch.needs_retrieval = Update::Replace(true);
        }

        let task = decision.task_description_item.trim().to_string();
        if decision.needs_more_info && !task.is_empty() {
            info!(
                "Supervisor issued sub-task {}/{}: {}",
                state.current_iteration + 1,
                state.max_retrieval_iterations,
                task
            );
            patch.task_description = SeqUpdate::push(task);
            patch.current_iteration = Update::Replace(state.current_iteration + 1);
            Ok((patch, NodeId::RetrievalAgent))
        } else {
            // Covers both "evidence suffices" and the degenerate "needs
            // more info but produced no task" judgment.
            debug!("Supervisor terminated the retrieval loop");
            Ok((patch, NodeId::DealWithResults))
        }
    }

    /// Retrieval: run the tool-using agent on the latest sub-task.
    pub(crate) async fn retrieval_agent_node(
        &self,
        state: &WorkflowState,
    ) -> Result<(StatePatch, NodeId)> {
        let task = state
            .task_description
            .last()
            .cloned()
            .unwrap_or_else(|| state.user_query.clone());
        info!("Dispatching retrieval sub-task: {}", task);

        let result = match self.retriever.run(&task).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Retrieval sub-task failed: {}", e);
                NO_INFORMATION_FOUND.to_string()
            }
        };

        let patch = StatePatch {
            retrieved_information: SeqUpdate::push(result),
            ..Default::default()
        };
        Ok((patch, NodeId::Supervisor))
    }

    /// Finalize: synthesize the answer from all accumulated evidence.
    pub(crate) async fn deal_with_results_node(
        &self,
        state: &WorkflowState,
        sink: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<(StatePatch, NodeId)> {
        info!(
            "Synthesizing final answer from {} memories and {} retrieval results",
            state.memory_info.len(),
            state.retrieved_information.len()
        );

        let vars = TemplateVars {
            user_query: &state.user_query,
            memory_info: &state.memory_info,
            retrieved_information: &state.retrieved_information,
            locale: &self.config.locale,
            ..Default::default()
        };
        let system = prompts::render(Template::Answer, &vars);
        let mut turns = vec![system];
        turns.extend_from_slice(&state.messages);
        turns.push(ChatTurn::user(SYNTHESIS_INSTRUCTION));

        let final_answer = self.complete_streaming(&turns, sink).await?;

        let patch = StatePatch {
            final_answer: Update::Replace(final_answer),
            ..Default::default()
        };
        Ok((patch, NodeId::UpdateMemory))
    }

    /// Write-back: distill a new memory if retrieval was used, then close
    /// out the turn.
    pub(crate) async fn update_memory_node(
        &self,
        state: &WorkflowState,
    ) -> Result<(StatePatch, NodeId)> {
        let final_answer = state.final_answer.clone().unwrap_or_default();

        if state.needs_retrieval {
            self.write_back(state, &final_answer).await;
        } else {
            debug!("Retrieval was never used this turn, skipping write-back");
        }

        let patch = StatePatch {
            messages: SeqUpdate::push(ChatTurn::assistant(final_answer)),
            ..Default::default()
        };
        Ok((patch, NodeId::End))
    }

    /// Insert failures here are logged and swallowed: the user still gets
    /// their answer.
    async fn write_back(&self, state: &WorkflowState, final_answer: &str) {
        let vars = TemplateVars {
            user_query: &state.user_query,
            memory_info: &state.memory_info,
            answer: final_answer,
            locale: &self.config.locale,
            ..Default::default()
        };
        let system = prompts::render(Template::UpdateMemory, &vars);
        let mut turns = vec![system];
        turns.extend_from_slice(&state.messages);

        let summary = match self.model.complete(&turns).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("Memory distillation failed, skipping write-back: {}", e);
                return;
            }
        };

        if summary.is_empty() || summary.eq_ignore_ascii_case(NO_UPDATE_SENTINEL) {
            info!("No memory update needed");
            return;
        }

        let question = state
            .rewrite_query
            .clone()
            .unwrap_or_else(|| state.user_query.clone());
        let embedding = match self.embedder.embed(&question).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Write-back embedding failed, memory not stored: {}", e);
                return;
            }
        };

        let record = MemoryRecord::new(question, embedding, summary);
        match self
            .store
            .insert(&self.config.memory_collection, vec![record])
            .await
        {
            Ok(_) => info!("Stored one new memory"),
            Err(e) => warn!("Memory insert failed, answer unaffected: {}", e),
        }
    }
}
