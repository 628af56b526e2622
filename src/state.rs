//! Workflow state threaded through the orchestration graph
//!
//! One [`WorkflowState`] lives for exactly one conversational turn: seeded
//! at query intake, mutated only through [`StatePatch`] applications at node
//! transitions, and discarded once the final answer has been handed back.
//!
//! Every mutation is a tagged operation — replace a scalar, append to a
//! sequence, or clear a sequence. No other mutation shape exists, which
//! keeps transitions auditable and replay-safe.

use serde::{Deserialize, Serialize};

use crate::memory::MemoryFields;

/// Role of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tagged update for a scalar state field.
#[derive(Debug, Clone)]
pub enum Update<T> {
    Keep,
    Replace(T),
}

impl<T> Default for Update<T> {
    fn default() -> Self {
        Update::Keep
    }
}

impl<T> Update<T> {
    fn apply(self, slot: &mut T) {
        if let Update::Replace(value) = self {
            *slot = value;
        }
    }
}

/// Tagged update for a sequence state field.
///
/// `Clear` is the explicit replacement for the original design's magic
/// "delete" sentinel; outside of it, sequences are append-only.
#[derive(Debug, Clone)]
pub enum SeqUpdate<T> {
    Keep,
    Append(Vec<T>),
    Clear,
}

impl<T> Default for SeqUpdate<T> {
    fn default() -> Self {
        SeqUpdate::Keep
    }
}

impl<T> SeqUpdate<T> {
    /// Appends a single item.
    pub fn push(item: T) -> Self {
        SeqUpdate::Append(vec![item])
    }

    fn apply(self, slot: &mut Vec<T>) {
        match self {
            SeqUpdate::Keep => {}
            SeqUpdate::Append(items) => slot.extend(items),
            SeqUpdate::Clear => slot.clear(),
        }
    }
}

/// The set of field updates one node emits at a transition.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub messages: SeqUpdate<ChatTurn>,
    pub user_query: Update<String>,
    pub history_messages: SeqUpdate<ChatTurn>,
    pub needs_retrieval: Update<bool>,
    pub memory_threshold: Update<f32>,
    pub memory_info: SeqUpdate<MemoryFields>,
    pub task_description: SeqUpdate<String>,
    pub retrieved_information: SeqUpdate<String>,
    pub current_iteration: Update<u32>,
    pub max_retrieval_iterations: Update<u32>,
    pub rewrite_query: Update<String>,
    pub final_answer: Update<String>,
}

/// Identifier of a graph node; transitions return the next one to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeId {
    Query,
    Route,
    Answer,
    GetMemory,
    Supervisor,
    RetrievalAgent,
    DealWithResults,
    UpdateMemory,
    End,
}

/// Mutable record threaded through every node of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Chat turns accumulated this invocation. Append-only except for the
    /// explicit `Clear` emitted at query intake.
    pub messages: Vec<ChatTurn>,
    /// Raw text of the current turn; set once, immutable afterward.
    pub user_query: String,
    /// Turns loaded from persistent history; populated once, then read-only.
    pub history_messages: Vec<ChatTurn>,
    /// Sticky flag: true once any evidence-gathering step has run.
    pub needs_retrieval: bool,
    /// Similarity cutoff for memory hits; fixed per invocation.
    pub memory_threshold: f32,
    /// Qualifying memory hits, populated once by the memory-lookup node.
    pub memory_info: Vec<MemoryFields>,
    /// Retrieval sub-tasks issued by the supervisor, append-only.
    pub task_description: Vec<String>,
    /// Raw retrieval results, one per executed sub-task, append-only.
    pub retrieved_information: Vec<String>,
    pub current_iteration: u32,
    pub max_retrieval_iterations: u32,
    /// Recall-oriented rewrite of the user query, set by memory lookup.
    pub rewrite_query: Option<String>,
    /// Synthesized response, written exactly once on the retrieval path.
    pub final_answer: Option<String>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            user_query: String::new(),
            history_messages: Vec::new(),
            needs_retrieval: false,
            memory_threshold: 0.65,
            memory_info: Vec::new(),
            task_description: Vec::new(),
            retrieved_information: Vec::new(),
            current_iteration: 0,
            max_retrieval_iterations: 3,
            rewrite_query: None,
            final_answer: None,
        }
    }
}

impl WorkflowState {
    /// Applies a patch. Field semantics:
    /// - `needs_retrieval` is sticky: once true it cannot drop back to
    ///   false within the same invocation.
    /// - sequences obey their tagged op; everything else is replace-only.
    pub fn apply(&mut self, patch: StatePatch) {
        patch.messages.apply(&mut self.messages);
        patch.user_query.apply(&mut self.user_query);
        patch.history_messages.apply(&mut self.history_messages);
        if let Update::Replace(value) = patch.needs_retrieval {
            self.needs_retrieval = self.needs_retrieval || value;
        }
        patch.memory_threshold.apply(&mut self.memory_threshold);
        patch.memory_info.apply(&mut self.memory_info);
        patch.task_description.apply(&mut self.task_description);
        patch
            .retrieved_information
            .apply(&mut self.retrieved_information);
        patch.current_iteration.apply(&mut self.current_iteration);
        patch
            .max_retrieval_iterations
            .apply(&mut self.max_retrieval_iterations);
        if let Update::Replace(value) = patch.rewrite_query {
            self.rewrite_query = Some(value);
        }
        if let Update::Replace(value) = patch.final_answer {
            self.final_answer = Some(value);
        }
    }

    /// Content of the last assistant turn, if any.
    pub fn last_assistant_turn(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_clear_sequences() {
        let mut state = WorkflowState::default();
        state.apply(StatePatch {
            messages: SeqUpdate::Append(vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")]),
            ..Default::default()
        });
        assert_eq!(state.messages.len(), 2);

        state.apply(StatePatch {
            messages: SeqUpdate::push(ChatTurn::user("again")),
            ..Default::default()
        });
        assert_eq!(state.messages.len(), 3);

        state.apply(StatePatch {
            messages: SeqUpdate::Clear,
            ..Default::default()
        });
        assert!(state.messages.is_empty());
    }

    #[test]
    fn needs_retrieval_is_sticky() {
        let mut state = WorkflowState::default();
        assert!(!state.needs_retrieval);

        state.apply(StatePatch {
            needs_retrieval: Update::Replace(true),
            ..Default::default()
        });
        assert!(state.needs_retrieval);

        state.apply(StatePatch {
            needs_retrieval: Update::Replace(false),
            ..Default::default()
        });
        assert!(state.needs_retrieval, "true must never drop back to false");
    }

    #[test]
    fn keep_leaves_fields_untouched() {
        let mut state = WorkflowState {
            user_query: "original".into(),
            current_iteration: 2,
            ..Default::default()
        };
        state.apply(StatePatch::default());
        assert_eq!(state.user_query, "original");
        assert_eq!(state.current_iteration, 2);
        assert!(state.final_answer.is_none());
    }

    #[test]
    fn messages_rebuild_after_clear_keeps_chronology() {
        let mut state = WorkflowState::default();
        state.apply(StatePatch {
            messages: SeqUpdate::Clear,
            history_messages: SeqUpdate::Append(vec![
                ChatTurn::user("older question"),
                ChatTurn::assistant("older answer"),
            ]),
            ..Default::default()
        });
        state.apply(StatePatch {
            messages: SeqUpdate::Append(vec![
                ChatTurn::user("older question"),
                ChatTurn::assistant("older answer"),
                ChatTurn::user("current question"),
            ]),
            ..Default::default()
        });

        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages[2].content, "current question");
        assert_eq!(state.history_messages.len(), 2);
    }
}
