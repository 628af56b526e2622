//! Conversation history provider
//!
//! Raw prior turns of a session, distinct from distilled vector memory.
//! The graph only ever reads a bounded window of the most recent turns;
//! persistence across restarts belongs to whatever backs the trait in a
//! given deployment (the in-memory implementation here covers tests and
//! single-instance use).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::errors::Result;
use crate::state::Role;

/// One persisted conversation turn.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for conversation history backends.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Returns up to `limit` most recent turns of a session, oldest first.
    async fn get_history(
        &self,
        session_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>>;

    /// Appends one turn to a session.
    async fn add_turn(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<()>;
}

/// In-memory implementation of [`HistoryProvider`], keyed by
/// `user_id:session_id`. Data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryHistory {
    sessions: DashMap<String, Vec<HistoryTurn>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, session_id: &str) -> String {
        format!("{user_id}:{session_id}")
    }
}

#[async_trait]
impl HistoryProvider for InMemoryHistory {
    async fn get_history(
        &self,
        session_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>> {
        let key = Self::key(user_id, session_id);
        let turns = match self.sessions.get(&key) {
            Some(entry) => {
                let all = entry.value();
                let skip = all.len().saturating_sub(limit);
                all[skip..].to_vec()
            }
            None => Vec::new(),
        };
        debug!("Loaded {} history turns for session {}", turns.len(), session_id);
        Ok(turns)
    }

    async fn add_turn(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<()> {
        let key = Self::key(user_id, session_id);
        self.sessions.entry(key).or_default().push(HistoryTurn {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}
