//! # Vector memory store
//!
//! Long-term memory is a collection of distilled question/answer pairs,
//! indexed by the embedding of the question. The [`VectorStore`] trait is
//! the seam between the orchestration graph and whatever vector database a
//! deployment runs:
//!
//! - [`milvus::MilvusVectorStore`]: Milvus over its v2 REST API
//! - [`in_memory::InMemoryVectorStore`]: exhaustive cosine scan, for tests
//!   and local development
//!
//! A memory record is never updated in place; write-back always inserts.

pub mod in_memory;
pub mod milvus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

/// A persisted memory: one distilled question/answer pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub question: String,
    pub question_embedding: Vec<f32>,
    pub answer: String,
}

impl MemoryRecord {
    pub fn new(
        question: impl Into<String>,
        question_embedding: Vec<f32>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            question_embedding,
            answer: answer.into(),
        }
    }
}

/// Field payload of a qualifying memory hit, as consumed by the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFields {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// One ranked result of a vector search.
///
/// `distance` is cosine similarity in `[-1, 1]`; higher means closer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Value,
    pub distance: f32,
    pub fields: serde_json::Map<String, Value>,
}

impl SearchHit {
    /// Deserializes the requested output fields into the graph's
    /// `{question, answer}` shape. Missing fields default to empty strings.
    pub fn memory_fields(&self) -> MemoryFields {
        serde_json::from_value(Value::Object(self.fields.clone())).unwrap_or_default()
    }
}

/// Trait for vector store backends.
///
/// Implementations must be thread-safe (Send + Sync); the memory collection
/// is the only resource shared across concurrent invocations and is assumed
/// to support concurrent inserts and reads without external locking.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert records into a collection, returning how many were written.
    async fn insert(&self, collection: &str, records: Vec<MemoryRecord>) -> Result<usize>;

    /// Nearest-neighbor search over `field`, returning up to `k` hits
    /// ranked by descending similarity. `filter` is a backend-specific
    /// boolean expression.
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        field: &str,
        output_fields: &[&str],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<SearchHit>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_fields_from_hit_payload() {
        let mut fields = serde_json::Map::new();
        fields.insert("question".into(), json!("What is an ETF?"));
        fields.insert("answer".into(), json!("An exchange-traded fund."));
        let hit = SearchHit {
            id: json!(42),
            distance: 0.91,
            fields,
        };

        let parsed = hit.memory_fields();
        assert_eq!(parsed.question, "What is an ETF?");
        assert_eq!(parsed.answer, "An exchange-traded fund.");
    }

    #[test]
    fn memory_fields_tolerates_missing_keys() {
        let hit = SearchHit {
            id: json!("a"),
            distance: 0.7,
            fields: serde_json::Map::new(),
        };
        assert_eq!(hit.memory_fields(), MemoryFields::default());
    }
}
