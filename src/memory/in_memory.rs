//! In-memory vector store
//!
//! Exhaustive cosine-similarity scan over records held in process memory.
//! Data is lost when the process exits. Suitable for tests and local
//! development; deployments use the Milvus backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use super::{MemoryRecord, SearchHit, VectorStore};
use crate::errors::Result;

/// Cosine similarity of two vectors, in `[-1, 1]`.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-memory implementation of [`VectorStore`].
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection. Used by tests to assert the
    /// write-back-only-after-retrieval property.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, collection: &str, records: Vec<MemoryRecord>) -> Result<usize> {
        let count = records.len();
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(records);
        debug!("Inserted {} records into '{}'", count, collection);
        Ok(count)
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        field: &str,
        output_fields: &[&str],
        k: usize,
        _filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        // The only vector field this backend indexes.
        if field != "question_embedding" {
            return Ok(Vec::new());
        }

        let collections = self.collections.read();
        let records = match collections.get(collection) {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };

        let mut scored: Vec<(usize, f32)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, cosine_similarity(query_vector, &r.question_embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let hits = scored
            .into_iter()
            .map(|(i, distance)| {
                let record = &records[i];
                let mut fields = serde_json::Map::new();
                for &name in output_fields {
                    match name {
                        "question" => {
                            fields.insert(name.to_string(), json!(record.question));
                        }
                        "answer" => {
                            fields.insert(name.to_string(), json!(record.answer));
                        }
                        _ => {}
                    }
                }
                SearchHit {
                    id: Value::from(i as u64),
                    distance,
                    fields,
                }
            })
            .collect();

        Ok(hits)
    }
}
