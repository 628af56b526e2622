//! Milvus-backed vector store
//!
//! Talks to a Milvus deployment over its v2 REST API. Cosine is the only
//! metric this engine uses, so it is fixed in the search params.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{MemoryRecord, SearchHit, VectorStore};
use crate::config::MemoryConfig;
use crate::errors::{AgentError, Result};

/// Milvus implementation of [`VectorStore`].
pub struct MilvusVectorStore {
    http: Client,
    base_url: String,
    database: String,
}

/// Envelope every Milvus v2 REST response is wrapped in.
#[derive(Debug, Deserialize)]
struct RestResponse<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InsertData {
    #[serde(rename = "insertCount", default)]
    insert_count: usize,
}

impl MilvusVectorStore {
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        if config.milvus_url.is_empty() {
            return Err(AgentError::ConfigError(
                "memory.milvus_url must not be empty".to_string(),
            ));
        }
        let http = Client::builder()
            .build()
            .map_err(AgentError::HttpError)?;
        Ok(Self {
            http,
            base_url: config.milvus_url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v2/vectordb/entities/{}", self.base_url, path)
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let response = self
            .http
            .post(self.endpoint(path))
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(AgentError::HttpError)?;

        let envelope: RestResponse<T> = response.json().await?;
        if envelope.code != 0 {
            return Err(AgentError::vector_store(format!(
                "Milvus returned code {}: {}",
                envelope.code,
                envelope.message.unwrap_or_default()
            )));
        }
        envelope
            .data
            .ok_or_else(|| AgentError::vector_store("Milvus response had no data payload"))
    }
}

#[async_trait]
impl VectorStore for MilvusVectorStore {
    async fn insert(&self, collection: &str, records: Vec<MemoryRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let total = records.len();
        let body = json!({
            "dbName": self.database,
            "collectionName": collection,
            "data": records,
        });
        let data: InsertData = self.post("insert", body).await?;
        info!(
            "Inserted {}/{} records into '{}'",
            data.insert_count, total, collection
        );
        Ok(data.insert_count)
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        field: &str,
        output_fields: &[&str],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let body = json!({
            "dbName": self.database,
            "collectionName": collection,
            "data": [query_vector],
            "annsField": field,
            "limit": k,
            "outputFields": output_fields,
            "filter": filter.unwrap_or(""),
            "searchParams": {"metricType": "COSINE"},
        });

        let rows: Vec<serde_json::Map<String, Value>> = self.post("search", body).await?;
        let hits: Vec<SearchHit> = rows.into_iter().map(parse_hit).collect();
        debug!("Found {} hits in '{}'", hits.len(), collection);
        Ok(hits)
    }
}

/// Milvus returns each hit as a flat object: `id` and `distance` beside the
/// requested output fields.
fn parse_hit(mut row: serde_json::Map<String, Value>) -> SearchHit {
    let id = row.remove("id").unwrap_or(Value::Null);
    let distance = row
        .remove("distance")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as f32;
    SearchHit {
        id,
        distance,
        fields: row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hit_splits_id_and_distance_from_fields() {
        let row: serde_json::Map<String, Value> = serde_json::from_str(
            r#"{"id": 7, "distance": 0.87, "question": "q?", "answer": "a."}"#,
        )
        .unwrap();

        let hit = parse_hit(row);
        assert_eq!(hit.id, json!(7));
        assert!((hit.distance - 0.87).abs() < 1e-6);
        assert_eq!(hit.fields.get("question"), Some(&json!("q?")));
        assert_eq!(hit.fields.get("answer"), Some(&json!("a.")));
        assert!(!hit.fields.contains_key("distance"));
    }

    #[test]
    fn error_envelope_is_rejected() {
        let envelope: RestResponse<InsertData> =
            serde_json::from_str(r#"{"code": 1100, "message": "collection not found"}"#).unwrap();
        assert_eq!(envelope.code, 1100);
        assert!(envelope.data.is_none());
    }

    #[test]
    fn insert_count_deserializes() {
        let envelope: RestResponse<InsertData> =
            serde_json::from_str(r#"{"code": 0, "data": {"insertCount": 2, "insertIds": [1, 2]}}"#)
                .unwrap();
        assert_eq!(envelope.data.unwrap().insert_count, 2);
    }
}
