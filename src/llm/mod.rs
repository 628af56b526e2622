//! Language model gateway
//!
//! The orchestration graph talks to the model through the [`LanguageModel`]
//! trait: plain completion, a streaming variant, and — via
//! [`complete_structured`] — completion into a serde-typed value with a
//! lenient JSON extractor in between. Validation failures surface as
//! [`AgentError::StructuredOutputError`] so callers can take the
//! conservative branch instead of retrying forever.

pub mod openai;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::de::DeserializeOwned;
use std::pin::Pin;

use crate::errors::{AgentError, Result};
use crate::state::ChatTurn;

/// Stream of completion text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Trait for language model gateways.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Runs a completion over the given turns and returns the full text.
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String>;

    /// Streaming variant. The default implementation completes eagerly and
    /// yields the whole text as a single chunk, so non-streaming backends
    /// stay drop-in.
    async fn complete_stream(&self, turns: &[ChatTurn]) -> Result<TextStream> {
        let text = self.complete(turns).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

/// Completes into a schema-typed value.
///
/// The model is expected to emit a JSON object (the prompt instructs it
/// to); this tolerates code fences and surrounding prose.
pub async fn complete_structured<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    turns: &[ChatTurn],
) -> Result<T> {
    let raw = model.complete(turns).await?;
    parse_structured(&raw)
}

/// Extracts and deserializes the first JSON object found in raw model
/// output. Tries, in order: the whole text, a fenced ```json block, the
/// outermost `{...}` span.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    if let Some(block) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<T>(block) {
            return Ok(value);
        }
    }

    if let Some(span) = extract_object_span(trimmed) {
        if let Ok(value) = serde_json::from_str::<T>(span) {
            return Ok(value);
        }
    }

    Err(AgentError::structured_output(raw))
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn extract_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}
