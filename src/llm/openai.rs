//! OpenAI-compatible chat completions gateway
//!
//! Works against any endpoint speaking the `/chat/completions` wire format
//! (OpenAI, DashScope, vLLM, LiteLLM proxies, ...). Streaming uses the SSE
//! framing: `data: {chunk}` lines terminated by `data: [DONE]`.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{LanguageModel, TextStream};
use crate::config::LlmConfig;
use crate::errors::{AgentError, Result};
use crate::state::ChatTurn;

/// Gateway to an OpenAI-compatible chat completions API.
pub struct OpenAiGateway {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGateway {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(AgentError::ConfigError(
                "llm.base_url must not be empty".to_string(),
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(AgentError::HttpError)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn request_body<'a>(&'a self, turns: &'a [ChatTurn], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|t| WireMessage {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, turns: &[ChatTurn], stream: bool) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(turns, stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::llm(format!(
                "completion request failed with {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiGateway {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String> {
        debug!("Requesting completion over {} turns", turns.len());
        let response: ChatResponse = self.send(turns, false).await?.json().await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::llm("completion response contained no choices"))
    }

    async fn complete_stream(&self, turns: &[ChatTurn]) -> Result<TextStream> {
        debug!("Requesting streaming completion over {} turns", turns.len());
        let response = self.send(turns, true).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(AgentError::HttpError)?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let data = match line.trim().strip_prefix("data:") {
                        Some(rest) => rest.trim().to_string(),
                        None => continue,
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    if let Some(delta) = parse_stream_delta(&data) {
                        if !delta.is_empty() {
                            yield delta;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Pulls the delta content out of one SSE data payload. Malformed chunks
/// are skipped rather than failing the whole stream.
fn parse_stream_delta(data: &str) -> Option<String> {
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    chunk.choices.into_iter().next()?.delta.content
}
