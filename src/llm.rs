//! Reasoning-model client
//!
//! OpenAI-compatible chat completions used by both the query planner and
//! the answer synthesizer. Uses a long-lived reqwest::Client for
//! connection pooling and supports incremental token streaming.

use crate::error::SearchError;
use crate::Result;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// One chat message in reasoning-model wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Reasoning-model contract shared by planner and synthesizer.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;

    /// Streaming variant: forwards token deltas through `tokens` as they
    /// arrive and returns the assembled full text. A closed receiver means
    /// the surrounding request was canceled; forwarding stops and
    /// `SearchError::Canceled` is returned.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        tokens: mpsc::Sender<String>,
    ) -> Result<String> {
        let text = self.complete(messages, temperature, max_tokens).await?;
        if tokens.send(text.clone()).await.is_err() {
            return Err(SearchError::Canceled);
        }
        Ok(text)
    }
}

//
// ================= OpenAI-compatible client =================
//

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature,
            max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response> {
        if self.api_key.is_empty() {
            return Err(SearchError::Llm("OPENAI_API_KEY not configured".to_string()));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Reasoning model request failed: {}", e);
                SearchError::Llm(format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Reasoning model error response: {} {}", status, error_text);
            return Err(SearchError::Llm(format!("{}: {}", status, error_text)));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = self.request_body(messages, temperature, max_tokens, false);

        info!(model = %self.model, "Calling reasoning model");

        let response = self.send(&body).await?;
        let completion: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse reasoning model response: {}", e);
            SearchError::Llm(format!("parse error: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SearchError::Llm("empty response from reasoning model".to_string()))
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        tokens: mpsc::Sender<String>,
    ) -> Result<String> {
        let body = self.request_body(messages, temperature, max_tokens, true);

        info!(model = %self.model, "Calling reasoning model (streaming)");

        let response = self.send(&body).await?;
        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| SearchError::Llm(format!("stream read error: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // SSE events are separated by a blank line.
            while let Some(boundary) = buffer.find("\n\n") {
                let event = buffer[..boundary].to_string();
                buffer.drain(..boundary + 2);

                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return Ok(full_text);
                    }
                    let Ok(chunk) = serde_json::from_str::<ChatChunk>(data) else {
                        continue;
                    };
                    for choice in chunk.choices {
                        if let Some(delta) = choice.delta.content {
                            if delta.is_empty() {
                                continue;
                            }
                            full_text.push_str(&delta);
                            if tokens.send(delta).await.is_err() {
                                // Receiver gone: the request was canceled.
                                return Err(SearchError::Canceled);
                            }
                        }
                    }
                }
            }
        }

        Ok(full_text)
    }
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

//
// ================= Mock client =================
//

/// Scripted reasoning-model client for development & testing.
/// Keeps the pipeline functional without network access.
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn single(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| SearchError::Llm("mock poisoned".to_string()))?;
        match responses.pop_front() {
            Some(next) => {
                // Keep replaying the final scripted response.
                if responses.is_empty() {
                    responses.push_back(next.clone());
                }
                Ok(next)
            }
            None => Err(SearchError::Llm("mock has no scripted response".to_string())),
        }
    }
}
