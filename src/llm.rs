//! Language model seam
//!
//! [`LanguageModel`] is what the pipeline talks to: a system instruction and a
//! prompt in, a stream of text tokens out. [`ChatCompletionClient`] implements
//! it over any OpenAI-compatible streaming chat endpoint.

use crate::config::LlmSettings;
use crate::error::{PrismError, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const DONE_MARKER: &str = "[DONE]";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stream the response tokens for `prompt`.
    async fn stream(&self, system: &str, prompt: &str) -> Result<BoxStream<'static, Result<String>>>;

    /// Collect the stream, reporting the accumulated text after every token.
    async fn complete_with(
        &self,
        system: &str,
        prompt: &str,
        on_partial: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String> {
        let mut tokens = self.stream(system, prompt).await?;
        let mut response = String::new();
        while let Some(token) = tokens.next().await {
            response.push_str(&token?);
            on_partial(&response);
        }
        Ok(response)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.complete_with(system, prompt, &mut |_: &str| {}).await
    }
}

/// One server-sent event as far as the chat protocol cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines, events and
/// multi-byte characters anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.take_line(line, &mut events);
        }
        events
    }

    /// Flush whatever the stream ended with.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.take_line(line.trim_end_matches('\r'), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn take_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(events);
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // comments (":") and other fields (event, id, retry) are not used
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        if self.data.is_empty() {
            return;
        }
        let data = self.data.join("\n");
        self.data.clear();
        if data.trim() == DONE_MARKER {
            events.push(SseEvent::Done);
        } else {
            events.push(SseEvent::Data(data));
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Token carried by one streamed chat chunk, if any.
pub fn parse_chunk(payload: &str) -> Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| PrismError::Llm(format!("Malformed stream chunk: {}", e)))?;
    if let Some(error) = chunk.error {
        return Err(PrismError::Llm(format!("Model reported an error: {}", error)));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty()))
}

struct TokenState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    done: bool,
}

impl TokenState {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.done {
                break;
            }
            match event {
                SseEvent::Done => self.done = true,
                SseEvent::Data(payload) => match parse_chunk(&payload) {
                    Ok(Some(token)) => self.pending.push_back(Ok(token)),
                    Ok(None) => {}
                    Err(e) => self.pending.push_back(Err(e)),
                },
            }
        }
    }
}

/// Streaming client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            ..Self::new(settings.base_url.clone(), settings.model.clone())
        }
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionClient {
    async fn stream(&self, system: &str, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url);
        info!("Requesting completion from {} ({})", self.model, url);
        debug!("Prompt:\n{}", prompt);

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        } else {
            warn!("No API key configured for {}", url);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PrismError::Llm(format!("Chat completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PrismError::Llm(format!(
                "Chat completion returned {}: {}",
                status, text
            )));
        }

        let state = TokenState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let tokens = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let events = state.decoder.push(&chunk);
                        state.absorb(events);
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(PrismError::Llm(format!("Stream interrupted: {}", e))),
                            state,
                        ));
                    }
                    None => {
                        let events = state.decoder.finish();
                        state.absorb(events);
                        state.done = true;
                    }
                }
            }
        });

        Ok(tokens.boxed())
    }
}
