use anyhow::Result;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

/// A lazy, finite, non-restartable sequence of text chunks from a provider.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

/// Enum-based LLM provider implementation. The `Fixed` variant replays
/// canned chunks and exists for tests and offline runs.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAi(OpenAiProvider),
    Gemini(GeminiProvider),
    Fixed(FixedProvider),
}

impl LlmProvider {
    /// Start a streaming completion request with an optional system message.
    pub async fn stream_request(
        &self,
        system_message: Option<&str>,
        prompt: &str,
    ) -> Result<ChunkStream> {
        match self {
            LlmProvider::OpenAi(provider) => provider.stream_request(system_message, prompt).await,
            LlmProvider::Gemini(provider) => provider.stream_request(system_message, prompt).await,
            LlmProvider::Fixed(provider) => provider.stream_request().await,
        }
    }

    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi(_) => "OpenAI",
            LlmProvider::Gemini(_) => "Gemini",
            LlmProvider::Fixed(_) => "Fixed",
        }
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        match self {
            LlmProvider::OpenAi(provider) => &provider.model,
            LlmProvider::Gemini(provider) => &provider.model,
            LlmProvider::Fixed(_) => "fixed",
        }
    }
}

/// What an SSE `data:` line contributed to the stream.
enum SseEvent {
    Text(String),
    Done,
    Skip,
}

/// Drive a server-sent-event response body line by line, forwarding
/// extracted text chunks into the channel. Lines are split on `\n` before
/// UTF-8 conversion so multi-byte characters never straddle a chunk
/// boundary.
fn spawn_sse_reader<F>(response: reqwest::Response, tx: mpsc::Sender<Result<String>>, extract: F)
where
    F: Fn(&str) -> SseEvent + Send + 'static,
{
    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(Err(anyhow::Error::from(e))).await;
                    return;
                }
            };
            buf.extend_from_slice(&bytes);

            while let Some(pos) = buf.iter().position(|&c| c == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                match extract(data.trim()) {
                    SseEvent::Text(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    SseEvent::Done => return,
                    SseEvent::Skip => {}
                }
            }
        }
    });
}

/// OpenAI provider implementation
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<LlmMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
        }
    }

    pub async fn stream_request(
        &self,
        system_message: Option<&str>,
        prompt: &str,
    ) -> Result<ChunkStream> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            messages.push(LlmMessage {
                role: "system".to_string(),
                content: sys_msg.to_string(),
            });
        }

        messages.push(LlmMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request_body = OpenAiRequest {
            model: self.model.clone(),
            messages,
            stream: true,
        };

        info!(
            provider = "OpenAI",
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Starting streaming LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = "OpenAI",
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(anyhow::anyhow!("OpenAI API request failed: {}", error_text));
        }

        let (tx, rx) = mpsc::channel(32);
        spawn_sse_reader(response, tx, |data| {
            if data == "[DONE]" {
                return SseEvent::Done;
            }
            match serde_json::from_str::<OpenAiStreamChunk>(data) {
                Ok(chunk) => match chunk.choices.first().and_then(|c| c.delta.content.clone()) {
                    Some(text) => SseEvent::Text(text),
                    None => SseEvent::Skip,
                },
                Err(_) => SseEvent::Skip,
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Gemini provider implementation
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiStreamChunk {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.unwrap_or_else(|| "gemini-2.0-flash-exp".to_string()),
        }
    }

    pub async fn stream_request(
        &self,
        system_message: Option<&str>,
        prompt: &str,
    ) -> Result<ChunkStream> {
        let full_prompt = match system_message {
            Some(sys_msg) => format!("{}\n\n{}", sys_msg, prompt),
            None => prompt.to_string(),
        };

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: full_prompt }],
            }],
        };

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );

        info!(
            provider = "Gemini",
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Starting streaming LLM request"
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = "Gemini",
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(anyhow::anyhow!("Gemini API request failed: {}", error_text));
        }

        let (tx, rx) = mpsc::channel(32);
        spawn_sse_reader(response, tx, |data| {
            match serde_json::from_str::<GeminiStreamChunk>(data) {
                Ok(chunk) => {
                    let text = chunk
                        .candidates
                        .first()
                        .and_then(|c| c.content.parts.first())
                        .map(|p| p.text.clone());
                    match text {
                        Some(text) => SseEvent::Text(text),
                        None => SseEvent::Skip,
                    }
                }
                Err(_) => SseEvent::Skip,
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Replays a fixed chunk sequence, optionally ending in a failure.
#[derive(Debug, Clone, Default)]
pub struct FixedProvider {
    chunks: Vec<String>,
    fail_with: Option<String>,
}

impl FixedProvider {
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            chunks,
            fail_with: None,
        }
    }

    /// A provider whose stream ends in the given error after replaying any
    /// configured chunks.
    pub fn failing(message: &str) -> Self {
        Self {
            chunks: Vec::new(),
            fail_with: Some(message.to_string()),
        }
    }

    pub async fn stream_request(&self) -> Result<ChunkStream> {
        let mut items: Vec<Result<String>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.fail_with {
            items.push(Err(anyhow::anyhow!("{}", message)));
        }
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LlmProviderFactory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LlmProviderType {
    OpenAi,
    Gemini,
}

impl LlmProviderFactory {
    /// Create a new LLM provider instance based on provider type
    pub fn create_provider(
        provider_type: LlmProviderType,
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
    ) -> LlmProvider {
        match provider_type {
            LlmProviderType::OpenAi => {
                LlmProvider::OpenAi(OpenAiProvider::new(api_key, base_url, model))
            }
            LlmProviderType::Gemini => {
                LlmProvider::Gemini(GeminiProvider::new(api_key, base_url, model))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_provider_replays_chunks() {
        let provider = LlmProvider::Fixed(FixedProvider::new(vec![
            "{\"a\":".to_string(),
            " 1}".to_string(),
        ]));
        let mut stream = provider.stream_request(None, "ignored").await.unwrap();

        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "{\"a\": 1}");
    }

    #[tokio::test]
    async fn test_fixed_provider_failure_terminates_stream() {
        let provider = LlmProvider::Fixed(FixedProvider::failing("provider exploded"));
        let mut stream = provider.stream_request(None, "ignored").await.unwrap();

        let item = stream.next().await.unwrap();
        assert!(item.is_err());
    }

    #[test]
    fn test_provider_defaults() {
        let provider = LlmProviderFactory::create_provider(
            LlmProviderType::OpenAi,
            "sk-test".to_string(),
            None,
            None,
        );
        assert_eq!(provider.provider_name(), "OpenAI");
        assert_eq!(provider.model_name(), "gpt-4o-mini");

        let provider = LlmProviderFactory::create_provider(
            LlmProviderType::Gemini,
            "key".to_string(),
            None,
            None,
        );
        assert_eq!(provider.provider_name(), "Gemini");
        assert_eq!(provider.model_name(), "gemini-2.0-flash-exp");
    }
}
