use anyhow::Result;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

use crate::models::AudioSpeed;

/// Word pronunciation synthesis. The `Fixed` variant serves canned bytes so
/// handler tests never touch the network.
#[derive(Clone)]
pub enum AudioService {
    OpenAi(OpenAiSpeech),
    Fixed(Bytes),
}

impl AudioService {
    /// Synthesize a single spoken word as MP3 bytes.
    pub async fn synthesize(&self, word: &str, speed: AudioSpeed) -> Result<Bytes> {
        match self {
            AudioService::OpenAi(speech) => speech.synthesize(word, speed).await,
            AudioService::Fixed(bytes) => Ok(bytes.clone()),
        }
    }
}

#[derive(Clone)]
pub struct OpenAiSpeech {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest {
    model: String,
    input: String,
    voice: String,
    response_format: String,
    speed: f32,
}

impl OpenAiSpeech {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        }
    }

    async fn synthesize(&self, word: &str, speed: AudioSpeed) -> Result<Bytes> {
        let request_body = SpeechRequest {
            model: "tts-1".to_string(),
            input: word.to_string(),
            voice: "alloy".to_string(),
            response_format: "mp3".to_string(),
            speed: speed.multiplier(),
        };

        info!(
            word_length = word.len(),
            speed = speed.multiplier(),
            "Requesting speech synthesis"
        );

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
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
            error!(status = %status, error = %error_text, "Speech synthesis request failed");
            return Err(anyhow::anyhow!(
                "speech synthesis failed with status {}",
                status
            ));
        }

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_service_returns_canned_bytes() {
        let service = AudioService::Fixed(Bytes::from_static(b"mp3-bytes"));
        let bytes = service
            .synthesize("hola", AudioSpeed::Normal)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"mp3-bytes");
    }
}
