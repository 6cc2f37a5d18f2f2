use anyhow::Result;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::llm_providers::LlmProvider;
use crate::models::ResourceKind;
use crate::partial_json::complete_truncated;

/// Progress of one structured-output generation.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// A repaired snapshot of the object built so far. Only emitted when it
    /// differs from the previous snapshot.
    Partial(Value),
    /// Terminal: the final object parsed and passed schema validation.
    Completed(Value),
    /// Terminal: the provider errored or the final text failed validation.
    Failed(String),
}

/// Drives LLM streaming for flashcard and quiz payloads. The raw text stream
/// is accumulated and periodically repaired into partial objects; the final
/// text must parse cleanly and satisfy the payload schema for the kind.
#[derive(Clone)]
pub struct GenerationService {
    provider: LlmProvider,
}

impl GenerationService {
    pub fn new(provider: LlmProvider) -> Self {
        Self { provider }
    }

    fn system_message(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Flashcards => {
                "You are an expert language teacher with deep insights into language \
                 instruction. Respond only with a single JSON object, no prose and no \
                 code fences."
            }
            ResourceKind::Quiz => {
                "You are an excellent language teacher. Respond only with a single \
                 JSON object, no prose and no code fences."
            }
        }
    }

    fn build_prompt(kind: ResourceKind, phrase: &str) -> String {
        match kind {
            ResourceKind::Flashcards => format!(
                r#"Create flashcards for the phrase provided, where each flashcard shows a word and its translation. Phrase: {phrase}

Instructions:
1. Only respond with basic level English.
2. If the phrase is in English, provide flashcards with explanations in basic English to learn that English phrase.

Output format (JSON):
{{
  "name": "short title for the set",
  "phrase": "the phrase",
  "items": [
    {{"word": "...", "translation": "...", "note": "short usage note"}}
  ]
}}"#
            ),
            ResourceKind::Quiz => format!(
                r#"Create a quiz based on the following phrase: "{phrase}".

Instructions:
1. Construct a set of 10 multiple-choice questions.
2. Vary the question types (e.g., translation, fill-in-the-blank, conjugation).
3. For each question provide 3-4 options and indicate the correct answer by its index.

Output format (JSON):
{{
  "questions": [
    {{
      "question": "Question text?",
      "options": ["Option 1", "Option 2", "Option 3", "Option 4"],
      "correct_answer_index": 1
    }}
  ]
}}"#
            ),
        }
    }

    /// Start a generation and return its event channel. The last event on
    /// the channel is always `Completed` or `Failed`; the channel then
    /// closes. Consumers that only care about the outcome can skip partials.
    pub async fn generate(
        &self,
        kind: ResourceKind,
        phrase: &str,
    ) -> Result<mpsc::Receiver<GenerationEvent>> {
        let prompt = Self::build_prompt(kind, phrase);
        let mut chunks = self
            .provider
            .stream_request(Some(Self::system_message(kind)), &prompt)
            .await?;

        info!(
            provider = self.provider.provider_name(),
            model = self.provider.model_name(),
            kind = kind.label(),
            "Generation stream started"
        );

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut accumulated = String::new();
            let mut last_partial: Option<Value> = None;

            while let Some(chunk) = chunks.next().await {
                let text = match chunk {
                    Ok(text) => text,
                    Err(e) => {
                        error!(kind = kind.label(), error = %e, "Provider stream failed");
                        let _ = tx.send(GenerationEvent::Failed(e.to_string())).await;
                        return;
                    }
                };
                accumulated.push_str(&text);

                let Some(partial) = complete_truncated(&accumulated) else {
                    continue;
                };
                if last_partial.as_ref() == Some(&partial) {
                    continue;
                }
                last_partial = Some(partial.clone());
                // Receiver gone means the client hung up; keep draining so
                // the accumulated text still reaches the terminal check.
                let _ = tx.send(GenerationEvent::Partial(partial)).await;
            }

            let event = match finalize(kind, &accumulated) {
                Ok(payload) => {
                    debug!(kind = kind.label(), "Generation finished with valid payload");
                    GenerationEvent::Completed(payload)
                }
                Err(reason) => {
                    error!(kind = kind.label(), reason = %reason, "Generation output rejected");
                    GenerationEvent::Failed(reason)
                }
            };
            let _ = tx.send(event).await;
        });

        Ok(rx)
    }
}

/// Parse the full response text and check it against the payload schema.
fn finalize(kind: ResourceKind, text: &str) -> Result<Value, String> {
    let start = text
        .find('{')
        .ok_or_else(|| "response contained no JSON object".to_string())?;
    let end = text
        .rfind('}')
        .ok_or_else(|| "response contained no JSON object".to_string())?;
    if end < start {
        return Err("response contained no JSON object".to_string());
    }

    let payload: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| format!("response was not valid JSON: {}", e))?;
    kind.validate_payload(&payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_providers::FixedProvider;
    use serde_json::json;

    fn chunked(text: &str, size: usize) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            let mut cut = size.min(rest.len());
            while !rest.is_char_boundary(cut) {
                cut += 1;
            }
            chunks.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        chunks
    }

    async fn collect(mut rx: mpsc::Receiver<GenerationEvent>) -> Vec<GenerationEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    const FLASHCARDS_JSON: &str = r#"{"name": "Greetings", "phrase": "hola", "items": [{"word": "hola", "translation": "hello", "note": "informal greeting"}]}"#;

    #[tokio::test]
    async fn test_valid_stream_ends_with_completed() {
        let service = GenerationService::new(LlmProvider::Fixed(FixedProvider::new(chunked(
            FLASHCARDS_JSON,
            7,
        ))));

        let rx = service
            .generate(ResourceKind::Flashcards, "hola")
            .await
            .unwrap();
        let events = collect(rx).await;

        assert!(events.len() > 1, "expected partials before the terminal");
        match events.last().unwrap() {
            GenerationEvent::Completed(payload) => {
                assert_eq!(payload["name"], "Greetings");
                assert_eq!(payload["items"].as_array().unwrap().len(), 1);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        for event in &events[..events.len() - 1] {
            assert!(matches!(event, GenerationEvent::Partial(_)));
        }
    }

    #[tokio::test]
    async fn test_schema_violation_ends_with_failed() {
        // Parses fine but has no items, so the flashcard schema rejects it.
        let service = GenerationService::new(LlmProvider::Fixed(FixedProvider::new(vec![
            r#"{"name": "x", "phrase": "y", "items": []}"#.to_string(),
        ])));

        let rx = service
            .generate(ResourceKind::Flashcards, "y")
            .await
            .unwrap();
        let events = collect(rx).await;
        assert!(matches!(
            events.last().unwrap(),
            GenerationEvent::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_provider_error_ends_with_failed() {
        let service = GenerationService::new(LlmProvider::Fixed(FixedProvider::failing(
            "upstream unavailable",
        )));

        let rx = service.generate(ResourceKind::Quiz, "hola").await.unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            GenerationEvent::Failed(reason) => assert!(reason.contains("upstream")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prose_wrapped_json_still_finalizes() {
        let service = GenerationService::new(LlmProvider::Fixed(FixedProvider::new(vec![
            "Here is the quiz:\n".to_string(),
            json!({
                "questions": [{
                    "question": "What does 'hola' mean?",
                    "options": ["hello", "goodbye", "please"],
                    "correct_answer_index": 0
                }]
            })
            .to_string(),
        ])));

        let rx = service.generate(ResourceKind::Quiz, "hola").await.unwrap();
        let events = collect(rx).await;
        assert!(matches!(
            events.last().unwrap(),
            GenerationEvent::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_partials_are_deduplicated() {
        // Whitespace-only growth repairs to the same object each time.
        let service = GenerationService::new(LlmProvider::Fixed(FixedProvider::new(vec![
            r#"{"questions": ["#.to_string(),
            " ".to_string(),
            " ".to_string(),
            r#"{"question": "q?", "options": ["a", "b", "c"], "correct_answer_index": 2}]}"#
                .to_string(),
        ])));

        let rx = service.generate(ResourceKind::Quiz, "hola").await.unwrap();
        let events = collect(rx).await;

        let partials: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, GenerationEvent::Partial(_)))
            .collect();
        assert_eq!(partials.len(), 2);
    }
}
