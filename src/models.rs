use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Generation lifecycle status, stored as lowercase text.
///
/// Every stored status must map onto exactly one variant; text that does not
/// parse is treated as data corruption by the lifecycle coordinator, never as
/// a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Created,
    Pending,
    Complete,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Created => "created",
            GenerationStatus::Pending => "pending",
            GenerationStatus::Complete => "complete",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(GenerationStatus::Created),
            "pending" => Some(GenerationStatus::Pending),
            "complete" => Some(GenerationStatus::Complete),
            "failed" => Some(GenerationStatus::Failed),
            _ => None,
        }
    }
}

/// The two generated resource kinds. The storage layer and the coordinators
/// are parameterized over this instead of duplicating per-kind code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Flashcards,
    Quiz,
}

impl ResourceKind {
    pub fn table(&self) -> &'static str {
        match self {
            ResourceKind::Flashcards => "flashcards",
            ResourceKind::Quiz => "quizzes",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Flashcards => "flashcard set",
            ResourceKind::Quiz => "quiz",
        }
    }

    /// Validate a stored or freshly generated payload against this kind's
    /// output schema.
    pub fn validate_payload(&self, payload: &Value) -> Result<(), String> {
        match self {
            ResourceKind::Flashcards => FlashcardSet::validate(payload).map(|_| ()),
            ResourceKind::Quiz => QuizSet::validate(payload).map(|_| ()),
        }
    }
}

/// One stored flashcard-set or quiz generation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub phrase: String,
    pub status: GenerationStatus,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardItem {
    pub word: String,
    pub translation: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardSet {
    pub name: String,
    pub phrase: String,
    pub items: Vec<FlashcardItem>,
}

impl FlashcardSet {
    pub fn validate(payload: &Value) -> Result<FlashcardSet, String> {
        let set: FlashcardSet = serde_json::from_value(payload.clone())
            .map_err(|e| format!("flashcard payload does not match schema: {}", e))?;
        if set.items.is_empty() {
            return Err("flashcard payload has no items".to_string());
        }
        Ok(set)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSet {
    pub questions: Vec<QuizQuestion>,
}

impl QuizSet {
    pub fn validate(payload: &Value) -> Result<QuizSet, String> {
        let set: QuizSet = serde_json::from_value(payload.clone())
            .map_err(|e| format!("quiz payload does not match schema: {}", e))?;
        if set.questions.is_empty() {
            return Err("quiz payload has no questions".to_string());
        }
        for (i, q) in set.questions.iter().enumerate() {
            if q.options.len() < 3 || q.options.len() > 4 {
                return Err(format!(
                    "question {} has {} options, expected 3-4",
                    i,
                    q.options.len()
                ));
            }
            if q.correct_answer_index >= q.options.len() {
                return Err(format!(
                    "question {} answer index {} out of bounds",
                    i, q.correct_answer_index
                ));
            }
        }
        Ok(set)
    }
}

// Request/response DTOs

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePhraseRequest {
    pub phrase: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedRecord {
    pub id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchFlashcardsRequest {
    pub flashcards_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchQuizRequest {
    pub quiz_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub phrase: String,
}

/// Playback speed for word pronunciation audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSpeed {
    Slow,
    Normal,
    Fast,
}

impl AudioSpeed {
    pub fn multiplier(&self) -> f32 {
        match self {
            AudioSpeed::Slow => 0.7,
            AudioSpeed::Normal => 1.0,
            AudioSpeed::Fast => 1.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioParams {
    pub flashcard_id: Uuid,
    pub word: String,
    pub speed: AudioSpeed,
}
