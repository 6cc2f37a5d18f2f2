use anyhow::Result;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::models::*;

/// Maximum rows returned by history and random review-set queries.
const LIST_LIMIT: i64 = 10;

/// Service owning record creation, dedup, and list queries. Generation-state
/// mutations go through the lifecycle coordinator, which calls back into the
/// `Database` via this service's thin passthroughs.
#[derive(Clone)]
pub struct RecordService {
    db: Database,
}

impl RecordService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Decide creation vs. reuse for a submitted phrase.
    ///
    /// The phrase is trimmed first; the most recent record matching
    /// `(phrase, owner)` is the canonical dedup target and is returned
    /// without mutating its status. Otherwise a fresh record is created in
    /// `created` status.
    pub async fn create_or_reuse(
        &self,
        kind: ResourceKind,
        phrase: &str,
        owner_id: Option<&str>,
    ) -> Result<GenerationRecord, crate::errors::ApiError> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(crate::errors::ApiError::ValidationError(
                "phrase is required".to_string(),
            ));
        }

        if let Some(existing) = self
            .db
            .find_latest_by_phrase(kind, phrase, owner_id)
            .await
            .map_err(crate::errors::ApiError::DatabaseError)?
        {
            debug!(
                record_id = %existing.id,
                kind = kind.label(),
                "Reusing existing record for phrase"
            );
            return Ok(existing);
        }

        let record = self
            .db
            .insert_record(kind, phrase, owner_id)
            .await
            .map_err(crate::errors::ApiError::DatabaseError)?;

        info!(
            record_id = %record.id,
            kind = kind.label(),
            owner = ?owner_id,
            "Created new generation record"
        );

        Ok(record)
    }

    pub async fn get_record(
        &self,
        kind: ResourceKind,
        id: Uuid,
        owner_id: Option<&str>,
    ) -> Result<Option<GenerationRecord>> {
        self.db.get_record(kind, id, owner_id).await
    }

    pub async fn set_status(
        &self,
        kind: ResourceKind,
        id: Uuid,
        status: GenerationStatus,
    ) -> Result<()> {
        self.db.set_status(kind, id, status).await
    }

    pub async fn complete_record(
        &self,
        kind: ResourceKind,
        id: Uuid,
        owner_id: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        self.db.complete_record(kind, id, owner_id, payload).await
    }

    /// Up to 10 most recent `{id, phrase}` pairs for the owner, newest first.
    pub async fn history(&self, kind: ResourceKind, owner_id: &str) -> Result<Vec<HistoryEntry>> {
        self.db.history(kind, owner_id, LIST_LIMIT).await
    }

    /// Build an ad-hoc review set: up to 10 random complete flashcard
    /// records for the owner, one randomly chosen item from each.
    pub async fn random_review_set(&self, owner_id: &str) -> Result<Value> {
        let records = self
            .db
            .random_complete_records(ResourceKind::Flashcards, owner_id, LIST_LIMIT)
            .await?;

        let mut rng = rand::thread_rng();
        let mut items = Vec::new();
        for record in records {
            let Some(payload) = record.payload else {
                continue;
            };
            let Ok(set) = FlashcardSet::validate(&payload) else {
                debug!(record_id = %record.id, "Skipping record with invalid payload in review set");
                continue;
            };
            let idx = rng.gen_range(0..set.items.len());
            items.push(serde_json::to_value(&set.items[idx])?);
        }

        Ok(json!({
            "name": "random",
            "phrase": "random",
            "items": items,
        }))
    }
}
