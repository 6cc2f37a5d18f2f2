use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::*;

/// A stored status value that does not parse as any known
/// `GenerationStatus`. Surfaced to the lifecycle coordinator, which maps it
/// to the unhandled-status response.
#[derive(Debug, thiserror::Error)]
#[error("record {id} has unhandled status '{status}'")]
pub struct UnhandledStatusError {
    pub id: Uuid,
    pub status: String,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for kind in [ResourceKind::Flashcards, ResourceKind::Quiz] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT,
                    phrase TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'created',
                    payload TEXT,
                    created_at TEXT NOT NULL
                );
                "#,
                kind.table()
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Direct pool access, mainly for tests that need to poke at raw rows.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new record with status `created`. A write that affects no
    /// rows is a fatal error, not something to retry.
    pub async fn insert_record(
        &self,
        kind: ResourceKind,
        phrase: &str,
        owner_id: Option<&str>,
    ) -> Result<GenerationRecord> {
        let record = GenerationRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.map(|s| s.to_string()),
            phrase: phrase.to_string(),
            status: GenerationStatus::Created,
            payload: None,
            created_at: Utc::now(),
        };

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, owner_id, phrase, status, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            kind.table()
        ))
        .bind(record.id.to_string())
        .bind(&record.owner_id)
        .bind(&record.phrase)
        .bind(record.status.as_str())
        .bind(Option::<String>::None)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(anyhow!("{} creation failed", kind.label()));
        }

        Ok(record)
    }

    /// Fetch a record by id, scoped to the owner when one is known. An
    /// owner-scoped lookup never returns another owner's record.
    pub async fn get_record(
        &self,
        kind: ResourceKind,
        id: Uuid,
        owner_id: Option<&str>,
    ) -> Result<Option<GenerationRecord>> {
        let row = match owner_id {
            Some(owner) => {
                sqlx::query(&format!(
                    "SELECT * FROM {} WHERE id = ?1 AND owner_id = ?2",
                    kind.table()
                ))
                .bind(id.to_string())
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT * FROM {} WHERE id = ?1", kind.table()))
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.map(row_to_record).transpose()
    }

    /// Most recent record for a `(phrase, owner)` pair, the canonical match
    /// for dedup. Anonymous lookups only match anonymous records.
    pub async fn find_latest_by_phrase(
        &self,
        kind: ResourceKind,
        phrase: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<GenerationRecord>> {
        let row = match owner_id {
            Some(owner) => {
                sqlx::query(&format!(
                    "SELECT * FROM {} WHERE phrase = ?1 AND owner_id = ?2 \
                     ORDER BY created_at DESC LIMIT 1",
                    kind.table()
                ))
                .bind(phrase)
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT * FROM {} WHERE phrase = ?1 AND owner_id IS NULL \
                     ORDER BY created_at DESC LIMIT 1",
                    kind.table()
                ))
                .bind(phrase)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(row_to_record).transpose()
    }

    pub async fn set_status(
        &self,
        kind: ResourceKind,
        id: Uuid,
        status: GenerationStatus,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET status = ?1 WHERE id = ?2",
            kind.table()
        ))
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the final generated payload and flip the record to `complete`
    /// in a single write, scoped by owner when one is known.
    pub async fn complete_record(
        &self,
        kind: ResourceKind,
        id: Uuid,
        owner_id: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        let payload_text = serde_json::to_string(payload)?;
        match owner_id {
            Some(owner) => {
                sqlx::query(&format!(
                    "UPDATE {} SET payload = ?1, status = 'complete' \
                     WHERE id = ?2 AND owner_id = ?3",
                    kind.table()
                ))
                .bind(payload_text)
                .bind(id.to_string())
                .bind(owner)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(&format!(
                    "UPDATE {} SET payload = ?1, status = 'complete' WHERE id = ?2",
                    kind.table()
                ))
                .bind(payload_text)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Overwrite a record's payload without touching its status. Used to
    /// reproduce the older persist-then-promote write shape and by tests.
    pub async fn set_payload(&self, kind: ResourceKind, id: Uuid, payload: &Value) -> Result<()> {
        let payload_text = serde_json::to_string(payload)?;
        sqlx::query(&format!(
            "UPDATE {} SET payload = ?1 WHERE id = ?2",
            kind.table()
        ))
        .bind(payload_text)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent records for an owner, newest first.
    pub async fn history(
        &self,
        kind: ResourceKind,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT id, phrase FROM {} WHERE owner_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2",
            kind.table()
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(HistoryEntry {
                id: Uuid::parse_str(&row.get::<String, _>("id"))?,
                phrase: row.get("phrase"),
            });
        }

        Ok(entries)
    }

    /// Random sample of an owner's complete records.
    pub async fn random_complete_records(
        &self,
        kind: ResourceKind,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<GenerationRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE owner_id = ?1 AND status = 'complete' \
             ORDER BY RANDOM() LIMIT ?2",
            kind.table()
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: SqliteRow) -> Result<GenerationRecord> {
    let id = Uuid::parse_str(&row.get::<String, _>("id"))?;

    let status_raw: String = row.get("status");
    let status = GenerationStatus::parse(&status_raw).ok_or(UnhandledStatusError {
        id,
        status: status_raw,
    })?;

    // Stored payload text that is not valid JSON still counts as "payload
    // present"; it is kept as a raw string so schema validation can fail it.
    let payload = row
        .get::<Option<String>, _>("payload")
        .map(|text| serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text)));

    Ok(GenerationRecord {
        id,
        owner_id: row.get("owner_id"),
        phrase: row.get("phrase"),
        status,
        payload,
        created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))?
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_record() {
        let db = test_db().await;
        let record = db
            .insert_record(ResourceKind::Flashcards, "hola amigo", Some("user-1"))
            .await
            .unwrap();

        assert_eq!(record.status, GenerationStatus::Created);
        assert!(record.payload.is_none());

        let fetched = db
            .get_record(ResourceKind::Flashcards, record.id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.phrase, "hola amigo");
        assert_eq!(fetched.owner_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_owner_scoped_get_hides_foreign_records() {
        let db = test_db().await;
        let record = db
            .insert_record(ResourceKind::Quiz, "bonjour", Some("owner-a"))
            .await
            .unwrap();

        let other = db
            .get_record(ResourceKind::Quiz, record.id, Some("owner-b"))
            .await
            .unwrap();
        assert!(other.is_none());

        let same = db
            .get_record(ResourceKind::Quiz, record.id, Some("owner-a"))
            .await
            .unwrap();
        assert!(same.is_some());
    }

    #[tokio::test]
    async fn test_find_latest_by_phrase_scoping() {
        let db = test_db().await;
        db.insert_record(ResourceKind::Flashcards, "ciao", Some("owner-a"))
            .await
            .unwrap();
        let anon = db
            .insert_record(ResourceKind::Flashcards, "ciao", None)
            .await
            .unwrap();

        // Anonymous lookup must not see owned records.
        let found = db
            .find_latest_by_phrase(ResourceKind::Flashcards, "ciao", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, anon.id);

        let missing = db
            .find_latest_by_phrase(ResourceKind::Flashcards, "ciao", Some("owner-c"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_complete_record_single_write() {
        let db = test_db().await;
        let record = db
            .insert_record(ResourceKind::Quiz, "hallo", None)
            .await
            .unwrap();

        let payload = json!({
            "questions": [
                {"question": "q", "options": ["a", "b", "c"], "correct_answer_index": 0}
            ]
        });
        db.complete_record(ResourceKind::Quiz, record.id, None, &payload)
            .await
            .unwrap();

        let fetched = db
            .get_record(ResourceKind::Quiz, record.id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, GenerationStatus::Complete);
        assert_eq!(fetched.payload.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_unknown_status_surfaces_as_unhandled() {
        let db = test_db().await;
        let record = db
            .insert_record(ResourceKind::Flashcards, "salut", None)
            .await
            .unwrap();

        sqlx::query("UPDATE flashcards SET status = 'archived' WHERE id = ?1")
            .bind(record.id.to_string())
            .execute(db.pool())
            .await
            .unwrap();

        let err = db
            .get_record(ResourceKind::Flashcards, record.id, None)
            .await
            .unwrap_err();
        let unhandled = err.downcast_ref::<UnhandledStatusError>().unwrap();
        assert_eq!(unhandled.status, "archived");
    }

    #[tokio::test]
    async fn test_history_ordering_and_limit() {
        let db = test_db().await;
        for i in 0..12 {
            db.insert_record(ResourceKind::Flashcards, &format!("phrase {}", i), Some("u"))
                .await
                .unwrap();
        }

        let entries = db.history(ResourceKind::Flashcards, "u", 10).await.unwrap();
        assert_eq!(entries.len(), 10);
    }

    #[tokio::test]
    async fn test_random_complete_only_returns_complete() {
        let db = test_db().await;
        let complete = db
            .insert_record(ResourceKind::Flashcards, "done", Some("u"))
            .await
            .unwrap();
        db.complete_record(
            ResourceKind::Flashcards,
            complete.id,
            Some("u"),
            &json!({"name": "n", "phrase": "done", "items": [
                {"word": "w", "translation": "t", "note": "n"}
            ]}),
        )
        .await
        .unwrap();
        db.insert_record(ResourceKind::Flashcards, "not done", Some("u"))
            .await
            .unwrap();

        let rows = db
            .random_complete_records(ResourceKind::Flashcards, "u", 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, complete.id);
    }
}
