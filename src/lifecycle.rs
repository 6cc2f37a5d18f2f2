use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::UnhandledStatusError;
use crate::errors::ApiError;
use crate::generation::{GenerationEvent, GenerationService};
use crate::models::{GenerationStatus, ResourceKind};
use crate::record_service::RecordService;

/// In-process leases preventing two generations for the same record id.
///
/// A lease is held for the whole lifetime of the driver task and released on
/// drop, so a panicked or cancelled generation never wedges the id.
#[derive(Clone, Default)]
pub struct GenerationLocks {
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl GenerationLocks {
    pub fn try_acquire(&self, id: Uuid) -> Option<GenerationLease> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if active.insert(id) {
            Some(GenerationLease {
                id,
                active: Arc::clone(&self.active),
            })
        } else {
            None
        }
    }
}

pub struct GenerationLease {
    id: Uuid,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for GenerationLease {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// What a fetch resolved to.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The record was already complete; serve the stored payload.
    Cached(Value),
    /// The record was pending with a usable payload and has been promoted
    /// to complete; serve the stored payload.
    Promoted(Value),
    /// A fresh generation was started; events arrive on the channel and the
    /// outcome is persisted regardless of whether the channel is drained.
    Streaming(mpsc::Receiver<GenerationEvent>),
}

/// Coordinates the created -> pending -> complete/failed state machine.
///
/// All fetches funnel through [`fetch_or_generate`], which reads the record
/// once and dispatches on its status. Persistence of a finished generation
/// happens in a spawned driver task, so a client that disconnects mid-stream
/// still gets its record completed.
///
/// [`fetch_or_generate`]: LifecycleCoordinator::fetch_or_generate
#[derive(Clone)]
pub struct LifecycleCoordinator {
    records: RecordService,
    generator: GenerationService,
    locks: GenerationLocks,
}

impl LifecycleCoordinator {
    pub fn new(records: RecordService, generator: GenerationService) -> Self {
        Self {
            records,
            generator,
            locks: GenerationLocks::default(),
        }
    }

    pub async fn fetch_or_generate(
        &self,
        kind: ResourceKind,
        id: Uuid,
        owner_id: Option<&str>,
    ) -> Result<FetchOutcome, ApiError> {
        let record = self
            .records
            .get_record(kind, id, owner_id)
            .await
            .map_err(|e| match e.downcast::<UnhandledStatusError>() {
                Ok(corrupt) => ApiError::UnhandledStatus(format!(
                    "record {} carries unrecognized status '{}'",
                    corrupt.id, corrupt.status
                )),
                Err(other) => ApiError::DatabaseError(other),
            })?
            .ok_or_else(|| ApiError::NotFound(format!("{} {}", kind.label(), id)))?;

        match record.status {
            GenerationStatus::Complete => match record.payload {
                Some(payload) if kind.validate_payload(&payload).is_ok() => {
                    Ok(FetchOutcome::Cached(payload))
                }
                _ => Err(ApiError::UnhandledStatus(format!(
                    "complete {} {} has no usable payload",
                    kind.label(),
                    id
                ))),
            },

            GenerationStatus::Pending => match record.payload {
                Some(payload) => {
                    if let Err(reason) = kind.validate_payload(&payload) {
                        warn!(
                            record_id = %id,
                            kind = kind.label(),
                            reason = %reason,
                            "Pending record holds unusable payload, marking failed"
                        );
                        self.records
                            .set_status(kind, id, GenerationStatus::Failed)
                            .await
                            .map_err(ApiError::DatabaseError)?;
                        return Err(ApiError::InvalidCachedData(format!(
                            "stored {} payload is unusable: {}",
                            kind.label(),
                            reason
                        )));
                    }
                    self.records
                        .set_status(kind, id, GenerationStatus::Complete)
                        .await
                        .map_err(ApiError::DatabaseError)?;
                    info!(record_id = %id, kind = kind.label(), "Promoted pending record to complete");
                    Ok(FetchOutcome::Promoted(payload))
                }
                // The generation that owns this record has not written
                // anything yet; tell the client to retry later.
                None => Err(ApiError::GenerationInFlight(format!(
                    "{} {} is still being generated",
                    kind.label(),
                    id
                ))),
            },

            GenerationStatus::Failed => Err(ApiError::GenerationFailed(format!(
                "generation for {} {} failed; submit the phrase again",
                kind.label(),
                id
            ))),

            GenerationStatus::Created => self.start_generation(kind, record.id, owner_id, &record.phrase).await,
        }
    }

    async fn start_generation(
        &self,
        kind: ResourceKind,
        id: Uuid,
        owner_id: Option<&str>,
        phrase: &str,
    ) -> Result<FetchOutcome, ApiError> {
        let Some(lease) = self.locks.try_acquire(id) else {
            return Err(ApiError::GenerationInFlight(format!(
                "{} {} is already being generated",
                kind.label(),
                id
            )));
        };

        self.records
            .set_status(kind, id, GenerationStatus::Pending)
            .await
            .map_err(ApiError::DatabaseError)?;

        let mut events = match self.generator.generate(kind, phrase).await {
            Ok(events) => events,
            Err(e) => {
                if let Err(db_err) = self
                    .records
                    .set_status(kind, id, GenerationStatus::Failed)
                    .await
                {
                    error!(record_id = %id, error = %db_err, "Failed to mark record failed");
                }
                return Err(ApiError::LlmError(e.to_string()));
            }
        };

        info!(record_id = %id, kind = kind.label(), "Generation started");

        let (tx, rx) = mpsc::channel(32);
        let records = self.records.clone();
        let owner = owner_id.map(|s| s.to_string());
        tokio::spawn(async move {
            let _lease = lease;
            while let Some(event) = events.recv().await {
                let event = match event {
                    GenerationEvent::Completed(payload) => {
                        match records
                            .complete_record(kind, id, owner.as_deref(), &payload)
                            .await
                        {
                            Ok(()) => {
                                info!(record_id = %id, kind = kind.label(), "Generation persisted");
                                GenerationEvent::Completed(payload)
                            }
                            Err(e) => {
                                error!(record_id = %id, error = %e, "Failed to persist completed payload");
                                if let Err(db_err) = records
                                    .set_status(kind, id, GenerationStatus::Failed)
                                    .await
                                {
                                    error!(record_id = %id, error = %db_err, "Failed to mark record failed");
                                }
                                GenerationEvent::Failed(
                                    "generated payload could not be stored".to_string(),
                                )
                            }
                        }
                    }
                    GenerationEvent::Failed(reason) => {
                        warn!(record_id = %id, kind = kind.label(), reason = %reason, "Generation failed");
                        if let Err(db_err) = records
                            .set_status(kind, id, GenerationStatus::Failed)
                            .await
                        {
                            error!(record_id = %id, error = %db_err, "Failed to mark record failed");
                        }
                        GenerationEvent::Failed(reason)
                    }
                    partial => partial,
                };
                // A gone receiver means the client hung up; the record has
                // already been persisted above, so keep draining quietly.
                let _ = tx.send(event).await;
            }
        });

        Ok(FetchOutcome::Streaming(rx))
    }
}
