//! Pickup records and the bin reset they trigger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{
    ActorId, ActorRole, Bin, BinId, BinType, Collection, CollectionId, CollectionStatus, RouteId,
};
use crate::ports::{Ports, StoreError};
use crate::registry::{BinRegistry, FULL_THRESHOLD, status_for_fill_level};

/// Whether a new record only books the pickup or already reports it done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordIntent {
    /// Book the pickup; complete it later.
    Assigned,
    /// The pickup already happened; reset the bin right away.
    Completed,
}

/// Input for [`CollectionRecorder::record`].
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    /// Bin being emptied.
    pub bin_id: BinId,
    /// Collector performing the pickup.
    pub collector: ActorId,
    /// Free-text description of the waste.
    pub waste_type: String,
    /// Percentage of the bin collected; 0..=100 unless taken at a route stop.
    pub waste_level: i32,
    /// Optional notes.
    pub notes: Option<String>,
}

/// Apply a completed pickup to a bin.
///
/// Recycling bins are always emptied completely. Other bins lose
/// `waste_level` points (floored at 0); only when they end up below the full
/// threshold is the emptying stamped and the alert cleared.
pub fn apply_collection_reset(bin: &mut Bin, waste_level: i32, now: DateTime<Utc>) {
    match bin.bin_type {
        BinType::Recycling => {
            bin.fill_level = 0;
            bin.status = status_for_fill_level(0);
            bin.alert = false;
            bin.last_emptied = Some(now);
        }
        BinType::Standard | BinType::Bulk => {
            bin.fill_level = bin.fill_level.saturating_sub(waste_level).max(0);
            bin.status = status_for_fill_level(bin.fill_level);
            if bin.fill_level < FULL_THRESHOLD {
                bin.alert = false;
                bin.last_emptied = Some(now);
            }
        }
    }
}

/// Records pickups and resets the bins they empty.
pub struct CollectionRecorder {
    ports: Ports,
    registry: Arc<BinRegistry>,
    max_write_attempts: u32,
}

impl CollectionRecorder {
    /// Create a recorder writing bin resets through `registry`.
    #[must_use]
    pub fn new(ports: Ports, registry: Arc<BinRegistry>, config: &EngineConfig) -> Self {
        Self {
            ports,
            registry,
            max_write_attempts: config.max_write_attempts.max(1),
        }
    }

    /// Record a pickup. With [`RecordIntent::Completed`] the bin is reset
    /// before this returns; if that reset fails nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown bin or collector,
    /// [`EngineError::Validation`] for a blank waste type, an out-of-range
    /// waste level, or an actor that is not a collector.
    pub async fn record(
        &self,
        request: CollectionRequest,
        intent: RecordIntent,
    ) -> Result<Collection, EngineError> {
        if request.waste_level > 100 {
            return Err(EngineError::Validation(format!(
                "waste level must be between 0 and 100, got {}",
                request.waste_level
            )));
        }
        self.record_inner(request, None, intent).await
    }

    /// Record a completed pickup made at a route stop. The waste level is
    /// the bin's whole fill level, which may exceed 100.
    pub(crate) async fn record_for_route(
        &self,
        request: CollectionRequest,
        route_id: RouteId,
    ) -> Result<Collection, EngineError> {
        self.record_inner(request, Some(route_id), RecordIntent::Completed)
            .await
    }

    async fn record_inner(
        &self,
        request: CollectionRequest,
        route_id: Option<RouteId>,
        intent: RecordIntent,
    ) -> Result<Collection, EngineError> {
        if request.waste_type.trim().is_empty() {
            return Err(EngineError::Validation("waste type is required".into()));
        }
        if request.waste_level < 0 {
            return Err(EngineError::Validation(format!(
                "waste level cannot be negative, got {}",
                request.waste_level
            )));
        }

        let bin = self.registry.get(&request.bin_id).await?;
        self.ports
            .actor_with_role(&request.collector, ActorRole::Collector)
            .await?;

        let collection = Collection {
            id: CollectionId::new(),
            bin_id: bin.id,
            collector: request.collector,
            route_id,
            collection_type: bin.bin_type.into(),
            status: CollectionStatus::Assigned,
            waste_type: request.waste_type,
            waste_level: request.waste_level,
            notes: request.notes,
            collection_date: self.ports.clock.now(),
            completion_date: None,
            version: 0,
        };
        let collection = self.ports.collections.insert(collection).await?;
        info!(collection_id = %collection.id, bin_id = %bin.id, "recorded collection");

        if intent == RecordIntent::Assigned {
            return Ok(collection);
        }
        match self.complete(&collection.id, None).await {
            Ok(completed) => Ok(completed),
            Err(err) => {
                if let Err(rollback) = self.ports.collections.delete(&collection.id).await {
                    warn!(
                        collection_id = %collection.id,
                        error = %rollback,
                        "could not discard collection after failed completion"
                    );
                }
                Err(err)
            }
        }
    }

    /// Load a collection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn get(&self, id: &CollectionId) -> Result<Collection, EngineError> {
        self.ports
            .collections
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("collection", id))
    }

    /// Collections recorded against a bin, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the store fails.
    pub async fn history(&self, bin_id: &BinId) -> Result<Vec<Collection>, EngineError> {
        let mut collections = self.ports.collections.list_for_bin(bin_id).await?;
        collections.sort_by(|left, right| right.collection_date.cmp(&left.collection_date));
        Ok(collections)
    }

    /// Collector arrived at the bin.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the collection is ASSIGNED.
    pub async fn start(&self, id: &CollectionId) -> Result<Collection, EngineError> {
        self.update(id, |collection| {
            if collection.status != CollectionStatus::Assigned {
                return Err(EngineError::invalid_transition(
                    "collection",
                    collection.status,
                    "start",
                ));
            }
            collection.status = CollectionStatus::InProgress;
            Ok(())
        })
        .await
    }

    /// Mark a pickup done and reset its bin.
    ///
    /// When the bin reset cannot be written the collection goes back to its
    /// previous status, so completing it again is safe.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] when the collection is
    /// already COMPLETED or FAILED.
    pub async fn complete(
        &self,
        id: &CollectionId,
        notes: Option<String>,
    ) -> Result<Collection, EngineError> {
        let now = self.ports.clock.now();
        let mut reopened = None;
        let collection = self
            .update(id, |collection| {
                if !is_open(collection.status) {
                    return Err(EngineError::invalid_transition(
                        "collection",
                        collection.status,
                        "complete",
                    ));
                }
                reopened = Some((collection.status, collection.notes.clone()));
                collection.status = CollectionStatus::Completed;
                collection.completion_date = Some(now);
                if let Some(notes) = &notes {
                    collection.notes = Some(notes.clone());
                }
                Ok(())
            })
            .await?;

        let waste_level = collection.waste_level;
        let reset = self
            .registry
            .update(&collection.bin_id, |bin| {
                apply_collection_reset(bin, waste_level, now);
            })
            .await;
        let change = match reset {
            Ok(change) => change,
            Err(err) => {
                if let Some((status, notes)) = reopened {
                    self.reopen(id, status, notes).await;
                }
                return Err(err);
            }
        };
        info!(
            collection_id = %collection.id,
            bin_id = %collection.bin_id,
            fill_level = change.after.fill_level,
            status = ?change.after.status,
            "collection completed"
        );
        Ok(collection)
    }

    /// Put a completion back when its bin reset could not be written, so the
    /// caller can complete again.
    async fn reopen(&self, id: &CollectionId, status: CollectionStatus, notes: Option<String>) {
        let restored = self
            .update(id, |collection| {
                if collection.status == CollectionStatus::Completed {
                    collection.status = status;
                    collection.completion_date = None;
                    collection.notes.clone_from(&notes);
                }
                Ok(())
            })
            .await;
        if let Err(err) = restored {
            warn!(collection_id = %id, error = %err, "could not reopen collection");
        }
    }

    /// Mark a pickup as not performed. The bin is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] when the collection is
    /// already COMPLETED or FAILED.
    pub async fn fail(&self, id: &CollectionId, reason: &str) -> Result<Collection, EngineError> {
        let collection = self
            .update(id, |collection| {
                if !is_open(collection.status) {
                    return Err(EngineError::invalid_transition(
                        "collection",
                        collection.status,
                        "fail",
                    ));
                }
                collection.status = CollectionStatus::Failed;
                collection.notes = Some(reason.to_owned());
                Ok(())
            })
            .await?;
        info!(collection_id = %collection.id, reason, "collection failed");
        Ok(collection)
    }

    async fn update<F>(&self, id: &CollectionId, mut mutate: F) -> Result<Collection, EngineError>
    where
        F: FnMut(&mut Collection) -> Result<(), EngineError> + Send,
    {
        for attempt in 1..=self.max_write_attempts {
            let mut collection = self.get(id).await?;
            mutate(&mut collection)?;
            match self.ports.collections.save(collection).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::Conflict) => {
                    debug!(collection_id = %id, attempt, "collection write conflict, retrying");
                }
                Err(StoreError::Missing) => return Err(EngineError::not_found("collection", id)),
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::Conflict)
    }
}

const fn is_open(status: CollectionStatus) -> bool {
    matches!(
        status,
        CollectionStatus::Assigned | CollectionStatus::InProgress
    )
}
