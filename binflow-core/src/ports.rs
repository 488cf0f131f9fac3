//! Traits describing the collaborators the engine depends on.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::EngineError;
use crate::model::{
    Actor, ActorId, ActorRole, Bin, BinId, BoundingBox, Collection, CollectionId, Notification,
    Route, RouteId,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors reported by persistence adapters.
pub enum StoreError {
    /// The record to update does not exist.
    #[error("Record missing")]
    Missing,
    /// The stored version differs from the one the caller read.
    #[error("Concurrent modification detected")]
    Conflict,
    /// A unique key is already taken.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// Backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors reported by notification sinks.
pub enum NotifyError {
    /// Delivery could not be handed to the transport.
    #[error("Notification transport error: {0}")]
    Transport(String),
}

#[async_trait]
/// Persistence contract for bins.
pub trait BinStore: Send + Sync {
    /// Load a bin by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn get(&self, id: &BinId) -> Result<Option<Bin>, StoreError>;

    /// Load a bin by its QR code.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn find_by_qr(&self, qr_code: &str) -> Result<Option<Bin>, StoreError>;

    /// Load every bin.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn list(&self) -> Result<Vec<Bin>, StoreError>;

    /// Insert a new bin.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] when the id or QR code is taken.
    async fn insert(&self, bin: Bin) -> Result<Bin, StoreError>;

    /// Replace a bin if its stored version still equals `bin.version`.
    /// The returned record carries the bumped version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a version mismatch and
    /// [`StoreError::Missing`] when the bin is gone.
    async fn save(&self, bin: Bin) -> Result<Bin, StoreError>;

    /// Remove a bin.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the bin does not exist.
    async fn delete(&self, id: &BinId) -> Result<(), StoreError>;

    /// Bins with status FULL whose last emptying is strictly before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn full_emptied_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Bin>, StoreError>;

    /// Bins whose position lies inside the rectangle.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn within(&self, area: BoundingBox) -> Result<Vec<Bin>, StoreError>;
}

#[async_trait]
/// Persistence contract for routes and their stops.
pub trait RouteStore: Send + Sync {
    /// Load a route by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn get(&self, id: &RouteId) -> Result<Option<Route>, StoreError>;

    /// Load every route.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn list(&self) -> Result<Vec<Route>, StoreError>;

    /// Insert a route together with its stops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] when the id is taken.
    async fn insert(&self, route: Route) -> Result<Route, StoreError>;

    /// Replace a route and its stops if the stored version still matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a version mismatch and
    /// [`StoreError::Missing`] when the route is gone.
    async fn save(&self, route: Route) -> Result<Route, StoreError>;

    /// Remove a route and its stops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the route does not exist.
    async fn delete(&self, id: &RouteId) -> Result<(), StoreError>;
}

#[async_trait]
/// Persistence contract for pickup records.
pub trait CollectionStore: Send + Sync {
    /// Load a collection by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn get(&self, id: &CollectionId) -> Result<Option<Collection>, StoreError>;

    /// Load every collection recorded against a bin.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn list_for_bin(&self, bin_id: &BinId) -> Result<Vec<Collection>, StoreError>;

    /// Insert a new collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] when the id is taken.
    async fn insert(&self, collection: Collection) -> Result<Collection, StoreError>;

    /// Replace a collection if the stored version still matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a version mismatch and
    /// [`StoreError::Missing`] when the collection is gone.
    async fn save(&self, collection: Collection) -> Result<Collection, StoreError>;

    /// Remove a collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the collection does not exist.
    async fn delete(&self, id: &CollectionId) -> Result<(), StoreError>;
}

#[async_trait]
/// Source of actor identities.
pub trait ActorDirectory: Send + Sync {
    /// Resolve an actor reference.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend fails.
    async fn actor(&self, id: &ActorId) -> Result<Option<Actor>, StoreError>;

    /// Move an actor to another service region.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the actor does not exist.
    async fn set_region(&self, id: &ActorId, region: &str) -> Result<Actor, StoreError>;
}

#[async_trait]
/// Fire-and-forget sink for engine events.
pub trait NotificationPort: Send + Sync {
    /// Hand an event to the transport.
    ///
    /// # Errors
    ///
    /// Returns a [`NotifyError`] when the transport rejects the event. Callers
    /// log and drop it.
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything an engine component needs to reach the outside world.
#[derive(Clone)]
pub struct Ports {
    /// Bin persistence.
    pub bins: Arc<dyn BinStore>,
    /// Route persistence.
    pub routes: Arc<dyn RouteStore>,
    /// Collection persistence.
    pub collections: Arc<dyn CollectionStore>,
    /// Actor identities.
    pub actors: Arc<dyn ActorDirectory>,
    /// Event sink.
    pub notifier: Arc<dyn NotificationPort>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Ports {
    /// Hand an event to the sink, logging instead of propagating failures.
    pub(crate) async fn announce(&self, notification: Notification) {
        if let Err(err) = self.notifier.notify(notification).await {
            tracing::warn!(error = %err, "dropping notification");
        }
    }

    /// Resolve an actor and check its role.
    pub(crate) async fn actor_with_role(
        &self,
        id: &ActorId,
        role: ActorRole,
    ) -> Result<Actor, EngineError> {
        let actor = self
            .actors
            .actor(id)
            .await?
            .ok_or_else(|| EngineError::not_found("actor", id))?;
        if actor.role != role {
            return Err(EngineError::Validation(format!(
                "actor {id} is a {}, expected a {role}",
                actor.role
            )));
        }
        Ok(actor)
    }
}
