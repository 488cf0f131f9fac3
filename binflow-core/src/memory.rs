//! In-process adapters for the ports, used by the dashboard and the tests.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    Actor, ActorId, Bin, BinId, BinStatus, BoundingBox, Collection, CollectionId, Notification,
    Route, RouteId,
};
use crate::ports::{
    ActorDirectory, BinStore, CollectionStore, NotificationPort, NotifyError, RouteStore,
    StoreError,
};

#[derive(Debug, Default)]
/// Versioned maps for bins, routes, and collections.
pub struct InMemoryStore {
    bins: RwLock<HashMap<BinId, Bin>>,
    routes: RwLock<HashMap<RouteId, Route>>,
    collections: RwLock<HashMap<CollectionId, Collection>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Records that carry an optimistic concurrency token.
trait Versioned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

macro_rules! versioned {
    ($($ty:ty),+) => {
        $(impl Versioned for $ty {
            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        })+
    };
}

versioned!(Bin, Route, Collection);

fn insert_new<K, V>(map: &mut HashMap<K, V>, key: K, mut record: V) -> Result<V, StoreError>
where
    K: Hash + Eq + ToString,
    V: Versioned + Clone,
{
    if map.contains_key(&key) {
        return Err(StoreError::DuplicateKey(key.to_string()));
    }
    record.set_version(1);
    map.insert(key, record.clone());
    Ok(record)
}

fn compare_and_swap<K, V>(map: &mut HashMap<K, V>, key: &K, mut record: V) -> Result<V, StoreError>
where
    K: Hash + Eq,
    V: Versioned + Clone,
{
    let stored = map.get_mut(key).ok_or(StoreError::Missing)?;
    if stored.version() != record.version() {
        return Err(StoreError::Conflict);
    }
    record.set_version(record.version() + 1);
    *stored = record.clone();
    Ok(record)
}

#[async_trait]
impl BinStore for InMemoryStore {
    async fn get(&self, id: &BinId) -> Result<Option<Bin>, StoreError> {
        Ok(read(&self.bins).get(id).cloned())
    }

    async fn find_by_qr(&self, qr_code: &str) -> Result<Option<Bin>, StoreError> {
        Ok(read(&self.bins)
            .values()
            .find(|bin| bin.qr_code == qr_code)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Bin>, StoreError> {
        let mut bins: Vec<Bin> = read(&self.bins).values().cloned().collect();
        bins.sort_by(|left, right| left.qr_code.cmp(&right.qr_code));
        Ok(bins)
    }

    async fn insert(&self, bin: Bin) -> Result<Bin, StoreError> {
        let mut bins = write(&self.bins);
        if bins.values().any(|existing| existing.qr_code == bin.qr_code) {
            return Err(StoreError::DuplicateKey(bin.qr_code));
        }
        insert_new(&mut bins, bin.id, bin)
    }

    async fn save(&self, bin: Bin) -> Result<Bin, StoreError> {
        let id = bin.id;
        compare_and_swap(&mut write(&self.bins), &id, bin)
    }

    async fn delete(&self, id: &BinId) -> Result<(), StoreError> {
        write(&self.bins)
            .remove(id)
            .map(drop)
            .ok_or(StoreError::Missing)
    }

    async fn full_emptied_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Bin>, StoreError> {
        Ok(read(&self.bins)
            .values()
            .filter(|bin| bin.status == BinStatus::Full)
            .filter(|bin| bin.last_emptied.is_some_and(|emptied| emptied < cutoff))
            .cloned()
            .collect())
    }

    async fn within(&self, area: BoundingBox) -> Result<Vec<Bin>, StoreError> {
        Ok(read(&self.bins)
            .values()
            .filter(|bin| area.contains(bin.position))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RouteStore for InMemoryStore {
    async fn get(&self, id: &RouteId) -> Result<Option<Route>, StoreError> {
        Ok(read(&self.routes).get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Route>, StoreError> {
        let mut routes: Vec<Route> = read(&self.routes).values().cloned().collect();
        routes.sort_by_key(|route| route.assigned_date);
        Ok(routes)
    }

    async fn insert(&self, route: Route) -> Result<Route, StoreError> {
        insert_new(&mut write(&self.routes), route.id, route)
    }

    async fn save(&self, route: Route) -> Result<Route, StoreError> {
        let id = route.id;
        compare_and_swap(&mut write(&self.routes), &id, route)
    }

    async fn delete(&self, id: &RouteId) -> Result<(), StoreError> {
        write(&self.routes)
            .remove(id)
            .map(drop)
            .ok_or(StoreError::Missing)
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    async fn get(&self, id: &CollectionId) -> Result<Option<Collection>, StoreError> {
        Ok(read(&self.collections).get(id).cloned())
    }

    async fn list_for_bin(&self, bin_id: &BinId) -> Result<Vec<Collection>, StoreError> {
        Ok(read(&self.collections)
            .values()
            .filter(|collection| collection.bin_id == *bin_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, collection: Collection) -> Result<Collection, StoreError> {
        insert_new(&mut write(&self.collections), collection.id, collection)
    }

    async fn save(&self, collection: Collection) -> Result<Collection, StoreError> {
        let id = collection.id;
        compare_and_swap(&mut write(&self.collections), &id, collection)
    }

    async fn delete(&self, id: &CollectionId) -> Result<(), StoreError> {
        write(&self.collections)
            .remove(id)
            .map(drop)
            .ok_or(StoreError::Missing)
    }
}

#[derive(Debug, Default)]
/// Actor directory backed by a map.
pub struct InMemoryDirectory {
    actors: RwLock<HashMap<ActorId, Actor>>,
}

impl InMemoryDirectory {
    /// Build a directory from a fixed actor list.
    #[must_use]
    pub fn new(actors: Vec<Actor>) -> Self {
        let actors = actors.into_iter().map(|actor| (actor.id, actor)).collect();
        Self {
            actors: RwLock::new(actors),
        }
    }

    /// Add or replace an actor.
    pub fn upsert(&self, actor: Actor) {
        write(&self.actors).insert(actor.id, actor);
    }
}

#[async_trait]
impl ActorDirectory for InMemoryDirectory {
    async fn actor(&self, id: &ActorId) -> Result<Option<Actor>, StoreError> {
        Ok(read(&self.actors).get(id).cloned())
    }

    async fn set_region(&self, id: &ActorId, region: &str) -> Result<Actor, StoreError> {
        let mut actors = write(&self.actors);
        let actor = actors.get_mut(id).ok_or(StoreError::Missing)?;
        actor.region = Some(region.to_owned());
        Ok(actor.clone())
    }
}

#[derive(Debug, Default)]
/// Sink that keeps every notification in memory.
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Notifications received so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
/// Sink that rejects everything; exercises the log-and-drop path.
pub struct FailingNotifier;

#[async_trait]
impl NotificationPort for FailingNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("sink unavailable".into()))
    }
}
