//! Shared fixtures: an in-memory engine with one actor per role and a frozen clock.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use binflow_core::memory::{InMemoryDirectory, InMemoryStore, RecordingNotifier};
use binflow_core::{
    Actor, ActorId, ActorRole, Bin, BinId, BinStore, BinType, BinflowService, BoundingBox,
    EngineConfig, GeoPoint, ManualClock, NotificationPort, Ports, StoreError,
};
use chrono::{DateTime, TimeZone, Utc};

pub struct Engine {
    pub service: BinflowService,
    pub store: Arc<InMemoryStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub collector: ActorId,
    pub authority: ActorId,
    pub resident: ActorId,
}

pub fn config() -> EngineConfig {
    EngineConfig {
        simulator_seed: Some(7),
        disposal_retry_backoff_ms: 1,
        ..EngineConfig::default()
    }
}

fn actor(name: &str, role: ActorRole) -> Actor {
    Actor {
        id: ActorId::new(),
        name: name.to_owned(),
        role,
        region: None,
    }
}

pub fn engine() -> Engine {
    let notifier = Arc::new(RecordingNotifier::default());
    engine_with(config(), notifier.clone(), notifier)
}

pub fn engine_with(
    config: EngineConfig,
    sink: Arc<dyn NotificationPort>,
    notifier: Arc<RecordingNotifier>,
) -> Engine {
    let store = Arc::new(InMemoryStore::default());
    let collector = actor("Colin Collector", ActorRole::Collector);
    let authority = actor("Ada Authority", ActorRole::Authority);
    let resident = actor("Rita Resident", ActorRole::Resident);
    let ids = (collector.id, authority.id, resident.id);
    let directory = Arc::new(InMemoryDirectory::new(vec![collector, authority, resident]));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 3, 7, 0, 0).unwrap(),
    ));

    let ports = Ports {
        bins: store.clone(),
        routes: store.clone(),
        collections: store.clone(),
        actors: directory.clone(),
        notifier: sink,
        clock: clock.clone(),
    };

    Engine {
        service: BinflowService::new(ports, config),
        store,
        directory,
        clock,
        notifier,
        collector: ids.0,
        authority: ids.1,
        resident: ids.2,
    }
}

impl Engine {
    pub async fn bin(&self, qr_code: &str, bin_type: BinType, fill_level: i32) -> Bin {
        self.bin_at(qr_code, bin_type, fill_level, GeoPoint::new(6.93, 79.86))
            .await
    }

    pub async fn bin_at(
        &self,
        qr_code: &str,
        bin_type: BinType,
        fill_level: i32,
        position: GeoPoint,
    ) -> Bin {
        let bin = self
            .service
            .bins()
            .register(qr_code, "Galle Road", position, bin_type)
            .await
            .unwrap();
        self.service
            .bins()
            .set_fill_level(&bin.id, fill_level)
            .await
            .unwrap()
    }
}

/// Bin store that fails the first `failures` saves with a backend error.
pub struct FlakyBins {
    inner: Arc<InMemoryStore>,
    pub failures: AtomicU32,
}

#[async_trait]
impl BinStore for FlakyBins {
    async fn get(&self, id: &BinId) -> Result<Option<Bin>, StoreError> {
        BinStore::get(self.inner.as_ref(), id).await
    }

    async fn find_by_qr(&self, qr_code: &str) -> Result<Option<Bin>, StoreError> {
        self.inner.find_by_qr(qr_code).await
    }

    async fn list(&self) -> Result<Vec<Bin>, StoreError> {
        BinStore::list(self.inner.as_ref()).await
    }

    async fn insert(&self, bin: Bin) -> Result<Bin, StoreError> {
        BinStore::insert(self.inner.as_ref(), bin).await
    }

    async fn save(&self, bin: Bin) -> Result<Bin, StoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("connection reset".into()));
        }
        BinStore::save(self.inner.as_ref(), bin).await
    }

    async fn delete(&self, id: &BinId) -> Result<(), StoreError> {
        BinStore::delete(self.inner.as_ref(), id).await
    }

    async fn full_emptied_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Bin>, StoreError> {
        self.inner.full_emptied_before(cutoff).await
    }

    async fn within(&self, area: BoundingBox) -> Result<Vec<Bin>, StoreError> {
        self.inner.within(area).await
    }
}

pub fn flaky_engine() -> (Engine, Arc<FlakyBins>) {
    let base = engine();
    let flaky = Arc::new(FlakyBins {
        inner: base.store.clone(),
        failures: AtomicU32::new(0),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let ports = Ports {
        bins: flaky.clone(),
        routes: base.store.clone(),
        collections: base.store.clone(),
        actors: base.directory.clone(),
        notifier: notifier.clone(),
        clock: base.clock.clone(),
    };
    let engine = Engine {
        service: BinflowService::new(ports, config()),
        notifier,
        ..base
    };
    (engine, flaky)
}
