//! Bin lifecycle: fill reports, collections, sweeps, and the simulator.

mod fixtures;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;

use binflow_core::{
    Bin, BinId, BinStatus, BinType, Clock, CollectionRequest, CollectionStatus, CollectionType,
    EngineError, Notification, RecordIntent,
};
use chrono::Duration;
use proptest::prelude::*;
use tokio::sync::watch;

use fixtures::{engine, flaky_engine};

fn request(bin_id: BinId, collector: binflow_core::ActorId, waste_level: i32) -> CollectionRequest {
    CollectionRequest {
        bin_id,
        collector,
        waste_type: "mixed".into(),
        waste_level,
        notes: None,
    }
}

#[tokio::test]
async fn recycling_collection_always_empties() {
    let engine = engine();
    let bin = engine.bin("QR-R", BinType::Recycling, 93).await;
    engine
        .service
        .bins()
        .set_status(&engine.authority, &bin.id, BinStatus::Overdue, None)
        .await
        .unwrap();

    let collection = engine
        .service
        .collections()
        .record(request(bin.id, engine.collector, 5), RecordIntent::Completed)
        .await
        .unwrap();
    assert_eq!(collection.collection_type, CollectionType::Recycling);
    assert_eq!(collection.status, CollectionStatus::Completed);
    assert_eq!(collection.completion_date, Some(engine.clock.now()));

    let bin = engine.service.bins().get(&bin.id).await.unwrap();
    assert_eq!(bin.fill_level, 0);
    assert_eq!(bin.status, BinStatus::Empty);
    assert!(!bin.alert);
}

#[tokio::test]
async fn standard_collection_subtracts_waste_level() {
    let engine = engine();
    let bin = engine.bin("QR-S", BinType::Standard, 80).await;
    let recorder = engine.service.collections();

    let booked = recorder
        .record(request(bin.id, engine.collector, 30), RecordIntent::Assigned)
        .await
        .unwrap();
    assert_eq!(booked.status, CollectionStatus::Assigned);
    assert_eq!(booked.completion_date, None);
    let untouched = engine.service.bins().get(&bin.id).await.unwrap();
    assert_eq!(untouched.fill_level, 80);

    recorder.start(&booked.id).await.unwrap();
    engine.clock.advance(Duration::minutes(5));
    let done = recorder
        .complete(&booked.id, Some("all good".into()))
        .await
        .unwrap();
    assert_eq!(done.notes.as_deref(), Some("all good"));

    let bin = engine.service.bins().get(&bin.id).await.unwrap();
    assert_eq!(bin.fill_level, 50);
    assert_eq!(bin.status, BinStatus::Partial);
    assert_eq!(bin.last_emptied, Some(engine.clock.now()));

    let err = recorder.complete(&booked.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert!(recorder.fail(&booked.id, "late").await.is_err());
}

#[tokio::test]
async fn failed_collection_leaves_bin_alone() {
    let engine = engine();
    let bin = engine.bin("QR-S", BinType::Bulk, 70).await;
    let recorder = engine.service.collections();
    let booked = recorder
        .record(request(bin.id, engine.collector, 70), RecordIntent::Assigned)
        .await
        .unwrap();

    let failed = recorder.fail(&booked.id, "road closed").await.unwrap();
    assert_eq!(failed.status, CollectionStatus::Failed);
    assert_eq!(failed.notes.as_deref(), Some("road closed"));
    assert_eq!(
        engine.service.bins().get(&bin.id).await.unwrap().fill_level,
        70
    );
    assert!(recorder.start(&booked.id).await.is_err());
}

#[tokio::test]
async fn collection_input_is_validated() {
    let engine = engine();
    let bin = engine.bin("QR-S", BinType::Standard, 70).await;
    let recorder = engine.service.collections();

    let mut blank = request(bin.id, engine.collector, 10);
    blank.waste_type = "  ".into();
    assert!(matches!(
        recorder.record(blank, RecordIntent::Assigned).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        recorder
            .record(request(bin.id, engine.collector, 140), RecordIntent::Assigned)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        recorder
            .record(request(bin.id, engine.resident, 10), RecordIntent::Assigned)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        recorder
            .record(request(BinId::new(), engine.collector, 10), RecordIntent::Assigned)
            .await,
        Err(EngineError::NotFound { entity: "bin", .. })
    ));
}

#[tokio::test]
async fn history_is_newest_first() {
    let engine = engine();
    let bin = engine.bin("QR-S", BinType::Standard, 70).await;
    let recorder = engine.service.collections();
    let older = recorder
        .record(request(bin.id, engine.collector, 10), RecordIntent::Assigned)
        .await
        .unwrap();
    engine.clock.advance(Duration::hours(1));
    let newer = recorder
        .record(request(bin.id, engine.collector, 10), RecordIntent::Assigned)
        .await
        .unwrap();

    let history = recorder.history(&bin.id).await.unwrap();
    let ids: Vec<_> = history.iter().map(|collection| collection.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

#[tokio::test]
async fn sweep_raises_one_alert_per_bin() {
    let engine = engine();
    let bin = engine.bin("QR-S", BinType::Standard, 93).await;
    engine.clock.advance(Duration::hours(49));

    let first = engine.service.sweep_overdue().await.unwrap();
    let second = engine.service.sweep_overdue().await.unwrap();
    assert_eq!(first, vec![bin.id]);
    assert!(second.is_empty());

    let alerts: Vec<_> = engine
        .notifier
        .sent()
        .into_iter()
        .filter(|notification| matches!(notification, Notification::BinAlert { .. }))
        .collect();
    assert_eq!(alerts.len(), 1);
}

#[tokio::test]
async fn simulator_ticks_are_reproducible() {
    let first = engine();
    let second = engine();
    for engine in [&first, &second] {
        engine.bin("QR-1", BinType::Standard, 10).await;
        engine.bin("QR-2", BinType::Standard, 50).await;
        engine.bin("QR-3", BinType::Recycling, 85).await;
        for _ in 0..10 {
            engine.service.simulate_tick().await.unwrap();
        }
    }

    let levels = |bins: Vec<Bin>| -> Vec<(String, i32, BinStatus)> {
        bins.into_iter()
            .map(|bin| (bin.qr_code, bin.fill_level, bin.status))
            .collect()
    };
    let first_levels = levels(first.service.bins().list().await.unwrap());
    let second_levels = levels(second.service.bins().list().await.unwrap());
    assert_eq!(first_levels, second_levels);
    assert!(
        first_levels
            .iter()
            .all(|(_, level, _)| (0..=100).contains(level))
    );
}

#[tokio::test]
async fn simulator_marks_stale_full_bins_overdue() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 99).await;
    engine.clock.advance(Duration::hours(72));

    let report = engine.service.simulate_tick().await.unwrap();
    assert_eq!(report.failures, 0);
    let bin = engine.service.bins().get(&bin.id).await.unwrap();
    assert!(bin.fill_level >= 97);
    assert_eq!(bin.status, BinStatus::Overdue);
    assert!(bin.alert);
    assert_eq!(report.alerts_raised, 1);
}

#[tokio::test]
async fn simulator_loop_stops_on_shutdown() {
    let engine = engine();
    engine.bin("QR-1", BinType::Standard, 10).await;
    let simulator = Arc::clone(engine.service.simulator());
    let (shutdown, receiver) = watch::channel(false);

    let handle = tokio::spawn(async move {
        simulator
            .run(StdDuration::from_millis(1), receiver)
            .await;
    });
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    shutdown.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(1), handle)
        .await
        .expect("simulator loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn disposal_retries_transient_failures() {
    let (engine, flaky) = flaky_engine();
    let bin = engine.bin("QR-1", BinType::Standard, 10).await;
    flaky.failures.store(2, Ordering::SeqCst);

    let bin = engine
        .service
        .disposals()
        .submit(&engine.resident, &bin.id, 65)
        .await
        .unwrap();
    assert_eq!(bin.fill_level, 65);
    assert_eq!(bin.status, BinStatus::Partial);
}

#[tokio::test]
async fn disposal_gives_up_after_configured_attempts() {
    let (engine, flaky) = flaky_engine();
    let bin = engine.bin("QR-1", BinType::Standard, 10).await;
    flaky.failures.store(10, Ordering::SeqCst);

    let err = engine
        .service
        .disposals()
        .submit(&engine.resident, &bin.id, 65)
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::SubmissionFailed { attempts: 3, .. }),
        "unexpected error {err}"
    );
    assert_eq!(flaky.failures.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn disposal_does_not_retry_permanent_failures() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 10).await;
    let disposals = engine.service.disposals();

    assert!(matches!(
        disposals.submit(&engine.collector, &bin.id, 40).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        disposals.submit(&engine.resident, &BinId::new(), 40).await,
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn completion_can_be_retried_after_bin_reset_fails() {
    let (engine, flaky) = flaky_engine();
    let bin = engine.bin("QR-S", BinType::Standard, 95).await;
    let recorder = engine.service.collections();
    let booked = recorder
        .record(request(bin.id, engine.collector, 60), RecordIntent::Assigned)
        .await
        .unwrap();

    flaky.failures.store(1, Ordering::SeqCst);
    let err = recorder.complete(&booked.id, None).await.unwrap_err();
    assert!(err.is_transient(), "unexpected error {err}");
    let reopened = recorder.get(&booked.id).await.unwrap();
    assert_eq!(reopened.status, CollectionStatus::Assigned);
    assert_eq!(reopened.completion_date, None);
    assert_eq!(
        engine.service.bins().get(&bin.id).await.unwrap().fill_level,
        95
    );

    let done = recorder.complete(&booked.id, None).await.unwrap();
    assert_eq!(done.status, CollectionStatus::Completed);
    let bin = engine.service.bins().get(&bin.id).await.unwrap();
    assert_eq!(bin.fill_level, 35);
    assert_eq!(bin.status, BinStatus::Empty);
    assert!(!bin.alert);
}

#[tokio::test]
async fn immediate_collection_is_discarded_when_bin_reset_fails() {
    let (engine, flaky) = flaky_engine();
    let bin = engine.bin("QR-B", BinType::Bulk, 92).await;
    let recorder = engine.service.collections();

    flaky.failures.store(1, Ordering::SeqCst);
    assert!(
        recorder
            .record(request(bin.id, engine.collector, 50), RecordIntent::Completed)
            .await
            .is_err()
    );
    assert!(recorder.history(&bin.id).await.unwrap().is_empty());
    assert_eq!(
        engine.service.bins().get(&bin.id).await.unwrap().fill_level,
        92
    );
}

#[tokio::test]
async fn collection_below_full_clears_overdue_alert() {
    let engine = engine();
    let bin = engine.bin("QR-S", BinType::Standard, 95).await;
    let overdue = engine
        .service
        .bins()
        .set_status(&engine.authority, &bin.id, BinStatus::Overdue, None)
        .await
        .unwrap();
    assert!(overdue.alert);

    engine.clock.advance(Duration::hours(3));
    engine
        .service
        .collections()
        .record(request(bin.id, engine.collector, 10), RecordIntent::Completed)
        .await
        .unwrap();

    let bin = engine.service.bins().get(&bin.id).await.unwrap();
    assert_eq!(bin.fill_level, 85);
    assert_eq!(bin.status, BinStatus::Partial);
    assert!(!bin.alert);
    assert_eq!(bin.last_emptied, Some(engine.clock.now()));
}

proptest! {
    #[test]
    fn registry_status_matches_thresholds(level in -100_i32..300) {
        let status = binflow_core::status_for_fill_level(level);
        prop_assert_eq!(status == BinStatus::Empty, level < 50);
        prop_assert_eq!(status == BinStatus::Partial, (50..90).contains(&level));
        prop_assert_eq!(status == BinStatus::Full, level >= 90);
    }
}
