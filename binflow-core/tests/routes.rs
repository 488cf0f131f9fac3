//! Route dispatch, progression, and the collection feedback loop.

mod fixtures;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use binflow_core::memory::{FailingNotifier, RecordingNotifier};
use binflow_core::{
    Actor, ActorId, ActorRole, BinId, BinStatus, BinType, Clock, CollectionStatus, EngineError,
    GeoPoint, NearestNeighbor, Notification, RouteBinStatus, RouteStatus, RouteStore, StopOutcome,
};
use chrono::Duration;

use fixtures::{config, engine, engine_with, flaky_engine};

#[tokio::test]
async fn assign_keeps_input_order_and_estimates_per_stop() {
    let engine = engine();
    let first = engine.bin("QR-1", BinType::Standard, 95).await;
    let second = engine.bin("QR-2", BinType::Recycling, 92).await;
    let third = engine.bin("QR-3", BinType::Bulk, 91).await;

    let route = engine
        .service
        .routes()
        .assign(
            &[third.id, first.id, second.id],
            &engine.collector,
            &engine.authority,
        )
        .await
        .unwrap();

    assert_eq!(route.status, RouteStatus::Assigned);
    assert_eq!(route.estimated_duration_minutes, 45);
    assert_eq!(route.assigned_date, engine.clock.now());
    let order: Vec<(u32, BinId)> = route
        .stops
        .iter()
        .map(|stop| (stop.sequence_order, stop.bin_id))
        .collect();
    assert_eq!(order, vec![(1, third.id), (2, first.id), (3, second.id)]);
    assert!(
        route
            .stops
            .iter()
            .all(|stop| stop.status == RouteBinStatus::Pending)
    );

    let sent = engine.notifier.sent();
    assert!(sent.contains(&Notification::RouteAssigned {
        route_id: route.id,
        collector: engine.collector,
        stops: 3,
    }));
}

#[tokio::test]
async fn assign_rejects_empty_unknown_and_repeated_bins() {
    let engine = engine();
    let planner = engine.service.routes();
    let bin = engine.bin("QR-1", BinType::Standard, 10).await;

    let err = planner
        .assign(&[], &engine.collector, &engine.authority)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let missing = BinId::new();
    let err = planner
        .assign(&[bin.id, missing], &engine.collector, &engine.authority)
        .await
        .unwrap_err();
    assert!(
        matches!(&err, EngineError::NotFound { entity: "bin", id } if *id == missing.to_string()),
        "unexpected error {err}"
    );
    assert!(err.to_string().contains(&missing.to_string()));

    let err = planner
        .assign(&[bin.id, bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    assert!(
        RouteStore::list(engine.store.as_ref())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn assign_checks_actor_roles() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 10).await;
    let planner = engine.service.routes();

    let err = planner
        .assign(&[bin.id], &engine.authority, &engine.authority)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = planner
        .assign(&[bin.id], &engine.collector, &ActorId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "actor", .. }));
}

#[tokio::test]
async fn duration_is_measured_from_start() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 95).await;
    let planner = engine.service.routes();
    let route = planner
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();

    let started = planner.start(&engine.collector, &route.id).await.unwrap();
    assert_eq!(started.status, RouteStatus::InProgress);
    assert_eq!(started.started_date, Some(engine.clock.now()));

    engine.clock.advance(Duration::minutes(40));
    let completed = planner.complete(&engine.collector, &route.id).await.unwrap();
    assert_eq!(completed.status, RouteStatus::Completed);
    assert_eq!(completed.completed_date, Some(engine.clock.now()));
    assert_eq!(completed.actual_duration_minutes, Some(40));
}

#[tokio::test]
async fn completing_an_unstarted_route_is_rejected() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 95).await;
    let planner = engine.service.routes();
    let route = planner
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();

    let err = planner.complete(&engine.collector, &route.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    let route = planner.get(&route.id).await.unwrap();
    assert_eq!(route.status, RouteStatus::Assigned);
    assert_eq!(route.actual_duration_minutes, None);
}

#[tokio::test]
async fn in_progress_route_without_start_keeps_duration_unset() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 95).await;
    let planner = engine.service.routes();
    let route = planner
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();

    // A record imported mid-route, with no start timestamp.
    let mut imported = planner.start(&engine.collector, &route.id).await.unwrap();
    imported.started_date = None;
    RouteStore::save(engine.store.as_ref(), imported).await.unwrap();

    let completed = planner.complete(&engine.collector, &route.id).await.unwrap();
    assert_eq!(completed.status, RouteStatus::Completed);
    assert_eq!(completed.actual_duration_minutes, None);
}

#[tokio::test]
async fn route_status_is_monotonic() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 95).await;
    let planner = engine.service.routes();
    let route = planner
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();

    planner.start(&engine.collector, &route.id).await.unwrap();
    assert!(matches!(
        planner.start(&engine.collector, &route.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    let cancelled = planner.cancel(&engine.authority, &route.id).await.unwrap();
    assert_eq!(cancelled.status, RouteStatus::Cancelled);
    assert!(planner.cancel(&engine.authority, &route.id).await.is_err());
    assert!(planner.start(&engine.collector, &route.id).await.is_err());
    assert!(planner.complete(&engine.collector, &route.id).await.is_err());
}

#[tokio::test]
async fn visiting_stops_resets_bins_and_tracks_progress() {
    let engine = engine();
    let recycling = engine.bin("QR-R", BinType::Recycling, 97).await;
    let standard = engine.bin("QR-S", BinType::Standard, 92).await;
    let skipped = engine.bin("QR-X", BinType::Bulk, 91).await;
    let planner = engine.service.routes();
    let route = planner
        .assign(
            &[recycling.id, standard.id, skipped.id],
            &engine.collector,
            &engine.authority,
        )
        .await
        .unwrap();

    let err = planner
        .visit_stop(&engine.collector, &route.id, 1, StopOutcome::Skipped { reason: None })
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::InvalidTransition { .. }),
        "stops can only be visited on a started route"
    );

    planner.start(&engine.collector, &route.id).await.unwrap();
    planner.arrive(&engine.collector, &route.id, 1).await.unwrap();
    engine.clock.advance(Duration::minutes(12));

    let visit = planner
        .visit_stop(
            &engine.collector,
            &route.id,
            1,
            StopOutcome::Collected {
                waste_type: "glass".into(),
                notes: None,
            },
        )
        .await
        .unwrap();
    let collection = visit.collection.unwrap();
    assert_eq!(collection.status, CollectionStatus::Completed);
    assert_eq!(collection.route_id, Some(route.id));
    assert_eq!(collection.collector, engine.collector);
    assert_eq!(collection.waste_level, 97);
    let stop = visit.route.stop(1).unwrap();
    assert_eq!(stop.status, RouteBinStatus::Completed);
    assert_eq!(stop.visited_date, Some(engine.clock.now()));

    let bin = engine.service.bins().get(&recycling.id).await.unwrap();
    assert_eq!(bin.fill_level, 0);
    assert_eq!(bin.status, BinStatus::Empty);

    planner
        .visit_stop(
            &engine.collector,
            &route.id,
            2,
            StopOutcome::Collected {
                waste_type: "household".into(),
                notes: Some("lid broken".into()),
            },
        )
        .await
        .unwrap();
    let bin = engine.service.bins().get(&standard.id).await.unwrap();
    assert_eq!(bin.fill_level, 0);
    assert_eq!(bin.status, BinStatus::Empty);

    let visit = planner
        .visit_stop(
            &engine.collector,
            &route.id,
            3,
            StopOutcome::Skipped {
                reason: Some("blocked by car".into()),
            },
        )
        .await
        .unwrap();
    assert!(visit.collection.is_none());
    assert_eq!(visit.route.stop(3).unwrap().status, RouteBinStatus::Skipped);
    let untouched = engine.service.bins().get(&skipped.id).await.unwrap();
    assert_eq!(untouched.fill_level, 91);

    let progress = planner.progress(&route.id).await.unwrap();
    assert!((progress - 200.0 / 3.0).abs() < 1e-9, "got {progress}");

    let err = planner
        .visit_stop(&engine.collector, &route.id, 2, StopOutcome::Skipped { reason: None })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    let err = planner
        .visit_stop(&engine.collector, &route.id, 9, StopOutcome::Skipped { reason: None })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "stop", .. }));
}

#[tokio::test]
async fn nearest_neighbor_strategy_reorders_stops() {
    let engine = engine();
    let start = engine
        .bin_at("QR-A", BinType::Standard, 95, GeoPoint::new(6.90, 79.85))
        .await;
    let far = engine
        .bin_at("QR-B", BinType::Standard, 95, GeoPoint::new(6.99, 79.85))
        .await;
    let near = engine
        .bin_at("QR-C", BinType::Standard, 95, GeoPoint::new(6.91, 79.85))
        .await;

    let route = engine
        .service
        .routes()
        .assign_with(
            &[start.id, far.id, near.id],
            &engine.collector,
            &engine.authority,
            &NearestNeighbor,
        )
        .await
        .unwrap();
    let order: Vec<BinId> = route.stops.iter().map(|stop| stop.bin_id).collect();
    assert_eq!(order, vec![start.id, near.id, far.id]);
    let distance = route.total_distance_km.unwrap();
    assert!(distance > 9.0 && distance < 11.0, "got {distance}");
}

#[tokio::test]
async fn notification_failures_do_not_abort_transitions() {
    let engine = engine_with(
        config(),
        Arc::new(FailingNotifier),
        Arc::new(RecordingNotifier::default()),
    );
    let bin = engine.bin("QR-1", BinType::Standard, 95).await;
    let route = engine
        .service
        .routes()
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();
    assert_eq!(
        engine.service.routes().get(&route.id).await.unwrap().stops.len(),
        1
    );
}

#[tokio::test]
async fn region_reassignment_is_authority_only() {
    let engine = engine();
    let err = engine
        .service
        .reassign_region(&engine.collector, &engine.collector, "North")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let actor = engine
        .service
        .reassign_region(&engine.authority, &engine.collector, "North")
        .await
        .unwrap();
    assert_eq!(actor.region.as_deref(), Some("North"));
    assert!(engine.notifier.sent().contains(&Notification::RegionReassigned {
        collector: engine.collector,
        region: "North".into(),
    }));
}

#[tokio::test]
async fn route_actions_check_the_actor() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 95).await;
    let other = Actor {
        id: ActorId::new(),
        name: "Olga Other".into(),
        role: ActorRole::Collector,
        region: None,
    };
    let other_id = other.id;
    engine.directory.upsert(other);
    let planner = engine.service.routes();
    let route = planner
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();

    assert!(matches!(
        planner.start(&other_id, &route.id).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        planner.start(&engine.resident, &route.id).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        planner.cancel(&engine.collector, &route.id).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        planner.start(&ActorId::new(), &route.id).await,
        Err(EngineError::NotFound { entity: "actor", .. })
    ));
    assert_eq!(
        planner.get(&route.id).await.unwrap().status,
        RouteStatus::Assigned
    );

    planner.start(&engine.collector, &route.id).await.unwrap();
    assert!(matches!(
        planner.arrive(&other_id, &route.id, 1).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        planner
            .visit_stop(&other_id, &route.id, 1, StopOutcome::Skipped { reason: None })
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        planner.complete(&other_id, &route.id).await,
        Err(EngineError::Validation(_))
    ));
    let route = planner.get(&route.id).await.unwrap();
    assert_eq!(route.status, RouteStatus::InProgress);
    assert_eq!(route.stop(1).unwrap().status, RouteBinStatus::Pending);
}

#[tokio::test]
async fn failed_pickup_releases_the_stop() {
    let (engine, flaky) = flaky_engine();
    let bin = engine.bin("QR-1", BinType::Standard, 95).await;
    let planner = engine.service.routes();
    let route = planner
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();
    planner.start(&engine.collector, &route.id).await.unwrap();
    planner.arrive(&engine.collector, &route.id, 1).await.unwrap();

    let collected = || StopOutcome::Collected {
        waste_type: "household".into(),
        notes: None,
    };
    flaky.failures.store(1, Ordering::SeqCst);
    let err = planner
        .visit_stop(&engine.collector, &route.id, 1, collected())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "unexpected error {err}");

    let stop = planner.get(&route.id).await.unwrap().stop(1).cloned().unwrap();
    assert_eq!(stop.status, RouteBinStatus::InProgress);
    assert_eq!(stop.visited_date, None);
    let history = engine.service.collections().history(&bin.id).await.unwrap();
    assert!(history.is_empty());
    assert_eq!(
        engine.service.bins().get(&bin.id).await.unwrap().fill_level,
        95
    );

    let visit = planner
        .visit_stop(&engine.collector, &route.id, 1, collected())
        .await
        .unwrap();
    assert_eq!(visit.route.stop(1).unwrap().status, RouteBinStatus::Completed);
    assert_eq!(
        engine.service.collections().history(&bin.id).await.unwrap().len(),
        1
    );
    assert_eq!(
        engine.service.bins().get(&bin.id).await.unwrap().fill_level,
        0
    );
}

#[tokio::test]
async fn collected_stop_empties_an_overfilled_bin() {
    let engine = engine();
    let bin = engine.bin("QR-1", BinType::Standard, 130).await;
    let planner = engine.service.routes();
    let route = planner
        .assign(&[bin.id], &engine.collector, &engine.authority)
        .await
        .unwrap();
    planner.start(&engine.collector, &route.id).await.unwrap();

    let visit = planner
        .visit_stop(
            &engine.collector,
            &route.id,
            1,
            StopOutcome::Collected {
                waste_type: "household".into(),
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(visit.collection.unwrap().waste_level, 130);

    let bin = engine.service.bins().get(&bin.id).await.unwrap();
    assert_eq!(bin.fill_level, 0);
    assert_eq!(bin.status, BinStatus::Empty);
}
