use std::sync::Arc;

use telemetry_client::domain::{
    Assignment, ChargingStatus, DeviceClass, DeviceStatus, MeterReading, Reading, VehicleReading,
};
use telemetry_service::{
    buffer::IngestionBuffer,
    config::BufferConfig,
    coordinator::{BulkTelemetry, Coordinator, IngestError},
    store::{LiveStatePolicy, MemoryStores},
};
use time::{macros::datetime, Duration, OffsetDateTime};

const T0: OffsetDateTime = datetime!(2025-01-31 10:00 UTC);

fn meter(id: &str, kwh: f64, at: OffsetDateTime) -> MeterReading {
    MeterReading {
        meter_id: id.to_string(),
        kwh_consumed_ac: kwh,
        voltage: 239.5,
        observed_at: at,
    }
}

fn vehicle(id: &str, soc: f64, at: OffsetDateTime) -> VehicleReading {
    VehicleReading {
        vehicle_id: id.to_string(),
        soc,
        kwh_delivered_dc: 1.1,
        battery_temp: 31.0,
        observed_at: at,
    }
}

fn setup(policy: LiveStatePolicy) -> (MemoryStores, Coordinator) {
    let stores = MemoryStores::new(policy);
    stores.assignments.insert(Assignment::active("F-1", "M-1", "V-1"));
    let coordinator = Coordinator::new(stores.stores(), policy);
    (stores, coordinator)
}

#[tokio::test]
async fn bulk_ingest_makes_one_bulk_call_per_store() {
    let (stores, coordinator) = setup(LiveStatePolicy::default());

    let batch = BulkTelemetry {
        meters: vec![meter("M-1", 1.0, T0), meter("M-2", 2.0, T0)],
        vehicles: vec![vehicle("V-1", 40.0, T0)],
    };
    let summary = coordinator.ingest_bulk(batch).await;

    assert_eq!(summary.meters_processed, 2);
    assert_eq!(summary.vehicles_processed, 1);
    assert_eq!(summary.total_processed, 3);
    assert!(summary.errors.is_empty());

    for (bulk, single) in [
        (stores.meter_history.writes().bulk_calls(), stores.meter_history.writes().single_calls()),
        (stores.meter_live.writes().bulk_calls(), stores.meter_live.writes().single_calls()),
        (stores.vehicle_history.writes().bulk_calls(), stores.vehicle_history.writes().single_calls()),
        (stores.vehicle_live.writes().bulk_calls(), stores.vehicle_live.writes().single_calls()),
    ] {
        assert_eq!((bulk, single), (1, 0));
    }
    assert_eq!(stores.meter_history.len(), 2);
    assert_eq!(stores.meter_live.len(), 2);
}

#[tokio::test]
async fn bulk_ingest_denormalizes_assignment() {
    let (stores, coordinator) = setup(LiveStatePolicy::default());

    coordinator
        .ingest_bulk(BulkTelemetry {
            meters: vec![meter("M-1", 1.0, T0), meter("M-9", 1.0, T0)],
            vehicles: vec![vehicle("V-1", 40.0, T0), vehicle("V-9", 40.0, T0)],
        })
        .await;

    let meters = stores.meter_history.records();
    let m1 = meters.iter().find(|r| r.reading.meter_id == "M-1").unwrap();
    assert_eq!(m1.fleet_id.as_deref(), Some("F-1"));
    assert_eq!(m1.meter_id, None);
    let m9 = meters.iter().find(|r| r.reading.meter_id == "M-9").unwrap();
    assert_eq!(m9.fleet_id, None);

    let vehicles = stores.vehicle_history.records();
    let v1 = vehicles.iter().find(|r| r.reading.vehicle_id == "V-1").unwrap();
    assert_eq!(v1.fleet_id.as_deref(), Some("F-1"));
    assert_eq!(v1.meter_id.as_deref(), Some("M-1"));
    let v9 = vehicles.iter().find(|r| r.reading.vehicle_id == "V-9").unwrap();
    assert_eq!((v9.fleet_id.as_deref(), v9.meter_id.as_deref()), (None, None));

    let live = coordinator.vehicle_live_state("V-1").await.unwrap().unwrap();
    assert_eq!(live.associated_meter_id.as_deref(), Some("M-1"));
}

#[tokio::test]
async fn bulk_failure_in_one_class_does_not_block_the_other() {
    let (stores, coordinator) = setup(LiveStatePolicy::default());
    stores.vehicle_live.writes().set_failing(true);

    let summary = coordinator
        .ingest_bulk(BulkTelemetry {
            meters: vec![meter("M-1", 1.0, T0)],
            vehicles: vec![vehicle("V-1", 40.0, T0), vehicle("V-2", 40.0, T0)],
        })
        .await;

    assert_eq!(summary.meters_processed, 1);
    assert_eq!(summary.vehicles_processed, 0);
    assert_eq!(summary.total_processed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("vehicles"), "{:?}", summary.errors);
    assert_eq!(summary.failed, vec![DeviceClass::Vehicle]);
    assert!(!summary.is_success());
}

#[tokio::test]
async fn single_ingest_writes_both_stores() {
    let (stores, coordinator) = setup(LiveStatePolicy::default());

    coordinator
        .ingest(Reading::Vehicle(vehicle("V-1", 99.2, T0)))
        .await
        .unwrap();

    assert_eq!(stores.vehicle_history.writes().single_calls(), 1);
    assert_eq!(stores.vehicle_live.writes().single_calls(), 1);

    let state = coordinator.vehicle_live_state("V-1").await.unwrap().unwrap();
    assert_eq!(state.status, DeviceStatus::Online);
    assert_eq!(state.charging_status, Some(ChargingStatus::Idle));
    assert_eq!(state.last_reported_at, T0);
    assert_eq!(state.associated_meter_id.as_deref(), Some("M-1"));

    coordinator.ingest(Reading::Meter(meter("M-1", 3.0, T0))).await.unwrap();
    let meter_state = coordinator.meter_live_state("M-1").await.unwrap().unwrap();
    assert_eq!(meter_state.charging_status, None);
    assert_eq!(meter_state.reading.kwh_consumed_ac, 3.0);
}

#[tokio::test]
async fn single_ingest_attempts_both_writes_on_failure() {
    let (stores, coordinator) = setup(LiveStatePolicy::default());
    stores.meter_history.writes().set_failing(true);

    let err = coordinator
        .ingest(Reading::Meter(meter("M-1", 1.0, T0)))
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Historical(_)), "{err}");
    // The live-state write still went through.
    assert_eq!(stores.meter_live.writes().single_calls(), 1);
    assert!(coordinator.meter_live_state("M-1").await.unwrap().is_some());

    stores.meter_live.writes().set_failing(true);
    let err = coordinator
        .ingest(Reading::Meter(meter("M-1", 1.0, T0)))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Both { .. }), "{err}");
}

#[tokio::test]
async fn live_state_follows_arrival_order_by_default() {
    let (_stores, coordinator) = setup(LiveStatePolicy::LastArrivalWins);

    coordinator.ingest(Reading::Meter(meter("M-1", 5.0, T0))).await.unwrap();
    coordinator
        .ingest(Reading::Meter(meter("M-1", 1.0, T0 - Duration::hours(1))))
        .await
        .unwrap();

    let state = coordinator.meter_live_state("M-1").await.unwrap().unwrap();
    assert_eq!(state.reading.kwh_consumed_ac, 1.0);
    assert_eq!(state.last_reported_at, T0 - Duration::hours(1));
}

#[tokio::test]
async fn newest_observation_policy_ignores_stale_readings() {
    let (stores, coordinator) = setup(LiveStatePolicy::NewestObservationWins);

    coordinator.ingest(Reading::Meter(meter("M-1", 5.0, T0))).await.unwrap();
    coordinator
        .ingest(Reading::Meter(meter("M-1", 1.0, T0 - Duration::hours(1))))
        .await
        .unwrap();

    let state = coordinator.meter_live_state("M-1").await.unwrap().unwrap();
    assert_eq!(state.reading.kwh_consumed_ac, 5.0);
    // History keeps both.
    assert_eq!(stores.meter_history.len(), 2);
}

#[tokio::test]
async fn bulk_collapses_duplicate_devices_for_live_state() {
    let (stores, coordinator) = setup(LiveStatePolicy::default());

    let summary = coordinator
        .ingest_bulk(BulkTelemetry {
            meters: Vec::new(),
            vehicles: vec![
                vehicle("V-1", 40.0, T0),
                vehicle("V-1", 60.0, T0 + Duration::minutes(5)),
                vehicle("V-1", 3.0, T0 + Duration::minutes(10)),
            ],
        })
        .await;

    assert_eq!(summary.vehicles_processed, 3);
    assert_eq!(stores.vehicle_history.len(), 3);
    assert_eq!(stores.vehicle_live.len(), 1);
    let state = coordinator.vehicle_live_state("V-1").await.unwrap().unwrap();
    assert_eq!(state.reading.soc, 3.0);
    assert_eq!(state.charging_status, Some(ChargingStatus::Error));
}

#[tokio::test]
async fn buffered_readings_reach_both_stores_on_stop() {
    let stores = MemoryStores::default();
    let coordinator = Arc::new(Coordinator::new(stores.stores(), LiveStatePolicy::default()));
    let cfg = BufferConfig {
        batch_size: 100,
        flush_interval_ms: 60_000,
        max_queue_size: 1_000,
    };
    let buffer = IngestionBuffer::start(&cfg, coordinator);

    for i in 0..10 {
        buffer
            .enqueue(Reading::Meter(meter(&format!("M-{i}"), 1.0, T0)))
            .await;
    }
    buffer.enqueue(Reading::Vehicle(vehicle("V-1", 50.0, T0))).await;
    assert_eq!(buffer.queue_status().meter_queue_size, 10);

    assert_eq!(buffer.stop().await.unwrap(), 11);
    assert_eq!(stores.meter_history.len(), 10);
    assert_eq!(stores.meter_live.len(), 10);
    assert_eq!(stores.vehicle_history.len(), 1);
    // One bulk call per store per class.
    assert_eq!(stores.meter_history.writes().bulk_calls(), 1);
    assert_eq!(stores.vehicle_live.writes().bulk_calls(), 1);
}

#[tokio::test]
async fn buffered_failure_keeps_batch_queued() {
    let stores = MemoryStores::default();
    let coordinator = Arc::new(Coordinator::new(stores.stores(), LiveStatePolicy::default()));
    let buffer = IngestionBuffer::start(&BufferConfig::default(), coordinator);
    stores.meter_history.writes().set_failing(true);

    buffer.enqueue(Reading::Meter(meter("M-1", 1.0, T0))).await;
    buffer.enqueue(Reading::Meter(meter("M-2", 1.0, T0))).await;

    let before = buffer.queue_status();
    assert!(buffer.flush_now().await.into_result().is_err());
    assert_eq!(buffer.queue_status(), before);

    stores.meter_history.writes().set_failing(false);
    assert_eq!(buffer.flush_now().await.into_result().unwrap(), 2);
    let ids: Vec<_> = stores
        .meter_history
        .records()
        .into_iter()
        .map(|r| r.reading.meter_id)
        .collect();
    assert_eq!(ids, vec!["M-1", "M-2"]);
}
