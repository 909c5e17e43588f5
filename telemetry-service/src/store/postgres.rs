use sqlx::PgPool;
use telemetry_client::{
    db::{assignment_queries, live_state_queries, meter_history_queries, vehicle_history_queries},
    domain::{
        Assignment, HistoricalRecord, LiveState, MeterAggregate, MeterReading, TimeWindow,
        VehicleAggregate, VehicleReading,
    },
};

use super::{
    AssignmentDirectory, HistoricalStore, LiveStatePolicy, LiveStateStore, StoreError,
};

const ASSIGNMENTS: &str = "assignment";
const METER_HISTORY: &str = "meter history";
const VEHICLE_HISTORY: &str = "vehicle history";
const METER_LIVE: &str = "meter live-state";
const VEHICLE_LIVE: &str = "vehicle live-state";

pub struct PgAssignmentDirectory {
    pool: PgPool,
}

impl PgAssignmentDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AssignmentDirectory for PgAssignmentDirectory {
    async fn find_active_by_meter(&self, meter_id: &str) -> Result<Option<Assignment>, StoreError> {
        assignment_queries::active_by_meter(&self.pool, meter_id)
            .await
            .map_err(|e| StoreError::new(ASSIGNMENTS, e))
    }

    async fn find_active_by_vehicle(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<Assignment>, StoreError> {
        assignment_queries::active_by_vehicle(&self.pool, vehicle_id)
            .await
            .map_err(|e| StoreError::new(ASSIGNMENTS, e))
    }

    async fn find_active_by_meters(
        &self,
        meter_ids: &[String],
    ) -> Result<Vec<Assignment>, StoreError> {
        assignment_queries::active_by_meters(&self.pool, meter_ids)
            .await
            .map_err(|e| StoreError::new(ASSIGNMENTS, e))
    }

    async fn find_active_by_vehicles(
        &self,
        vehicle_ids: &[String],
    ) -> Result<Vec<Assignment>, StoreError> {
        assignment_queries::active_by_vehicles(&self.pool, vehicle_ids)
            .await
            .map_err(|e| StoreError::new(ASSIGNMENTS, e))
    }
}

pub struct PgMeterHistory {
    pool: PgPool,
}

impl PgMeterHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HistoricalStore<MeterReading> for PgMeterHistory {
    async fn insert_one(&self, record: HistoricalRecord<MeterReading>) -> Result<(), StoreError> {
        meter_history_queries::insert(&self.pool, &record)
            .await
            .map_err(|e| StoreError::new(METER_HISTORY, e))
    }

    async fn insert_many(
        &self,
        records: Vec<HistoricalRecord<MeterReading>>,
    ) -> Result<u64, StoreError> {
        meter_history_queries::insert_many(&self.pool, &records)
            .await
            .map_err(|e| StoreError::new(METER_HISTORY, e))
    }

    async fn aggregate(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<MeterAggregate, StoreError> {
        meter_history_queries::aggregate(&self.pool, device_id, window)
            .await
            .map_err(|e| StoreError::new(METER_HISTORY, e))
    }

    async fn range_scan(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<HistoricalRecord<MeterReading>>, StoreError> {
        meter_history_queries::range_scan(&self.pool, device_id, window)
            .await
            .map_err(|e| StoreError::new(METER_HISTORY, e))
    }
}

pub struct PgVehicleHistory {
    pool: PgPool,
}

impl PgVehicleHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HistoricalStore<VehicleReading> for PgVehicleHistory {
    async fn insert_one(&self, record: HistoricalRecord<VehicleReading>) -> Result<(), StoreError> {
        vehicle_history_queries::insert(&self.pool, &record)
            .await
            .map_err(|e| StoreError::new(VEHICLE_HISTORY, e))
    }

    async fn insert_many(
        &self,
        records: Vec<HistoricalRecord<VehicleReading>>,
    ) -> Result<u64, StoreError> {
        vehicle_history_queries::insert_many(&self.pool, &records)
            .await
            .map_err(|e| StoreError::new(VEHICLE_HISTORY, e))
    }

    async fn aggregate(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<VehicleAggregate, StoreError> {
        vehicle_history_queries::aggregate(&self.pool, device_id, window)
            .await
            .map_err(|e| StoreError::new(VEHICLE_HISTORY, e))
    }

    async fn range_scan(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<HistoricalRecord<VehicleReading>>, StoreError> {
        vehicle_history_queries::range_scan(&self.pool, device_id, window)
            .await
            .map_err(|e| StoreError::new(VEHICLE_HISTORY, e))
    }
}

pub struct PgMeterLiveState {
    pool: PgPool,
    policy: LiveStatePolicy,
}

impl PgMeterLiveState {
    pub fn new(pool: PgPool, policy: LiveStatePolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait::async_trait]
impl LiveStateStore<MeterReading> for PgMeterLiveState {
    async fn upsert_one(&self, state: LiveState<MeterReading>) -> Result<(), StoreError> {
        live_state_queries::upsert_meters(
            &self.pool,
            std::slice::from_ref(&state),
            self.policy.skips_stale(),
        )
        .await
        .map(|_| ())
        .map_err(|e| StoreError::new(METER_LIVE, e))
    }

    async fn upsert_many(&self, states: Vec<LiveState<MeterReading>>) -> Result<u64, StoreError> {
        live_state_queries::upsert_meters(&self.pool, &states, self.policy.skips_stale())
            .await
            .map_err(|e| StoreError::new(METER_LIVE, e))
    }

    async fn get(&self, device_id: &str) -> Result<Option<LiveState<MeterReading>>, StoreError> {
        live_state_queries::meter_state(&self.pool, device_id)
            .await
            .map_err(|e| StoreError::new(METER_LIVE, e))
    }
}

pub struct PgVehicleLiveState {
    pool: PgPool,
    policy: LiveStatePolicy,
}

impl PgVehicleLiveState {
    pub fn new(pool: PgPool, policy: LiveStatePolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait::async_trait]
impl LiveStateStore<VehicleReading> for PgVehicleLiveState {
    async fn upsert_one(&self, state: LiveState<VehicleReading>) -> Result<(), StoreError> {
        live_state_queries::upsert_vehicles(
            &self.pool,
            std::slice::from_ref(&state),
            self.policy.skips_stale(),
        )
        .await
        .map(|_| ())
        .map_err(|e| StoreError::new(VEHICLE_LIVE, e))
    }

    async fn upsert_many(&self, states: Vec<LiveState<VehicleReading>>) -> Result<u64, StoreError> {
        live_state_queries::upsert_vehicles(&self.pool, &states, self.policy.skips_stale())
            .await
            .map_err(|e| StoreError::new(VEHICLE_LIVE, e))
    }

    async fn get(&self, device_id: &str) -> Result<Option<LiveState<VehicleReading>>, StoreError> {
        live_state_queries::vehicle_state(&self.pool, device_id)
            .await
            .map_err(|e| StoreError::new(VEHICLE_LIVE, e))
    }
}
