//! Store contracts the core is written against, plus a PostgreSQL and an
//! in-process implementation of each.

pub mod memory;
pub mod postgres;

use std::{fmt, sync::Arc};

use serde::Deserialize;
use sqlx::{postgres::PgPoolOptions, PgPool};
use telemetry_client::domain::{
    Assignment, DeviceReading, HistoricalRecord, LiveState, MeterReading, TimeWindow,
    VehicleReading,
};

use crate::config::DatabaseConfig;

pub use memory::{MemoryAssignmentDirectory, MemoryHistory, MemoryLiveState, MemoryStores};
pub use postgres::{
    PgAssignmentDirectory, PgMeterHistory, PgMeterLiveState, PgVehicleHistory, PgVehicleLiveState,
};

#[derive(thiserror::Error, Debug, Clone)]
#[error("{store} store error: {message}")]
pub struct StoreError {
    pub store: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(store: &'static str, err: impl fmt::Display) -> Self {
        Self {
            store,
            message: format!("{err:#}"),
        }
    }
}

pub const MEMORY_URI: &str = "memory://";

/// How an incoming live-state write is ordered against the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatePolicy {
    /// Every write overwrites, in the order writes reach the store.
    #[default]
    LastArrivalWins,
    /// Writes observed before the stored `last_reported_at` are ignored.
    NewestObservationWins,
}

impl LiveStatePolicy {
    pub fn skips_stale(&self) -> bool {
        matches!(self, Self::NewestObservationWins)
    }

    /// Whether `incoming` should replace `current` under this policy.
    pub fn accepts<R>(&self, current: &LiveState<R>, incoming: &LiveState<R>) -> bool {
        match self {
            Self::LastArrivalWins => true,
            Self::NewestObservationWins => incoming.last_reported_at >= current.last_reported_at,
        }
    }
}

/// Read-only view of meter/vehicle pairings.
#[async_trait::async_trait]
pub trait AssignmentDirectory: Send + Sync {
    async fn find_active_by_meter(&self, meter_id: &str) -> Result<Option<Assignment>, StoreError>;

    async fn find_active_by_vehicle(&self, vehicle_id: &str)
        -> Result<Option<Assignment>, StoreError>;

    async fn find_active_by_meters(&self, meter_ids: &[String])
        -> Result<Vec<Assignment>, StoreError>;

    async fn find_active_by_vehicles(
        &self,
        vehicle_ids: &[String],
    ) -> Result<Vec<Assignment>, StoreError>;
}

/// Append-only, time-indexed history for one device class.
#[async_trait::async_trait]
pub trait HistoricalStore<R: DeviceReading>: Send + Sync {
    async fn insert_one(&self, record: HistoricalRecord<R>) -> Result<(), StoreError>;

    /// Single bulk write; returns the number of records appended.
    async fn insert_many(&self, records: Vec<HistoricalRecord<R>>) -> Result<u64, StoreError>;

    async fn aggregate(&self, device_id: &str, window: TimeWindow)
        -> Result<R::Aggregate, StoreError>;

    /// Records in `window`, ordered by observation time.
    async fn range_scan(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<HistoricalRecord<R>>, StoreError>;
}

/// One row per device, overwritten in place.
#[async_trait::async_trait]
pub trait LiveStateStore<R: DeviceReading>: Send + Sync {
    async fn upsert_one(&self, state: LiveState<R>) -> Result<(), StoreError>;

    /// Single bulk upsert. Device ids must be unique within `states`.
    async fn upsert_many(&self, states: Vec<LiveState<R>>) -> Result<u64, StoreError>;

    async fn get(&self, device_id: &str) -> Result<Option<LiveState<R>>, StoreError>;
}

/// Every store the core talks to.
#[derive(Clone)]
pub struct Stores {
    pub assignments: Arc<dyn AssignmentDirectory>,
    pub meter_history: Arc<dyn HistoricalStore<MeterReading>>,
    pub vehicle_history: Arc<dyn HistoricalStore<VehicleReading>>,
    pub meter_live: Arc<dyn LiveStateStore<MeterReading>>,
    pub vehicle_live: Arc<dyn LiveStateStore<VehicleReading>>,
}

impl Stores {
    pub fn postgres(pool: PgPool, policy: LiveStatePolicy) -> Self {
        Self {
            assignments: Arc::new(PgAssignmentDirectory::new(pool.clone())),
            meter_history: Arc::new(PgMeterHistory::new(pool.clone())),
            vehicle_history: Arc::new(PgVehicleHistory::new(pool.clone())),
            meter_live: Arc::new(PgMeterLiveState::new(pool.clone(), policy)),
            vehicle_live: Arc::new(PgVehicleLiveState::new(pool, policy)),
        }
    }

    pub fn in_memory(policy: LiveStatePolicy) -> Self {
        MemoryStores::new(policy).stores()
    }

    /// Connect to the configured database. The URI `memory://` selects the
    /// in-process stores, which start empty and are lost on exit.
    pub async fn connect(db: &DatabaseConfig, policy: LiveStatePolicy) -> Result<Self, sqlx::Error> {
        if db.uri == MEMORY_URI {
            tracing::warn!("using in-memory stores, data will not be persisted");
            return Ok(Self::in_memory(policy));
        }
        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .connect(&db.uri)
            .await?;
        Ok(Self::postgres(pool, policy))
    }
}
