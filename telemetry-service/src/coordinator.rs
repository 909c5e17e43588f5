//! Dual writes into the history and live-state stores.
//!
//! Every reading lands in both stores. Single readings resolve their
//! assignment with one lookup; batches resolve all distinct devices with one
//! query per class and then issue exactly one bulk call per store.

use std::{collections::HashMap, time::Instant};

use serde::{Deserialize, Serialize};
use telemetry_client::domain::{
    Assignment, ChargingStatus, DeviceClass, DeviceReading, DeviceStatus, HistoricalRecord,
    LiveState, MeterReading, Reading, VehicleReading,
};
use time::OffsetDateTime;

use crate::store::{LiveStatePolicy, StoreError, Stores};

#[derive(thiserror::Error, Debug, Clone)]
pub enum IngestError {
    #[error("assignment lookup failed: {0}")]
    Assignment(#[source] StoreError),
    #[error("historical write failed: {0}")]
    Historical(#[source] StoreError),
    #[error("live-state write failed: {0}")]
    LiveState(#[source] StoreError),
    #[error("historical write failed: {historical}; live-state write failed: {live_state}")]
    Both {
        historical: StoreError,
        live_state: StoreError,
    },
}

impl IngestError {
    /// Fold the outcomes of the two concurrent writes, keeping both failures.
    fn from_dual<A, B>(
        historical: Result<A, StoreError>,
        live_state: Result<B, StoreError>,
    ) -> Result<(A, B), Self> {
        match (historical, live_state) {
            (Ok(a), Ok(b)) => Ok((a, b)),
            (Err(h), Ok(_)) => Err(Self::Historical(h)),
            (Ok(_), Err(l)) => Err(Self::LiveState(l)),
            (Err(historical), Err(live_state)) => Err(Self::Both {
                historical,
                live_state,
            }),
        }
    }
}

/// Direct batch intake, grouped by class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkTelemetry {
    #[serde(default)]
    pub meters: Vec<MeterReading>,
    #[serde(default)]
    pub vehicles: Vec<VehicleReading>,
}

impl BulkTelemetry {
    pub fn len(&self) -> usize {
        self.meters.len() + self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty() && self.vehicles.is_empty()
    }

    pub fn push(&mut self, reading: Reading) {
        match reading {
            Reading::Meter(m) => self.meters.push(m),
            Reading::Vehicle(v) => self.vehicles.push(v),
        }
    }
}

impl FromIterator<Reading> for BulkTelemetry {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        let mut bulk = Self::default();
        for reading in iter {
            bulk.push(reading);
        }
        bulk
    }
}

/// Outcome of a bulk ingestion. A failed class reports zero processed, is
/// listed in `failed` and adds one entry to `errors`. The other class is
/// unaffected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkIngestionSummary {
    pub meters_processed: usize,
    pub vehicles_processed: usize,
    pub total_processed: usize,
    pub elapsed_ms: u64,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub failed: Vec<DeviceClass>,
}

impl BulkIngestionSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.errors.is_empty()
    }

    pub fn class_failed(&self, class: DeviceClass) -> bool {
        self.failed.contains(&class)
    }
}

/// Fleet/meter correlation attached to a record at write time.
#[derive(Debug, Clone, Default, PartialEq)]
struct Correlation {
    fleet_id: Option<String>,
    meter_id: Option<String>,
}

impl Correlation {
    fn for_meter(assignment: Option<Assignment>) -> Self {
        Self {
            fleet_id: assignment.map(|a| a.fleet_id),
            meter_id: None,
        }
    }

    fn for_vehicle(assignment: Option<Assignment>) -> Self {
        match assignment {
            Some(a) => Self {
                fleet_id: Some(a.fleet_id),
                meter_id: Some(a.meter_id),
            },
            None => Self::default(),
        }
    }
}

fn meter_live_state(reading: MeterReading, now: OffsetDateTime) -> LiveState<MeterReading> {
    LiveState {
        last_reported_at: reading.observed_at,
        reading,
        status: DeviceStatus::Online,
        charging_status: None,
        associated_meter_id: None,
        updated_at: now,
    }
}

fn vehicle_live_state(
    reading: VehicleReading,
    meter_id: Option<String>,
    now: OffsetDateTime,
) -> LiveState<VehicleReading> {
    LiveState {
        last_reported_at: reading.observed_at,
        charging_status: Some(ChargingStatus::from_soc(reading.soc)),
        reading,
        status: DeviceStatus::Online,
        associated_meter_id: meter_id,
        updated_at: now,
    }
}

/// Distinct device ids in first-seen order.
fn distinct_ids<R: DeviceReading>(readings: &[R]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    readings
        .iter()
        .map(|r| r.device_id())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Keep one live-state row per device so a multi-row upsert never touches
/// the same row twice. Output keeps first-seen device order.
fn collapse_per_device<R: DeviceReading>(
    states: Vec<LiveState<R>>,
    policy: LiveStatePolicy,
) -> Vec<LiveState<R>> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(states.len());
    let mut out: Vec<LiveState<R>> = Vec::with_capacity(states.len());

    for state in states {
        match index.get(state.device_id()) {
            Some(&i) => {
                if policy.accepts(&out[i], &state) {
                    out[i] = state;
                }
            }
            None => {
                index.insert(state.device_id().to_string(), out.len());
                out.push(state);
            }
        }
    }
    out
}

fn record_written(class: DeviceClass, count: usize, started: Instant) {
    metrics::counter!("telemetry_ingested_records_total", "class" => class.as_str(), "status" => "success")
        .increment(count as u64);
    metrics::histogram!("telemetry_ingest_latency_seconds", "class" => class.as_str())
        .record(started.elapsed().as_secs_f64());
}

fn record_failed(class: DeviceClass, count: usize) {
    metrics::counter!("telemetry_ingested_records_total", "class" => class.as_str(), "status" => "error")
        .increment(count as u64);
}

pub struct Coordinator {
    stores: Stores,
    policy: LiveStatePolicy,
}

impl Coordinator {
    pub fn new(stores: Stores, policy: LiveStatePolicy) -> Self {
        Self { stores, policy }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub async fn ingest(&self, reading: Reading) -> Result<(), IngestError> {
        match reading {
            Reading::Meter(m) => self.ingest_meter(m).await,
            Reading::Vehicle(v) => self.ingest_vehicle(v).await,
        }
    }

    /// One assignment lookup, then the history insert and live-state upsert
    /// run concurrently. Both are always awaited.
    pub async fn ingest_meter(&self, reading: MeterReading) -> Result<(), IngestError> {
        let started = Instant::now();
        let assignment = self
            .stores
            .assignments
            .find_active_by_meter(&reading.meter_id)
            .await
            .map_err(IngestError::Assignment)?;
        let corr = Correlation::for_meter(assignment);
        let now = OffsetDateTime::now_utc();

        let record = HistoricalRecord::new(reading.clone(), corr.fleet_id, corr.meter_id, now);
        let meter_id = reading.meter_id.clone();
        let state = meter_live_state(reading, now);

        let (historical, live) = tokio::join!(
            self.stores.meter_history.insert_one(record),
            self.stores.meter_live.upsert_one(state),
        );
        if let Err(e) = IngestError::from_dual(historical, live) {
            record_failed(DeviceClass::Meter, 1);
            tracing::error!(error = %e, meter_id = %meter_id, "meter ingestion failed");
            return Err(e);
        }

        record_written(DeviceClass::Meter, 1, started);
        tracing::debug!(meter_id = %meter_id, "ingested meter telemetry");
        Ok(())
    }

    pub async fn ingest_vehicle(&self, reading: VehicleReading) -> Result<(), IngestError> {
        let started = Instant::now();
        let assignment = self
            .stores
            .assignments
            .find_active_by_vehicle(&reading.vehicle_id)
            .await
            .map_err(IngestError::Assignment)?;
        let corr = Correlation::for_vehicle(assignment);
        let now = OffsetDateTime::now_utc();

        let record =
            HistoricalRecord::new(reading.clone(), corr.fleet_id, corr.meter_id.clone(), now);
        let vehicle_id = reading.vehicle_id.clone();
        let state = vehicle_live_state(reading, corr.meter_id, now);

        let (historical, live) = tokio::join!(
            self.stores.vehicle_history.insert_one(record),
            self.stores.vehicle_live.upsert_one(state),
        );
        if let Err(e) = IngestError::from_dual(historical, live) {
            record_failed(DeviceClass::Vehicle, 1);
            tracing::error!(error = %e, vehicle_id = %vehicle_id, "vehicle ingestion failed");
            return Err(e);
        }

        record_written(DeviceClass::Vehicle, 1, started);
        tracing::debug!(vehicle_id = %vehicle_id, "ingested vehicle telemetry");
        Ok(())
    }

    /// Write one batch of meter readings: one assignment query, one bulk
    /// history insert and one bulk live-state upsert.
    pub async fn write_meter_batch(&self, readings: &[MeterReading]) -> Result<usize, IngestError> {
        if readings.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();

        let assignments = self
            .stores
            .assignments
            .find_active_by_meters(&distinct_ids(readings))
            .await
            .map_err(IngestError::Assignment)?;
        let by_meter: HashMap<String, Correlation> = assignments
            .into_iter()
            .map(|a| (a.meter_id.clone(), Correlation::for_meter(Some(a))))
            .collect();

        let now = OffsetDateTime::now_utc();
        let records: Vec<_> = readings
            .iter()
            .map(|m| {
                let corr = by_meter.get(&m.meter_id).cloned().unwrap_or_default();
                HistoricalRecord::new(m.clone(), corr.fleet_id, None, now)
            })
            .collect();
        let states = collapse_per_device(
            readings.iter().map(|m| meter_live_state(m.clone(), now)).collect(),
            self.policy,
        );

        let (historical, live) = tokio::join!(
            self.stores.meter_history.insert_many(records),
            self.stores.meter_live.upsert_many(states),
        );
        if let Err(e) = IngestError::from_dual(historical, live) {
            record_failed(DeviceClass::Meter, readings.len());
            return Err(e);
        }

        record_written(DeviceClass::Meter, readings.len(), started);
        metrics::histogram!("telemetry_batch_size", "class" => "meter")
            .record(readings.len() as f64);
        Ok(readings.len())
    }

    /// Vehicle counterpart of [`Coordinator::write_meter_batch`]; also
    /// stamps each record with the paired meter.
    pub async fn write_vehicle_batch(
        &self,
        readings: &[VehicleReading],
    ) -> Result<usize, IngestError> {
        if readings.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();

        let assignments = self
            .stores
            .assignments
            .find_active_by_vehicles(&distinct_ids(readings))
            .await
            .map_err(IngestError::Assignment)?;
        let by_vehicle: HashMap<String, Correlation> = assignments
            .into_iter()
            .map(|a| (a.vehicle_id.clone(), Correlation::for_vehicle(Some(a))))
            .collect();

        let now = OffsetDateTime::now_utc();
        let mut records = Vec::with_capacity(readings.len());
        let mut states = Vec::with_capacity(readings.len());
        for v in readings {
            let corr = by_vehicle.get(&v.vehicle_id).cloned().unwrap_or_default();
            records.push(HistoricalRecord::new(
                v.clone(),
                corr.fleet_id,
                corr.meter_id.clone(),
                now,
            ));
            states.push(vehicle_live_state(v.clone(), corr.meter_id, now));
        }
        let states = collapse_per_device(states, self.policy);

        let (historical, live) = tokio::join!(
            self.stores.vehicle_history.insert_many(records),
            self.stores.vehicle_live.upsert_many(states),
        );
        if let Err(e) = IngestError::from_dual(historical, live) {
            record_failed(DeviceClass::Vehicle, readings.len());
            return Err(e);
        }

        record_written(DeviceClass::Vehicle, readings.len(), started);
        metrics::histogram!("telemetry_batch_size", "class" => "vehicle")
            .record(readings.len() as f64);
        Ok(readings.len())
    }

    /// Both classes are written concurrently; a failure in one class does not
    /// stop the other.
    pub async fn ingest_bulk(&self, batch: BulkTelemetry) -> BulkIngestionSummary {
        let started = Instant::now();

        let (meters, vehicles) = tokio::join!(
            self.write_meter_batch(&batch.meters),
            self.write_vehicle_batch(&batch.vehicles),
        );

        let mut errors = Vec::new();
        let mut failed = Vec::new();
        let meters_processed = meters.unwrap_or_else(|e| {
            tracing::error!(error = %e, count = batch.meters.len(), "bulk meter ingestion failed");
            errors.push(format!("meters: {e}"));
            failed.push(DeviceClass::Meter);
            0
        });
        let vehicles_processed = vehicles.unwrap_or_else(|e| {
            tracing::error!(error = %e, count = batch.vehicles.len(), "bulk vehicle ingestion failed");
            errors.push(format!("vehicles: {e}"));
            failed.push(DeviceClass::Vehicle);
            0
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            meters = meters_processed,
            vehicles = vehicles_processed,
            elapsed_ms,
            "bulk ingestion complete"
        );

        BulkIngestionSummary {
            meters_processed,
            vehicles_processed,
            total_processed: meters_processed + vehicles_processed,
            elapsed_ms,
            errors,
            failed,
        }
    }

    pub async fn meter_live_state(
        &self,
        meter_id: &str,
    ) -> Result<Option<LiveState<MeterReading>>, StoreError> {
        self.stores.meter_live.get(meter_id).await
    }

    pub async fn vehicle_live_state(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<LiveState<VehicleReading>>, StoreError> {
        self.stores.vehicle_live.get(vehicle_id).await
    }
}
