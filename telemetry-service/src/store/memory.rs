//! In-process stores with the same observable semantics as the PostgreSQL
//! ones. Used by the test-suite and for running without a database.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use telemetry_client::domain::{
    Assignment, DeviceReading, HistoricalRecord, LiveState, MeterReading, TimeWindow,
    VehicleReading,
};

use super::{
    AssignmentDirectory, HistoricalStore, LiveStatePolicy, LiveStateStore, StoreError, Stores,
};

/// Counts of single-row and bulk write calls, plus a switch that makes
/// every write fail.
#[derive(Debug, Default)]
pub struct WriteLog {
    single: AtomicUsize,
    bulk: AtomicUsize,
    failing: AtomicBool,
}

impl WriteLog {
    pub fn single_calls(&self) -> usize {
        self.single.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, store: &'static str, bulk: bool) -> Result<(), StoreError> {
        let counter = if bulk { &self.bulk } else { &self.single };
        counter.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::new(store, "injected write failure"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAssignmentDirectory {
    rows: RwLock<Vec<Assignment>>,
}

impl MemoryAssignmentDirectory {
    pub fn insert(&self, assignment: Assignment) {
        self.rows.write().push(assignment);
    }

    /// Mark the `(meter_id, vehicle_id)` pairing inactive.
    pub fn deactivate(&self, meter_id: &str, vehicle_id: &str) {
        let now = time::OffsetDateTime::now_utc();
        for a in self.rows.write().iter_mut() {
            if a.meter_id == meter_id && a.vehicle_id == vehicle_id && a.is_active {
                a.is_active = false;
                a.unassigned_at = Some(now);
            }
        }
    }

    fn newest_active(&self, matches: impl Fn(&Assignment) -> bool) -> Option<Assignment> {
        self.rows
            .read()
            .iter()
            .filter(|a| a.is_active && matches(a))
            .max_by_key(|a| a.assigned_at)
            .cloned()
    }

    fn all_active(&self, matches: impl Fn(&Assignment) -> bool) -> Vec<Assignment> {
        let mut out: Vec<Assignment> = self
            .rows
            .read()
            .iter()
            .filter(|a| a.is_active && matches(a))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.assigned_at);
        out
    }
}

#[async_trait::async_trait]
impl AssignmentDirectory for MemoryAssignmentDirectory {
    async fn find_active_by_meter(&self, meter_id: &str) -> Result<Option<Assignment>, StoreError> {
        Ok(self.newest_active(|a| a.meter_id == meter_id))
    }

    async fn find_active_by_vehicle(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<Assignment>, StoreError> {
        Ok(self.newest_active(|a| a.vehicle_id == vehicle_id))
    }

    async fn find_active_by_meters(
        &self,
        meter_ids: &[String],
    ) -> Result<Vec<Assignment>, StoreError> {
        Ok(self.all_active(|a| meter_ids.contains(&a.meter_id)))
    }

    async fn find_active_by_vehicles(
        &self,
        vehicle_ids: &[String],
    ) -> Result<Vec<Assignment>, StoreError> {
        Ok(self.all_active(|a| vehicle_ids.contains(&a.vehicle_id)))
    }
}

pub struct MemoryHistory<R> {
    name: &'static str,
    records: RwLock<Vec<HistoricalRecord<R>>>,
    writes: WriteLog,
}

impl<R: DeviceReading> MemoryHistory<R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            records: RwLock::new(Vec::new()),
            writes: WriteLog::default(),
        }
    }

    pub fn writes(&self) -> &WriteLog {
        &self.writes
    }

    /// Load fixture rows without counting them as writes.
    pub fn seed(&self, records: impl IntoIterator<Item = HistoricalRecord<R>>) {
        self.records.write().extend(records);
    }

    pub fn records(&self) -> Vec<HistoricalRecord<R>> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait::async_trait]
impl<R: DeviceReading> HistoricalStore<R> for MemoryHistory<R> {
    async fn insert_one(&self, record: HistoricalRecord<R>) -> Result<(), StoreError> {
        self.writes.record(self.name, false)?;
        self.records.write().push(record);
        Ok(())
    }

    async fn insert_many(&self, records: Vec<HistoricalRecord<R>>) -> Result<u64, StoreError> {
        self.writes.record(self.name, true)?;
        let n = records.len() as u64;
        self.records.write().extend(records);
        Ok(n)
    }

    async fn aggregate(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<R::Aggregate, StoreError> {
        let records = self.records.read();
        let readings: Vec<&R> = records
            .iter()
            .filter(|r| r.device_id() == device_id && window.contains(r.observed_at()))
            .map(|r| &r.reading)
            .collect();
        Ok(R::aggregate(&readings))
    }

    async fn range_scan(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<HistoricalRecord<R>>, StoreError> {
        let mut out: Vec<HistoricalRecord<R>> = self
            .records
            .read()
            .iter()
            .filter(|r| r.device_id() == device_id && window.contains(r.observed_at()))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.observed_at());
        Ok(out)
    }
}

pub struct MemoryLiveState<R> {
    name: &'static str,
    policy: LiveStatePolicy,
    rows: RwLock<HashMap<String, LiveState<R>>>,
    writes: WriteLog,
}

impl<R: DeviceReading> MemoryLiveState<R> {
    pub fn new(name: &'static str, policy: LiveStatePolicy) -> Self {
        Self {
            name,
            policy,
            rows: RwLock::new(HashMap::new()),
            writes: WriteLog::default(),
        }
    }

    pub fn writes(&self) -> &WriteLog {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn apply(&self, rows: &mut HashMap<String, LiveState<R>>, state: LiveState<R>) -> bool {
        if let Some(current) = rows.get(state.device_id()) {
            if !self.policy.accepts(current, &state) {
                return false;
            }
        }
        rows.insert(state.device_id().to_string(), state);
        true
    }
}

#[async_trait::async_trait]
impl<R: DeviceReading> LiveStateStore<R> for MemoryLiveState<R> {
    async fn upsert_one(&self, state: LiveState<R>) -> Result<(), StoreError> {
        self.writes.record(self.name, false)?;
        let mut rows = self.rows.write();
        self.apply(&mut rows, state);
        Ok(())
    }

    async fn upsert_many(&self, states: Vec<LiveState<R>>) -> Result<u64, StoreError> {
        self.writes.record(self.name, true)?;
        let mut rows = self.rows.write();
        let mut affected = 0;
        for state in states {
            if self.apply(&mut rows, state) {
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn get(&self, device_id: &str) -> Result<Option<LiveState<R>>, StoreError> {
        Ok(self.rows.read().get(device_id).cloned())
    }
}

/// Concrete handles to a full set of in-memory stores.
pub struct MemoryStores {
    pub assignments: Arc<MemoryAssignmentDirectory>,
    pub meter_history: Arc<MemoryHistory<MeterReading>>,
    pub vehicle_history: Arc<MemoryHistory<VehicleReading>>,
    pub meter_live: Arc<MemoryLiveState<MeterReading>>,
    pub vehicle_live: Arc<MemoryLiveState<VehicleReading>>,
}

impl MemoryStores {
    pub fn new(policy: LiveStatePolicy) -> Self {
        Self {
            assignments: Arc::new(MemoryAssignmentDirectory::default()),
            meter_history: Arc::new(MemoryHistory::new("meter history")),
            vehicle_history: Arc::new(MemoryHistory::new("vehicle history")),
            meter_live: Arc::new(MemoryLiveState::new("meter live-state", policy)),
            vehicle_live: Arc::new(MemoryLiveState::new("vehicle live-state", policy)),
        }
    }

    /// Trait-object view for the coordinator and analytics engine.
    pub fn stores(&self) -> Stores {
        Stores {
            assignments: self.assignments.clone(),
            meter_history: self.meter_history.clone(),
            vehicle_history: self.vehicle_history.clone(),
            meter_live: self.meter_live.clone(),
            vehicle_live: self.vehicle_live.clone(),
        }
    }
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self::new(LiveStatePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_client::domain::DeviceStatus;
    use time::{macros::datetime, OffsetDateTime};

    fn meter_state(id: &str, kwh: f64, at: OffsetDateTime) -> LiveState<MeterReading> {
        LiveState {
            reading: MeterReading {
                meter_id: id.to_string(),
                kwh_consumed_ac: kwh,
                voltage: 230.0,
                observed_at: at,
            },
            last_reported_at: at,
            status: DeviceStatus::Online,
            charging_status: None,
            associated_meter_id: None,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn last_arrival_overwrites_with_older_observation() {
        let store = MemoryLiveState::new("meter live-state", LiveStatePolicy::LastArrivalWins);
        store.upsert_one(meter_state("M-1", 10.0, datetime!(2025-01-31 10:00 UTC))).await.unwrap();
        store.upsert_one(meter_state("M-1", 5.0, datetime!(2025-01-31 09:00 UTC))).await.unwrap();

        let row = store.get("M-1").await.unwrap().unwrap();
        assert_eq!(row.reading.kwh_consumed_ac, 5.0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn newest_observation_policy_ignores_stale_writes() {
        let store = MemoryLiveState::new("meter live-state", LiveStatePolicy::NewestObservationWins);
        store.upsert_one(meter_state("M-1", 10.0, datetime!(2025-01-31 10:00 UTC))).await.unwrap();
        let affected = store
            .upsert_many(vec![meter_state("M-1", 5.0, datetime!(2025-01-31 09:00 UTC))])
            .await
            .unwrap();

        assert_eq!(affected, 0);
        let row = store.get("M-1").await.unwrap().unwrap();
        assert_eq!(row.reading.kwh_consumed_ac, 10.0);
    }

    #[tokio::test]
    async fn range_scan_is_ordered_and_half_open() {
        let history: MemoryHistory<MeterReading> = MemoryHistory::new("meter history");
        let ingested = datetime!(2025-01-31 12:00 UTC);
        let at = |h: u8| datetime!(2025-01-31 00:00 UTC) + time::Duration::hours(h as i64);
        for h in [5u8, 1, 3, 8] {
            let reading = MeterReading {
                meter_id: "M-1".into(),
                kwh_consumed_ac: h as f64,
                voltage: 230.0,
                observed_at: at(h),
            };
            history.insert_one(HistoricalRecord::new(reading, None, None, ingested)).await.unwrap();
        }

        let window = TimeWindow::new(at(1), at(8));
        let scanned: Vec<f64> = history
            .range_scan("M-1", window)
            .await
            .unwrap()
            .iter()
            .map(|r| r.reading.kwh_consumed_ac)
            .collect();

        assert_eq!(scanned, vec![1.0, 3.0, 5.0]);
        assert!(history.range_scan("M-2", window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_store_rejects_writes_but_still_counts_them() {
        let history: MemoryHistory<MeterReading> = MemoryHistory::new("meter history");
        history.writes().set_failing(true);

        let err = history.insert_many(Vec::new()).await.unwrap_err();
        assert_eq!(err.store, "meter history");
        assert_eq!(history.writes().bulk_calls(), 1);
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn directory_prefers_newest_active_assignment() {
        let dir = MemoryAssignmentDirectory::default();
        let mut old = Assignment::active("F-1", "M-OLD", "VH-1");
        old.assigned_at = Some(datetime!(2025-01-01 00:00 UTC));
        let mut new = Assignment::active("F-1", "M-NEW", "VH-1");
        new.assigned_at = Some(datetime!(2025-01-20 00:00 UTC));
        dir.insert(new);
        dir.insert(old);

        let found = dir.find_active_by_vehicle("VH-1").await.unwrap().unwrap();
        assert_eq!(found.meter_id, "M-NEW");

        dir.deactivate("M-NEW", "VH-1");
        let found = dir.find_active_by_vehicle("VH-1").await.unwrap().unwrap();
        assert_eq!(found.meter_id, "M-OLD");
        assert!(dir.find_active_by_meter("M-NEW").await.unwrap().is_none());
    }
}
