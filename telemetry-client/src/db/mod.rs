//! Query functions over the telemetry tables.
//!
//! The schema is applied out-of-band. Tables referenced here:
//!
//! - `meter_telemetry_history (id UUID, meter_id, kwh_consumed_ac FLOAT8,
//!   voltage FLOAT8, "timestamp" TIMESTAMPTZ, ingested_at TIMESTAMPTZ, fleet_id)`,
//!   primary key `(id, "timestamp")`, range-partitioned on `"timestamp"`.
//! - `vehicle_telemetry_history (id UUID, vehicle_id, soc FLOAT8,
//!   kwh_delivered_dc FLOAT8, battery_temp FLOAT8, "timestamp" TIMESTAMPTZ,
//!   ingested_at TIMESTAMPTZ, fleet_id, meter_id)`, same keying.
//! - `meter_live_state (meter_id PRIMARY KEY, kwh_consumed_ac, voltage,
//!   last_reported_at, status, updated_at)`.
//! - `vehicle_live_state (vehicle_id PRIMARY KEY, soc, kwh_delivered_dc,
//!   battery_temp, last_reported_at, charging_status, status,
//!   associated_meter_id, updated_at)`.
//! - `fleet_assignments (id UUID, fleet_id, meter_id, vehicle_id, is_active,
//!   assigned_at, unassigned_at)`, unique on `(meter_id, vehicle_id)`.

pub mod assignment_queries;
pub mod live_state_queries;
pub mod meter_history_queries;
pub mod vehicle_history_queries;

/// PostgreSQL caps a statement at 65535 bind parameters.
pub(crate) const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per multi-row statement for a table with `columns` bound columns.
pub(crate) fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_per_statement_stays_under_bind_limit() {
        assert_eq!(rows_per_statement(7), 9362);
        assert!(rows_per_statement(9) * 9 <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
    }
}
