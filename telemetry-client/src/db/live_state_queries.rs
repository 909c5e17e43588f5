use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::rows_per_statement;
use crate::domain::{LiveState, MeterReading, VehicleReading};

const METER_COLUMNS: usize = 6;
const VEHICLE_COLUMNS: usize = 9;

#[derive(Debug, sqlx::FromRow)]
struct MeterLiveStateRow {
    #[sqlx(flatten)]
    reading: MeterReading,
    last_reported_at: OffsetDateTime,
    status: String,
    updated_at: OffsetDateTime,
}

impl TryFrom<MeterLiveStateRow> for LiveState<MeterReading> {
    type Error = anyhow::Error;

    fn try_from(row: MeterLiveStateRow) -> Result<Self> {
        Ok(LiveState {
            reading: row.reading,
            last_reported_at: row.last_reported_at,
            status: row.status.parse()?,
            charging_status: None,
            associated_meter_id: None,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VehicleLiveStateRow {
    #[sqlx(flatten)]
    reading: VehicleReading,
    last_reported_at: OffsetDateTime,
    status: String,
    charging_status: Option<String>,
    associated_meter_id: Option<String>,
    updated_at: OffsetDateTime,
}

impl TryFrom<VehicleLiveStateRow> for LiveState<VehicleReading> {
    type Error = anyhow::Error;

    fn try_from(row: VehicleLiveStateRow) -> Result<Self> {
        Ok(LiveState {
            reading: row.reading,
            last_reported_at: row.last_reported_at,
            status: row.status.parse()?,
            charging_status: row.charging_status.map(|s| s.parse()).transpose()?,
            associated_meter_id: row.associated_meter_id,
            updated_at: row.updated_at,
        })
    }
}

/// Insert-or-overwrite meter rows keyed by `meter_id`.
///
/// With `skip_stale` set, a row whose stored `last_reported_at` is newer than
/// the incoming one is left untouched. The caller must not pass the same
/// meter twice in one call.
pub async fn upsert_meters(
    pool: &PgPool,
    states: &[LiveState<MeterReading>],
    skip_stale: bool,
) -> Result<u64> {
    let mut affected = 0;

    for chunk in states.chunks(rows_per_statement(METER_COLUMNS)) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO meter_live_state (meter_id, kwh_consumed_ac, voltage, last_reported_at, status, updated_at) ",
        );

        builder.push_values(chunk, |mut b, s| {
            let m = &s.reading;
            b.push_bind(&m.meter_id)
                .push_bind(m.kwh_consumed_ac)
                .push_bind(m.voltage)
                .push_bind(s.last_reported_at)
                .push_bind(s.status.as_str())
                .push_bind(s.updated_at);
        });

        builder.push(
            r#"
            ON CONFLICT (meter_id) DO UPDATE SET
                kwh_consumed_ac  = EXCLUDED.kwh_consumed_ac,
                voltage          = EXCLUDED.voltage,
                last_reported_at = EXCLUDED.last_reported_at,
                status           = EXCLUDED.status,
                updated_at       = EXCLUDED.updated_at
            "#,
        );
        if skip_stale {
            builder.push(" WHERE meter_live_state.last_reported_at <= EXCLUDED.last_reported_at");
        }

        affected += builder.build().execute(pool).await?.rows_affected();
    }

    Ok(affected)
}

/// Insert-or-overwrite vehicle rows keyed by `vehicle_id`.
pub async fn upsert_vehicles(
    pool: &PgPool,
    states: &[LiveState<VehicleReading>],
    skip_stale: bool,
) -> Result<u64> {
    let mut affected = 0;

    for chunk in states.chunks(rows_per_statement(VEHICLE_COLUMNS)) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO vehicle_live_state (vehicle_id, soc, kwh_delivered_dc, battery_temp, last_reported_at, charging_status, status, associated_meter_id, updated_at) ",
        );

        builder.push_values(chunk, |mut b, s| {
            let v = &s.reading;
            b.push_bind(&v.vehicle_id)
                .push_bind(v.soc)
                .push_bind(v.kwh_delivered_dc)
                .push_bind(v.battery_temp)
                .push_bind(s.last_reported_at)
                .push_bind(s.charging_status.map(|c| c.as_str()))
                .push_bind(s.status.as_str())
                .push_bind(&s.associated_meter_id)
                .push_bind(s.updated_at);
        });

        builder.push(
            r#"
            ON CONFLICT (vehicle_id) DO UPDATE SET
                soc                 = EXCLUDED.soc,
                kwh_delivered_dc    = EXCLUDED.kwh_delivered_dc,
                battery_temp        = EXCLUDED.battery_temp,
                last_reported_at    = EXCLUDED.last_reported_at,
                charging_status     = EXCLUDED.charging_status,
                status              = EXCLUDED.status,
                associated_meter_id = EXCLUDED.associated_meter_id,
                updated_at          = EXCLUDED.updated_at
            "#,
        );
        if skip_stale {
            builder.push(" WHERE vehicle_live_state.last_reported_at <= EXCLUDED.last_reported_at");
        }

        affected += builder.build().execute(pool).await?.rows_affected();
    }

    Ok(affected)
}

/// Current state of one meter.
pub async fn meter_state(pool: &PgPool, meter_id: &str) -> Result<Option<LiveState<MeterReading>>> {
    let row = sqlx::query_as::<_, MeterLiveStateRow>(
        r#"
        SELECT
            meter_id,
            kwh_consumed_ac,
            voltage,
            last_reported_at AS observed_at,
            last_reported_at,
            status,
            updated_at
        FROM meter_live_state
        WHERE meter_id = $1
        "#,
    )
    .bind(meter_id)
    .fetch_optional(pool)
    .await?;

    row.map(LiveState::<MeterReading>::try_from)
        .transpose()
        .with_context(|| format!("invalid live state row for meter {meter_id}"))
}

/// Current state of one vehicle.
pub async fn vehicle_state(
    pool: &PgPool,
    vehicle_id: &str,
) -> Result<Option<LiveState<VehicleReading>>> {
    let row = sqlx::query_as::<_, VehicleLiveStateRow>(
        r#"
        SELECT
            vehicle_id,
            soc,
            kwh_delivered_dc,
            battery_temp,
            last_reported_at AS observed_at,
            last_reported_at,
            charging_status,
            status,
            associated_meter_id,
            updated_at
        FROM vehicle_live_state
        WHERE vehicle_id = $1
        "#,
    )
    .bind(vehicle_id)
    .fetch_optional(pool)
    .await?;

    row.map(LiveState::<VehicleReading>::try_from)
        .transpose()
        .with_context(|| format!("invalid live state row for vehicle {vehicle_id}"))
}
