use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::rows_per_statement;
use crate::domain::{HistoricalRecord, TimeWindow, VehicleAggregate, VehicleReading};

const INSERT_COLUMNS: usize = 9;

#[derive(Debug, sqlx::FromRow)]
struct VehicleHistoryRow {
    id: Uuid,
    #[sqlx(flatten)]
    reading: VehicleReading,
    ingested_at: OffsetDateTime,
    fleet_id: Option<String>,
    meter_id: Option<String>,
}

impl From<VehicleHistoryRow> for HistoricalRecord<VehicleReading> {
    fn from(row: VehicleHistoryRow) -> Self {
        HistoricalRecord {
            id: row.id,
            reading: row.reading,
            ingested_at: row.ingested_at,
            fleet_id: row.fleet_id,
            meter_id: row.meter_id,
        }
    }
}

/// Append one vehicle record.
pub async fn insert(pool: &PgPool, record: &HistoricalRecord<VehicleReading>) -> Result<()> {
    insert_many(pool, std::slice::from_ref(record)).await.map(|_| ())
}

/// Append vehicle records with multi-row INSERTs; returns rows written.
pub async fn insert_many(
    pool: &PgPool,
    records: &[HistoricalRecord<VehicleReading>],
) -> Result<u64> {
    let mut written = 0;

    for chunk in records.chunks(rows_per_statement(INSERT_COLUMNS)) {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"INSERT INTO vehicle_telemetry_history (id, vehicle_id, soc, kwh_delivered_dc, battery_temp, "timestamp", ingested_at, fleet_id, meter_id) "#,
        );

        builder.push_values(chunk, |mut b, r| {
            let v = &r.reading;
            b.push_bind(r.id)
                .push_bind(&v.vehicle_id)
                .push_bind(v.soc)
                .push_bind(v.kwh_delivered_dc)
                .push_bind(v.battery_temp)
                .push_bind(v.observed_at)
                .push_bind(r.ingested_at)
                .push_bind(&r.fleet_id)
                .push_bind(&r.meter_id);
        });

        written += builder.build().execute(pool).await?.rows_affected();
    }

    Ok(written)
}

/// Energy, temperature and state-of-charge rollup for one vehicle.
pub async fn aggregate(
    pool: &PgPool,
    vehicle_id: &str,
    window: TimeWindow,
) -> Result<VehicleAggregate> {
    let row = sqlx::query_as::<_, VehicleAggregate>(
        r#"
        SELECT
            COALESCE(SUM(kwh_delivered_dc), 0)::FLOAT8 AS total_kwh_delivered_dc,
            COALESCE(AVG(battery_temp), 0)::FLOAT8     AS avg_battery_temp,
            COALESCE(MIN(battery_temp), 0)::FLOAT8     AS min_battery_temp,
            COALESCE(MAX(battery_temp), 0)::FLOAT8     AS peak_battery_temp,
            COALESCE(MIN(soc), 0)::FLOAT8              AS min_soc,
            COALESCE(MAX(soc), 0)::FLOAT8              AS max_soc,
            COUNT(*)                                   AS readings
        FROM vehicle_telemetry_history
        WHERE vehicle_id = $1
          AND "timestamp" >= $2
          AND "timestamp" <  $3
        "#,
    )
    .bind(vehicle_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Time-ordered vehicle history in `[window.start, window.end)`.
pub async fn range_scan(
    pool: &PgPool,
    vehicle_id: &str,
    window: TimeWindow,
) -> Result<Vec<HistoricalRecord<VehicleReading>>> {
    let rows = sqlx::query_as::<_, VehicleHistoryRow>(
        r#"
        SELECT
            id,
            vehicle_id,
            soc,
            kwh_delivered_dc,
            battery_temp,
            "timestamp" AS observed_at,
            ingested_at,
            fleet_id,
            meter_id
        FROM vehicle_telemetry_history
        WHERE vehicle_id = $1
          AND "timestamp" >= $2
          AND "timestamp" <  $3
        ORDER BY "timestamp"
        "#,
    )
    .bind(vehicle_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}
