use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::rows_per_statement;
use crate::domain::{HistoricalRecord, MeterAggregate, MeterReading, TimeWindow};

const INSERT_COLUMNS: usize = 7;

#[derive(Debug, sqlx::FromRow)]
struct MeterHistoryRow {
    id: Uuid,
    #[sqlx(flatten)]
    reading: MeterReading,
    ingested_at: OffsetDateTime,
    fleet_id: Option<String>,
}

impl From<MeterHistoryRow> for HistoricalRecord<MeterReading> {
    fn from(row: MeterHistoryRow) -> Self {
        HistoricalRecord {
            id: row.id,
            reading: row.reading,
            ingested_at: row.ingested_at,
            fleet_id: row.fleet_id,
            meter_id: None,
        }
    }
}

/// Append one meter record.
pub async fn insert(pool: &PgPool, record: &HistoricalRecord<MeterReading>) -> Result<()> {
    insert_many(pool, std::slice::from_ref(record)).await.map(|_| ())
}

/// Append meter records with multi-row INSERTs; returns rows written.
pub async fn insert_many(pool: &PgPool, records: &[HistoricalRecord<MeterReading>]) -> Result<u64> {
    let mut written = 0;

    for chunk in records.chunks(rows_per_statement(INSERT_COLUMNS)) {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"INSERT INTO meter_telemetry_history (id, meter_id, kwh_consumed_ac, voltage, "timestamp", ingested_at, fleet_id) "#,
        );

        builder.push_values(chunk, |mut b, r| {
            let m = &r.reading;
            b.push_bind(r.id)
                .push_bind(&m.meter_id)
                .push_bind(m.kwh_consumed_ac)
                .push_bind(m.voltage)
                .push_bind(m.observed_at)
                .push_bind(r.ingested_at)
                .push_bind(&r.fleet_id);
        });

        written += builder.build().execute(pool).await?.rows_affected();
    }

    Ok(written)
}

/// Sum/average/count over one meter's history in `[window.start, window.end)`.
pub async fn aggregate(pool: &PgPool, meter_id: &str, window: TimeWindow) -> Result<MeterAggregate> {
    let row = sqlx::query_as::<_, MeterAggregate>(
        r#"
        SELECT
            COALESCE(SUM(kwh_consumed_ac), 0)::FLOAT8 AS total_kwh_consumed_ac,
            COALESCE(AVG(voltage), 0)::FLOAT8         AS avg_voltage,
            COUNT(*)                                  AS readings
        FROM meter_telemetry_history
        WHERE meter_id = $1
          AND "timestamp" >= $2
          AND "timestamp" <  $3
        "#,
    )
    .bind(meter_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Time-ordered meter history in `[window.start, window.end)`.
pub async fn range_scan(
    pool: &PgPool,
    meter_id: &str,
    window: TimeWindow,
) -> Result<Vec<HistoricalRecord<MeterReading>>> {
    let rows = sqlx::query_as::<_, MeterHistoryRow>(
        r#"
        SELECT
            id,
            meter_id,
            kwh_consumed_ac,
            voltage,
            "timestamp" AS observed_at,
            ingested_at,
            fleet_id
        FROM meter_telemetry_history
        WHERE meter_id = $1
          AND "timestamp" >= $2
          AND "timestamp" <  $3
        ORDER BY "timestamp"
        "#,
    )
    .bind(meter_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}
