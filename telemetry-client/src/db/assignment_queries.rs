use anyhow::Result;
use sqlx::PgPool;

use crate::domain::Assignment;

const SELECT_ASSIGNMENT: &str = r#"
    SELECT id, fleet_id, meter_id, vehicle_id, is_active, assigned_at, unassigned_at
    FROM fleet_assignments
"#;

/// The active assignment for a meter, if any.
///
/// When the one-active-per-meter expectation is violated the most recently
/// assigned row wins.
pub async fn active_by_meter(pool: &PgPool, meter_id: &str) -> Result<Option<Assignment>> {
    let sql = format!(
        "{SELECT_ASSIGNMENT} WHERE meter_id = $1 AND is_active = TRUE \
         ORDER BY assigned_at DESC NULLS LAST LIMIT 1"
    );
    let row = sqlx::query_as::<_, Assignment>(&sql)
        .bind(meter_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// The active assignment for a vehicle, if any.
pub async fn active_by_vehicle(pool: &PgPool, vehicle_id: &str) -> Result<Option<Assignment>> {
    let sql = format!(
        "{SELECT_ASSIGNMENT} WHERE vehicle_id = $1 AND is_active = TRUE \
         ORDER BY assigned_at DESC NULLS LAST LIMIT 1"
    );
    let row = sqlx::query_as::<_, Assignment>(&sql)
        .bind(vehicle_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// All active assignments for any of the given meters, oldest first.
pub async fn active_by_meters(pool: &PgPool, meter_ids: &[String]) -> Result<Vec<Assignment>> {
    if meter_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "{SELECT_ASSIGNMENT} WHERE meter_id = ANY($1) AND is_active = TRUE \
         ORDER BY assigned_at ASC NULLS FIRST"
    );
    let rows = sqlx::query_as::<_, Assignment>(&sql)
        .bind(meter_ids)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// All active assignments for any of the given vehicles, oldest first.
pub async fn active_by_vehicles(pool: &PgPool, vehicle_ids: &[String]) -> Result<Vec<Assignment>> {
    if vehicle_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "{SELECT_ASSIGNMENT} WHERE vehicle_id = ANY($1) AND is_active = TRUE \
         ORDER BY assigned_at ASC NULLS FIRST"
    );
    let rows = sqlx::query_as::<_, Assignment>(&sql)
        .bind(vehicle_ids)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}
