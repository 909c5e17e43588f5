use time::OffsetDateTime;
use uuid::Uuid;

/// Pairing of one meter with one vehicle under a fleet.
///
/// Unique on `(meter_id, vehicle_id)`. At most one active assignment per
/// meter and per vehicle is expected but not enforced by the schema.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Assignment {
    pub id: Uuid,
    pub fleet_id: String,
    pub meter_id: String,
    pub vehicle_id: String,
    pub is_active: bool,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub assigned_at: Option<OffsetDateTime>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub unassigned_at: Option<OffsetDateTime>,
}

impl Assignment {
    /// A fresh active assignment, mostly useful for fixtures and seeding.
    pub fn active(fleet_id: &str, meter_id: &str, vehicle_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            fleet_id: fleet_id.to_string(),
            meter_id: meter_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
            is_active: true,
            assigned_at: Some(OffsetDateTime::now_utc()),
            unassigned_at: None,
        }
    }
}
