use time::OffsetDateTime;
use uuid::Uuid;

use super::reading::DeviceReading;

/// An append-only history row: the reading plus server-assigned metadata.
///
/// `fleet_id` is denormalized from the active assignment at ingestion time.
/// `meter_id` is only populated on vehicle records (the paired meter).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HistoricalRecord<R> {
    pub id: Uuid,
    pub reading: R,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub ingested_at: OffsetDateTime,
    pub fleet_id: Option<String>,
    pub meter_id: Option<String>,
}

impl<R: DeviceReading> HistoricalRecord<R> {
    pub fn new(
        reading: R,
        fleet_id: Option<String>,
        meter_id: Option<String>,
        ingested_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reading,
            ingested_at,
            fleet_id,
            meter_id,
        }
    }

    pub fn device_id(&self) -> &str {
        self.reading.device_id()
    }

    pub fn observed_at(&self) -> OffsetDateTime {
        self.reading.observed_at()
    }
}
