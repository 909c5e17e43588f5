use time::OffsetDateTime;

use super::{
    aggregate::MeterAggregate,
    reading::{DeviceClass, DeviceReading},
};

/// A single power-meter sample.
///
/// `kwh_consumed_ac` is the cumulative AC energy drawn by the meter and is
/// expected to be monotonic and non-negative.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterReading {
    pub meter_id: String,
    pub kwh_consumed_ac: f64,
    pub voltage: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

impl DeviceReading for MeterReading {
    const CLASS: DeviceClass = DeviceClass::Meter;

    type Aggregate = MeterAggregate;

    fn device_id(&self) -> &str {
        &self.meter_id
    }

    fn observed_at(&self) -> OffsetDateTime {
        self.observed_at
    }

    fn aggregate(readings: &[&Self]) -> MeterAggregate {
        MeterAggregate::from_readings(readings.iter().copied())
    }
}
