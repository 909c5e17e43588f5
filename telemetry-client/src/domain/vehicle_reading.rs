use time::OffsetDateTime;

use super::{
    aggregate::VehicleAggregate,
    reading::{DeviceClass, DeviceReading},
};

/// A single vehicle battery sample.
///
/// `soc` is the state of charge in percent (0-100); `kwh_delivered_dc` is the
/// cumulative DC energy delivered into the battery.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleReading {
    pub vehicle_id: String,
    pub soc: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

impl DeviceReading for VehicleReading {
    const CLASS: DeviceClass = DeviceClass::Vehicle;

    type Aggregate = VehicleAggregate;

    fn device_id(&self) -> &str {
        &self.vehicle_id
    }

    fn observed_at(&self) -> OffsetDateTime {
        self.observed_at
    }

    fn aggregate(readings: &[&Self]) -> VehicleAggregate {
        VehicleAggregate::from_readings(readings.iter().copied())
    }
}
