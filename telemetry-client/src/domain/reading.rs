use std::fmt;

use time::OffsetDateTime;

use super::{MeterReading, VehicleReading};

/// The two kinds of device that report telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceClass {
    Meter,
    Vehicle,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meter => "meter",
            Self::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common view over meter and vehicle readings.
pub trait DeviceReading: Clone + Send + Sync + 'static {
    const CLASS: DeviceClass;

    /// Window rollup produced for this kind of reading.
    type Aggregate: Clone + Default + Send + Sync + 'static;

    fn device_id(&self) -> &str;

    /// Caller-supplied observation time; may arrive out of order.
    fn observed_at(&self) -> OffsetDateTime;

    /// Roll up readings the way the history store's aggregate query does.
    fn aggregate(readings: &[&Self]) -> Self::Aggregate;
}

/// Either kind of reading, as it arrives at the service boundary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "lowercase"))]
pub enum Reading {
    Meter(MeterReading),
    Vehicle(VehicleReading),
}

impl Reading {
    pub fn class(&self) -> DeviceClass {
        match self {
            Self::Meter(_) => DeviceClass::Meter,
            Self::Vehicle(_) => DeviceClass::Vehicle,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Self::Meter(m) => m.device_id(),
            Self::Vehicle(v) => v.device_id(),
        }
    }

    pub fn observed_at(&self) -> OffsetDateTime {
        match self {
            Self::Meter(m) => m.observed_at,
            Self::Vehicle(v) => v.observed_at,
        }
    }
}

impl From<MeterReading> for Reading {
    fn from(m: MeterReading) -> Self {
        Self::Meter(m)
    }
}

impl From<VehicleReading> for Reading {
    fn from(v: VehicleReading) -> Self {
        Self::Vehicle(v)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn reading_deserializes_from_tagged_json() {
        let line = r#"{"kind":"vehicle","vehicle_id":"VH-001","soc":64.5,"kwh_delivered_dc":12.0,"battery_temp":31.2,"observed_at":"2025-01-31T10:00:00Z"}"#;
        let reading: Reading = serde_json::from_str(line).unwrap();

        assert_eq!(reading.class(), DeviceClass::Vehicle);
        assert_eq!(reading.device_id(), "VH-001");
        assert_eq!(reading.observed_at(), datetime!(2025-01-31 10:00:00 UTC));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let line = r#"{"kind":"inverter","id":"X"}"#;
        assert!(serde_json::from_str::<Reading>(line).is_err());
    }
}
