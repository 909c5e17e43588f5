use std::{fmt, str::FromStr};

use time::OffsetDateTime;

use super::reading::DeviceReading;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

/// Reachability of a device as seen by the live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceStatus {
    #[default]
    Online,
    Offline,
    Warning,
    Error,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(ParseStatusError {
                kind: "device status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Charging state of a vehicle, derived at live-state write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChargingStatus {
    Charging,
    Idle,
    Discharging,
    Error,
}

impl ChargingStatus {
    /// Threshold classification of a single state-of-charge sample.
    ///
    /// `>= 99` is idle (full), `< 5` is an error, anything in between is
    /// charging. `Discharging` is never produced here since it needs a delta.
    pub fn from_soc(soc: f64) -> Self {
        if soc >= 99.0 {
            Self::Idle
        } else if soc < 5.0 {
            Self::Error
        } else {
            Self::Charging
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Charging => "charging",
            Self::Idle => "idle",
            Self::Discharging => "discharging",
            Self::Error => "error",
        }
    }
}

impl FromStr for ChargingStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charging" => Ok(Self::Charging),
            "idle" => Ok(Self::Idle),
            "discharging" => Ok(Self::Discharging),
            "error" => Ok(Self::Error),
            other => Err(ParseStatusError {
                kind: "charging status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChargingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single current-state row kept per device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LiveState<R> {
    pub reading: R,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub last_reported_at: OffsetDateTime,
    pub status: DeviceStatus,
    /// Vehicles only.
    pub charging_status: Option<ChargingStatus>,
    /// Vehicles only: the meter paired at the time of the last write.
    pub associated_meter_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub updated_at: OffsetDateTime,
}

impl<R: DeviceReading> LiveState<R> {
    pub fn device_id(&self) -> &str {
        self.reading.device_id()
    }
}
