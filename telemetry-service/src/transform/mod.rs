use crate::pipeline::{Envelope, PipelineError, Transform};
use telemetry_client::domain::{MeterReading, Reading, VehicleReading};
use time::{macros::datetime, OffsetDateTime};

const MIN_TS: OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);
const MAX_TS: OffsetDateTime = datetime!(2100-01-01 00:00:00 UTC);
const MAX_VOLTAGE: f64 = 500.0;
const MIN_BATTERY_TEMP: f64 = -40.0;
const MAX_BATTERY_TEMP: f64 = 100.0;

fn reject(msg: impl Into<String>) -> PipelineError {
    PipelineError::Transform(msg.into())
}

fn check_timestamp(ts: OffsetDateTime) -> Result<(), PipelineError> {
    if ts < MIN_TS || ts > MAX_TS {
        return Err(reject("timestamp out of allowed range"));
    }
    Ok(())
}

fn check_id(id: &str) -> Result<(), PipelineError> {
    if id.trim().is_empty() {
        return Err(reject("device id must not be empty"));
    }
    Ok(())
}

/// Rules:
/// - kWh consumed must be non-negative.
/// - voltage must be within [0, 500].
pub fn validate_meter(m: &MeterReading) -> Result<(), PipelineError> {
    check_id(&m.meter_id)?;
    if m.kwh_consumed_ac.is_nan() || m.kwh_consumed_ac < 0.0 {
        return Err(reject("kwh_consumed_ac must be non-negative"));
    }
    if !(0.0..=MAX_VOLTAGE).contains(&m.voltage) {
        return Err(reject("voltage out of range"));
    }
    check_timestamp(m.observed_at)
}

/// Rules:
/// - state of charge must be within [0, 100].
/// - kWh delivered must be non-negative.
/// - battery temperature must be within [-40, 100] °C.
pub fn validate_vehicle(v: &VehicleReading) -> Result<(), PipelineError> {
    check_id(&v.vehicle_id)?;
    if !(0.0..=100.0).contains(&v.soc) {
        return Err(reject("soc must be within 0-100"));
    }
    if v.kwh_delivered_dc.is_nan() || v.kwh_delivered_dc < 0.0 {
        return Err(reject("kwh_delivered_dc must be non-negative"));
    }
    if !(MIN_BATTERY_TEMP..=MAX_BATTERY_TEMP).contains(&v.battery_temp) {
        return Err(reject("battery_temp out of range"));
    }
    check_timestamp(v.observed_at)
}

pub fn validate_reading(env: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
    match &env.payload {
        Reading::Meter(m) => validate_meter(m)?,
        Reading::Vehicle(v) => validate_vehicle(v)?,
    }
    Ok(env)
}

/// Range checks normally enforced by the API boundary in front of the core.
#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<Reading, Reading> for ReadingValidation {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        let class = input.payload.class();
        match validate_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("telemetry_validation_rejected_total", "class" => class.as_str())
                    .increment(1);
                Err(e)
            }
        }
    }
}
