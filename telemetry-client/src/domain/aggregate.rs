use time::{Duration, OffsetDateTime};

use super::{MeterReading, VehicleReading};

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TimeWindow {
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub start: OffsetDateTime,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub end: OffsetDateTime,
}

impl TimeWindow {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    /// The window of length `span` ending at `end`.
    pub fn trailing(end: OffsetDateTime, span: Duration) -> Self {
        Self {
            start: end - span,
            end,
        }
    }

    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Meter history rolled up over a window. All zero when the window is empty.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeterAggregate {
    pub total_kwh_consumed_ac: f64,
    pub avg_voltage: f64,
    #[sqlx(try_from = "i64")]
    pub readings: u64,
}

/// Vehicle history rolled up over a window. All zero when the window is empty.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VehicleAggregate {
    pub total_kwh_delivered_dc: f64,
    pub avg_battery_temp: f64,
    pub min_battery_temp: f64,
    pub peak_battery_temp: f64,
    pub min_soc: f64,
    pub max_soc: f64,
    #[sqlx(try_from = "i64")]
    pub readings: u64,
}

impl MeterAggregate {
    pub fn from_readings<'a>(readings: impl IntoIterator<Item = &'a MeterReading>) -> Self {
        let mut agg = Self::default();
        let mut voltage_sum = 0.0;

        for m in readings {
            agg.total_kwh_consumed_ac += m.kwh_consumed_ac;
            voltage_sum += m.voltage;
            agg.readings += 1;
        }

        if agg.readings > 0 {
            agg.avg_voltage = voltage_sum / agg.readings as f64;
        }
        agg
    }
}

impl VehicleAggregate {
    pub fn from_readings<'a>(readings: impl IntoIterator<Item = &'a VehicleReading>) -> Self {
        let mut agg = Self::default();
        let mut temp_sum = 0.0;

        for v in readings {
            if agg.readings == 0 {
                agg.min_battery_temp = v.battery_temp;
                agg.peak_battery_temp = v.battery_temp;
                agg.min_soc = v.soc;
                agg.max_soc = v.soc;
            } else {
                agg.min_battery_temp = agg.min_battery_temp.min(v.battery_temp);
                agg.peak_battery_temp = agg.peak_battery_temp.max(v.battery_temp);
                agg.min_soc = agg.min_soc.min(v.soc);
                agg.max_soc = agg.max_soc.max(v.soc);
            }
            agg.total_kwh_delivered_dc += v.kwh_delivered_dc;
            temp_sum += v.battery_temp;
            agg.readings += 1;
        }

        if agg.readings > 0 {
            agg.avg_battery_temp = temp_sum / agg.readings as f64;
        }
        agg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn vehicle(soc: f64, dc: f64, temp: f64) -> VehicleReading {
        VehicleReading {
            vehicle_id: "VH-001".to_string(),
            soc,
            kwh_delivered_dc: dc,
            battery_temp: temp,
            observed_at: datetime!(2025-01-31 10:00:00 UTC),
        }
    }

    #[test]
    fn empty_rollups_are_zero() {
        assert_eq!(MeterAggregate::from_readings([]), MeterAggregate::default());
        assert_eq!(VehicleAggregate::from_readings([]), VehicleAggregate::default());
    }

    #[test]
    fn vehicle_rollup_tracks_extremes_and_mean() {
        let readings = [vehicle(40.0, 10.0, 30.0), vehicle(80.0, 12.5, 50.0), vehicle(60.0, 2.5, 40.0)];
        let agg = VehicleAggregate::from_readings(readings.iter());

        assert_eq!(agg.readings, 3);
        assert_eq!(agg.total_kwh_delivered_dc, 25.0);
        assert_eq!(agg.avg_battery_temp, 40.0);
        assert_eq!(agg.min_battery_temp, 30.0);
        assert_eq!(agg.peak_battery_temp, 50.0);
        assert_eq!(agg.min_soc, 40.0);
        assert_eq!(agg.max_soc, 80.0);
    }

    #[test]
    fn meter_rollup_sums_energy_and_averages_voltage() {
        let at = datetime!(2025-01-31 10:00:00 UTC);
        let readings = [
            MeterReading { meter_id: "M-1".into(), kwh_consumed_ac: 100.0, voltage: 230.0, observed_at: at },
            MeterReading { meter_id: "M-1".into(), kwh_consumed_ac: 50.5, voltage: 240.0, observed_at: at },
        ];
        let agg = MeterAggregate::from_readings(readings.iter());

        assert_eq!(agg.total_kwh_consumed_ac, 150.5);
        assert_eq!(agg.avg_voltage, 235.0);
        assert_eq!(agg.readings, 2);
    }

    #[test]
    fn trailing_window_is_half_open() {
        let end = datetime!(2025-01-31 10:00:00 UTC);
        let w = TimeWindow::trailing(end, Duration::hours(24));

        assert_eq!(w.start, datetime!(2025-01-30 10:00:00 UTC));
        assert!(w.contains(w.start));
        assert!(w.contains(datetime!(2025-01-31 09:59:59 UTC)));
        assert!(!w.contains(end));
    }
}
