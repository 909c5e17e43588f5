//! Correlation of vehicle and meter history into a performance report.

pub mod alerts;
pub mod efficiency;
pub mod sessions;

use std::time::Instant;

use serde::Serialize;
use telemetry_client::domain::TimeWindow;
use time::{Duration, OffsetDateTime};

use crate::store::{StoreError, Stores};

pub use alerts::{generate_alerts, Alert, AlertThresholds, AlertType, Severity};
pub use efficiency::{
    analyze_trend, calculate_efficiency, calculate_power_loss, EfficiencyTrend, EnergySample,
    PowerLoss, Trend, INVALID_EFFICIENCY,
};
pub use sessions::count_charging_sessions;

/// Length of the report window ending at the request time.
pub const REPORT_WINDOW: Duration = Duration::hours(24);

#[derive(thiserror::Error, Debug)]
pub enum AnalyticsError {
    #[error("no active assignment found for vehicle {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_ac_consumed: f64,
    pub total_dc_delivered: f64,
    pub efficiency_ratio: f64,
    pub power_loss: PowerLoss,
    pub avg_battery_temp: f64,
    pub peak_battery_temp: f64,
    pub charging_sessions: u32,
    pub min_soc: f64,
    pub max_soc: f64,
    pub avg_voltage: f64,
    pub vehicle_readings: u64,
    pub meter_readings: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehiclePerformance {
    pub vehicle_id: String,
    pub meter_id: String,
    pub period: TimeWindow,
    pub metrics: PerformanceMetrics,
    pub alerts: Vec<Alert>,
}

pub struct AnalyticsEngine {
    stores: Stores,
    thresholds: AlertThresholds,
}

impl AnalyticsEngine {
    pub fn new(stores: Stores, thresholds: AlertThresholds) -> Self {
        Self { stores, thresholds }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Report over the 24 hours ending now.
    pub async fn vehicle_performance(
        &self,
        vehicle_id: &str,
    ) -> Result<VehiclePerformance, AnalyticsError> {
        self.vehicle_performance_at(vehicle_id, OffsetDateTime::now_utc())
            .await
    }

    /// Report over `[now - 24h, now)`.
    pub async fn vehicle_performance_at(
        &self,
        vehicle_id: &str,
        now: OffsetDateTime,
    ) -> Result<VehiclePerformance, AnalyticsError> {
        let started = Instant::now();
        let result = self.build_report(vehicle_id, now).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AnalyticsError::NotFound(_)) => "not_found",
            Err(AnalyticsError::Store(_)) => "error",
        };
        metrics::counter!("telemetry_analytics_requests_total", "outcome" => outcome).increment(1);
        metrics::histogram!("telemetry_analytics_query_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn build_report(
        &self,
        vehicle_id: &str,
        now: OffsetDateTime,
    ) -> Result<VehiclePerformance, AnalyticsError> {
        let assignment = self
            .stores
            .assignments
            .find_active_by_vehicle(vehicle_id)
            .await?
            .ok_or_else(|| AnalyticsError::NotFound(vehicle_id.to_string()))?;
        let meter_id = assignment.meter_id;
        let window = TimeWindow::trailing(now, REPORT_WINDOW);

        let (vehicle, meter, history) = tokio::try_join!(
            self.stores.vehicle_history.aggregate(vehicle_id, window),
            self.stores.meter_history.aggregate(&meter_id, window),
            self.stores.vehicle_history.range_scan(vehicle_id, window),
        )?;

        let charging_sessions = count_charging_sessions(history.iter().map(|r| r.reading.soc));
        let efficiency_ratio =
            calculate_efficiency(meter.total_kwh_consumed_ac, vehicle.total_kwh_delivered_dc);
        let alerts = generate_alerts(
            &self.thresholds,
            efficiency_ratio,
            vehicle.avg_battery_temp,
            vehicle.peak_battery_temp,
        );

        tracing::debug!(
            vehicle_id,
            meter_id = %meter_id,
            efficiency = efficiency_ratio,
            alerts = alerts.len(),
            "computed vehicle performance"
        );

        Ok(VehiclePerformance {
            vehicle_id: vehicle_id.to_string(),
            meter_id,
            period: window,
            metrics: PerformanceMetrics {
                total_ac_consumed: meter.total_kwh_consumed_ac,
                total_dc_delivered: vehicle.total_kwh_delivered_dc,
                efficiency_ratio,
                power_loss: calculate_power_loss(
                    meter.total_kwh_consumed_ac,
                    vehicle.total_kwh_delivered_dc,
                ),
                avg_battery_temp: vehicle.avg_battery_temp,
                peak_battery_temp: vehicle.peak_battery_temp,
                charging_sessions,
                min_soc: vehicle.min_soc,
                max_soc: vehicle.max_soc,
                avg_voltage: meter.avg_voltage,
                vehicle_readings: vehicle.readings,
                meter_readings: meter.readings,
            },
            alerts,
        })
    }
}
