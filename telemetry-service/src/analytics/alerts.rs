//! Threshold alerts for a performance report.

use serde::{Deserialize, Serialize};

/// Below this efficiency a low-efficiency alert is critical.
pub const CRITICAL_EFFICIENCY: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub efficiency: f64,
    pub battery_temp_warning: f64,
    pub battery_temp_critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            efficiency: 85.0,
            battery_temp_warning: 45.0,
            battery_temp_critical: 55.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    LowEfficiency,
    HighBatteryTemp,
    CriticalBatteryTemp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub severity: Severity,
    pub message: String,
    pub threshold: f64,
    pub actual_value: f64,
}

/// Evaluate efficiency first, then temperature.
///
/// The efficiency alert fires only for `0 < efficiency < threshold`, so the
/// invalid-efficiency sentinel never alerts. A critical peak temperature
/// suppresses the average-temperature warning.
pub fn generate_alerts(
    thresholds: &AlertThresholds,
    efficiency: f64,
    avg_temp: f64,
    peak_temp: f64,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if efficiency > 0.0 && efficiency < thresholds.efficiency {
        alerts.push(Alert {
            kind: AlertType::LowEfficiency,
            severity: if efficiency < CRITICAL_EFFICIENCY {
                Severity::Critical
            } else {
                Severity::Warning
            },
            message: format!(
                "Power efficiency ({efficiency:.1}%) is below the {}% threshold. \
                 This may indicate hardware faults or energy leakage.",
                thresholds.efficiency
            ),
            threshold: thresholds.efficiency,
            actual_value: efficiency,
        });
    }

    if peak_temp >= thresholds.battery_temp_critical {
        alerts.push(Alert {
            kind: AlertType::CriticalBatteryTemp,
            severity: Severity::Critical,
            message: format!(
                "Peak battery temperature ({peak_temp:.1}°C) exceeded critical threshold. \
                 Immediate inspection required."
            ),
            threshold: thresholds.battery_temp_critical,
            actual_value: peak_temp,
        });
    } else if avg_temp >= thresholds.battery_temp_warning {
        alerts.push(Alert {
            kind: AlertType::HighBatteryTemp,
            severity: Severity::Warning,
            message: format!(
                "Average battery temperature ({avg_temp:.1}°C) is elevated. Monitor cooling system."
            ),
            threshold: thresholds.battery_temp_warning,
            actual_value: avg_temp,
        });
    }

    alerts
}
