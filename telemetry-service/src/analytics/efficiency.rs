//! AC to DC conversion efficiency.

use serde::Serialize;

/// Returned when more DC was delivered than AC consumed.
pub const INVALID_EFFICIENCY: f64 = -1.0;

const TREND_SLOPE_THRESHOLD: f64 = 0.1;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Percentage of consumed AC energy that reached the battery, rounded to one
/// decimal.
///
/// Returns `0.0` when either side is non-positive and [`INVALID_EFFICIENCY`]
/// when `dc_delivered > ac_consumed`; callers must treat the latter as a
/// metering fault, not as an efficiency above 100%.
pub fn calculate_efficiency(ac_consumed: f64, dc_delivered: f64) -> f64 {
    if ac_consumed <= 0.0 || dc_delivered <= 0.0 {
        return 0.0;
    }
    if dc_delivered > ac_consumed {
        return INVALID_EFFICIENCY;
    }
    round_to(dc_delivered / ac_consumed * 100.0, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EfficiencyTrend {
    pub trend: Trend,
    /// Efficiency points per sample, 2dp.
    pub slope: f64,
    /// 1dp.
    pub avg_efficiency: f64,
}

/// One energy sample for trend analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergySample {
    pub ac_consumed: f64,
    pub dc_delivered: f64,
}

/// Least-squares slope of per-sample efficiency against sample index.
///
/// A single sample reports its own efficiency, sentinel included. Otherwise
/// invalid samples are dropped before fitting, and with fewer than two valid
/// samples left the trend is stable with zero slope and zero average.
pub fn analyze_trend(samples: &[EnergySample]) -> EfficiencyTrend {
    let stable = |avg_efficiency| EfficiencyTrend {
        trend: Trend::Stable,
        slope: 0.0,
        avg_efficiency,
    };

    match samples {
        [] => return stable(0.0),
        [only] => return stable(calculate_efficiency(only.ac_consumed, only.dc_delivered)),
        _ => {}
    }

    let efficiencies: Vec<f64> = samples
        .iter()
        .map(|s| calculate_efficiency(s.ac_consumed, s.dc_delivered))
        .filter(|e| *e >= 0.0)
        .collect();

    if efficiencies.len() < 2 {
        return stable(0.0);
    }

    let n = efficiencies.len() as f64;
    let y_mean = efficiencies.iter().sum::<f64>() / n;
    let x_mean = (n - 1.0) / 2.0;

    let (num, den) = efficiencies
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    let slope = if den != 0.0 { num / den } else { 0.0 };

    let trend = if slope > TREND_SLOPE_THRESHOLD {
        Trend::Improving
    } else if slope < -TREND_SLOPE_THRESHOLD {
        Trend::Degrading
    } else {
        Trend::Stable
    };

    EfficiencyTrend {
        trend,
        slope: round_to(slope, 2),
        avg_efficiency: round_to(y_mean, 1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerLoss {
    pub loss_kwh: f64,
    pub loss_percentage: f64,
}

/// Energy lost between grid and battery. Never negative.
pub fn calculate_power_loss(ac_consumed: f64, dc_delivered: f64) -> PowerLoss {
    let loss_kwh = (ac_consumed - dc_delivered).max(0.0);
    let loss_percentage = if ac_consumed > 0.0 {
        round_to(loss_kwh / ac_consumed * 100.0, 1)
    } else {
        0.0
    };
    PowerLoss {
        loss_kwh: round_to(loss_kwh, 2),
        loss_percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ac: f64, dc: f64) -> EnergySample {
        EnergySample {
            ac_consumed: ac,
            dc_delivered: dc,
        }
    }

    #[test]
    fn efficiency_rounds_to_one_decimal() {
        assert_eq!(calculate_efficiency(450.5, 392.2), 87.1);
        assert_eq!(calculate_efficiency(100.0, 100.0), 100.0);
    }

    #[test]
    fn efficiency_edge_cases() {
        assert_eq!(calculate_efficiency(0.0, 10.0), 0.0);
        assert_eq!(calculate_efficiency(-5.0, 10.0), 0.0);
        assert_eq!(calculate_efficiency(10.0, 0.0), 0.0);
        assert_eq!(calculate_efficiency(10.0, -1.0), 0.0);
        assert_eq!(calculate_efficiency(10.0, 12.0), INVALID_EFFICIENCY);
    }

    #[test]
    fn trend_classifies_by_slope() {
        let improving = analyze_trend(&[
            sample(100.0, 80.0),
            sample(100.0, 85.0),
            sample(100.0, 90.0),
        ]);
        assert_eq!(improving.trend, Trend::Improving);
        assert_eq!(improving.slope, 5.0);
        assert_eq!(improving.avg_efficiency, 85.0);

        let degrading = analyze_trend(&[sample(100.0, 92.0), sample(100.0, 88.0)]);
        assert_eq!(degrading.trend, Trend::Degrading);
        assert_eq!(degrading.slope, -4.0);

        let flat = analyze_trend(&[sample(100.0, 90.0), sample(100.0, 90.0)]);
        assert_eq!(flat.trend, Trend::Stable);
    }

    #[test]
    fn trend_ignores_invalid_samples() {
        let trend = analyze_trend(&[sample(100.0, 80.0), sample(10.0, 20.0), sample(100.0, 90.0)]);
        assert_eq!(trend.slope, 10.0);
        assert_eq!(trend.avg_efficiency, 85.0);
    }

    #[test]
    fn trend_with_too_few_points_is_stable() {
        assert_eq!(
            analyze_trend(&[]),
            EfficiencyTrend { trend: Trend::Stable, slope: 0.0, avg_efficiency: 0.0 }
        );
        assert_eq!(analyze_trend(&[sample(100.0, 87.0)]).avg_efficiency, 87.0);
        assert_eq!(analyze_trend(&[sample(10.0, 20.0)]).avg_efficiency, INVALID_EFFICIENCY);
        assert_eq!(analyze_trend(&[sample(1.0, 5.0), sample(2.0, 9.0)]).avg_efficiency, 0.0);

        // One valid point among several samples is not a lone sample.
        assert_eq!(
            analyze_trend(&[sample(100.0, 87.0), sample(10.0, 20.0)]),
            EfficiencyTrend { trend: Trend::Stable, slope: 0.0, avg_efficiency: 0.0 }
        );
    }

    #[test]
    fn power_loss() {
        let loss = calculate_power_loss(450.5, 392.2);
        assert_eq!(loss.loss_kwh, 58.3);
        assert_eq!(loss.loss_percentage, 12.9);

        assert_eq!(
            calculate_power_loss(10.0, 12.0),
            PowerLoss { loss_kwh: 0.0, loss_percentage: 0.0 }
        );
        assert_eq!(calculate_power_loss(0.0, 0.0).loss_percentage, 0.0);
    }
}
