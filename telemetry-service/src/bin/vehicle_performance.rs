use anyhow::{bail, Context, Result};
use std::env;
use telemetry_service::{
    analytics::{AnalyticsEngine, AnalyticsError},
    config::AppConfig,
    observability,
    store::Stores,
};

/// Prints the 24-hour performance report for one vehicle as JSON.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let Some(vehicle_id) = env::args().nth(1) else {
        bail!("usage: vehicle_performance <vehicle_id>");
    };

    let cfg = AppConfig::load()?;
    let stores = Stores::connect(&cfg.database, cfg.live_state.policy).await?;
    let engine = AnalyticsEngine::new(stores, cfg.analytics);

    match engine.vehicle_performance(&vehicle_id).await {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).context("serializing report")?;
            println!("{json}");
            Ok(())
        }
        Err(e @ AnalyticsError::NotFound(_)) => {
            tracing::warn!(vehicle_id = %vehicle_id, "no active assignment");
            Err(e.into())
        }
        Err(e) => Err(e).context("computing vehicle performance"),
    }
}
