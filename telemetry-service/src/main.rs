use anyhow::Result;
use std::{env, sync::Arc};
use telemetry_client::domain::Reading;
use telemetry_service::{
    buffer::IngestionBuffer,
    config::AppConfig,
    coordinator::Coordinator,
    observability,
    pipeline::Pipeline,
    sinks::BufferedSink,
    sources::NdjsonSource,
    store::Stores,
    transform::ReadingValidation,
};

/// Streams NDJSON readings from a file or stdin through the ingestion buffer.
///
/// usage: telemetry-service [<ndjson_file_path> | -]
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let policy = cfg.live_state.policy;
    let stores = Stores::connect(&cfg.database, policy).await?;

    let coordinator = Arc::new(Coordinator::new(stores, policy));
    let buffer = Arc::new(IngestionBuffer::start(&cfg.buffer, coordinator));

    let source = NdjsonSource::from_arg(env::args().nth(1));
    let pipeline = Pipeline::<_, Reading, _>::new(source, BufferedSink::new(Arc::clone(&buffer)))
        .with_transform(ReadingValidation);

    tokio::select! {
        res = pipeline.run() => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    let status = buffer.queue_status();
    tracing::info!(
        meters = status.meter_queue_size,
        vehicles = status.vehicle_queue_size,
        "flushing pending readings"
    );
    buffer.stop().await?;

    Ok(())
}
