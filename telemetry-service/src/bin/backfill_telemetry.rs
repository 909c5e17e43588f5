use anyhow::{bail, Result};
use std::{env, path::Path, sync::Arc, time::Duration};
use telemetry_client::domain::Reading;
use telemetry_service::{
    config::AppConfig,
    coordinator::Coordinator,
    observability,
    pipeline::Pipeline,
    sinks::BulkSink,
    sources::{CsvFileSource, NdjsonSource},
    store::Stores,
    transform::ReadingValidation,
};

const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Loads a file of readings through the bulk path, bypassing the buffer.
/// `.csv` files use the CSV source, anything else is read as NDJSON.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_telemetry <file.ndjson|file.csv>");
    }
    let file_path = &args[1];

    // TELEMETRY_CONFIG can point at a backfill-specific file.
    let cfg = AppConfig::load()?;
    let policy = cfg.live_state.policy;
    let stores = Stores::connect(&cfg.database, policy).await?;
    let coordinator = Arc::new(Coordinator::new(stores, policy));

    let sink = BulkSink::new(coordinator, cfg.buffer.batch_size, MAX_RETRIES, RETRY_BACKOFF);

    let is_csv = Path::new(file_path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        Pipeline::<_, Reading, _>::new(CsvFileSource::new(file_path), sink)
            .with_transform(ReadingValidation)
            .run()
            .await?;
    } else {
        Pipeline::<_, Reading, _>::new(NdjsonSource::file(file_path), sink)
            .with_transform(ReadingValidation)
            .run()
            .await?;
    }

    Ok(())
}
