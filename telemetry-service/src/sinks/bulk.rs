use std::{future::Future, sync::Arc, time::Duration};

use futures::{Stream, StreamExt};
use telemetry_client::domain::{DeviceClass, Reading};

use crate::{
    coordinator::{BulkTelemetry, Coordinator, IngestError},
    pipeline::{Envelope, PipelineError, Sink},
};

/// Groups readings into chunks and writes each chunk through the
/// coordinator's bulk path, bypassing the buffer.
///
/// A class that fails within a chunk is retried on its own with linear
/// backoff, so the class that succeeded is never written twice.
pub struct BulkSink {
    coordinator: Arc<Coordinator>,
    chunk_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl BulkSink {
    pub fn new(
        coordinator: Arc<Coordinator>,
        chunk_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            coordinator,
            chunk_size: chunk_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    async fn write_chunk(&self, chunk: BulkTelemetry) -> Result<usize, PipelineError> {
        let summary = self.coordinator.ingest_bulk(chunk.clone()).await;
        if summary.is_success() {
            return Ok(summary.total_processed);
        }

        let mut written = summary.total_processed;
        if summary.class_failed(DeviceClass::Meter) {
            written += self
                .retry("meters", || self.coordinator.write_meter_batch(&chunk.meters))
                .await?;
        }
        if summary.class_failed(DeviceClass::Vehicle) {
            written += self
                .retry("vehicles", || self.coordinator.write_vehicle_batch(&chunk.vehicles))
                .await?;
        }
        Ok(written)
    }

    async fn retry<F, Fut>(&self, class: &'static str, mut write: F) -> Result<usize, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<usize, IngestError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tokio::time::sleep(self.retry_backoff * attempt).await;
            match write().await {
                Ok(n) => return Ok(n),
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(class, attempt, error = %e, "bulk write failed, retrying with backoff");
                }
                Err(e) => {
                    tracing::error!(class, attempt, error = %e, "bulk write failed, giving up");
                    metrics::counter!("telemetry_bulk_sink_errors_total", "class" => class).increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<Reading> for BulkSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut chunk = BulkTelemetry::default();
        let mut written: usize = 0;
        let mut rejected: u64 = 0;

        while let Some(item) = input.next().await {
            match item {
                Ok(env) => chunk.push(env.payload),
                Err(e) => {
                    rejected += 1;
                    tracing::warn!(error = %e, "dropping reading");
                    continue;
                }
            }
            if chunk.len() >= self.chunk_size {
                written += self.write_chunk(std::mem::take(&mut chunk)).await?;
            }
        }

        if !chunk.is_empty() {
            written += self.write_chunk(chunk).await?;
        }

        tracing::info!(written, rejected, "bulk load finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStores;
    use telemetry_client::domain::{MeterReading, VehicleReading};
    use time::macros::datetime;

    #[tokio::test]
    async fn only_the_failed_class_is_retried() {
        let stores = MemoryStores::default();
        stores.vehicle_live.writes().set_failing(true);
        let coordinator = Arc::new(Coordinator::new(stores.stores(), Default::default()));
        let sink = BulkSink::new(coordinator, 10, 1, Duration::ZERO);

        let items = vec![
            Ok(Envelope::new(Reading::Meter(MeterReading {
                meter_id: "M-1".into(),
                kwh_consumed_ac: 1.0,
                voltage: 240.0,
                observed_at: datetime!(2025-01-31 10:00 UTC),
            }))),
            Ok(Envelope::new(Reading::Vehicle(VehicleReading {
                vehicle_id: "V-1".into(),
                soc: 55.0,
                kwh_delivered_dc: 0.9,
                battery_temp: 30.0,
                observed_at: datetime!(2025-01-31 10:00 UTC),
            }))),
        ];
        let result = sink.run(futures::stream::iter(items)).await;

        assert!(matches!(result, Err(PipelineError::Sink(_))), "{result:?}");
        assert_eq!(stores.meter_history.len(), 1);
        assert_eq!(stores.meter_history.writes().bulk_calls(), 1);
        assert_eq!(stores.vehicle_live.writes().bulk_calls(), 2);
    }
}
