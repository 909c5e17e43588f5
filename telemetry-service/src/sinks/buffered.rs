use std::sync::Arc;

use futures::{Stream, StreamExt};
use telemetry_client::domain::Reading;

use crate::{
    buffer::{IngestionBuffer, ReadingWriter},
    pipeline::{Envelope, PipelineError, Sink},
};

/// Feeds each reading into the ingestion buffer. The buffer is not stopped
/// when the stream ends; its owner does that.
pub struct BufferedSink<W> {
    buffer: Arc<IngestionBuffer<W>>,
}

impl<W> BufferedSink<W> {
    pub fn new(buffer: Arc<IngestionBuffer<W>>) -> Self {
        Self { buffer }
    }
}

#[async_trait::async_trait]
impl<W: ReadingWriter> Sink<Reading> for BufferedSink<W> {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut accepted: u64 = 0;
        let mut rejected: u64 = 0;

        while let Some(item) = input.next().await {
            match item {
                Ok(env) => {
                    self.buffer.enqueue(env.payload).await;
                    accepted += 1;
                }
                Err(e) => {
                    rejected += 1;
                    tracing::warn!(error = %e, "dropping reading");
                }
            }
        }

        tracing::info!(accepted, rejected, "input stream finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::BufferConfig, coordinator::Coordinator, store::MemoryStores};
    use telemetry_client::domain::MeterReading;
    use time::macros::datetime;

    #[tokio::test]
    async fn enqueues_good_items_and_skips_errors() {
        let stores = MemoryStores::default();
        let coordinator = Arc::new(Coordinator::new(stores.stores(), Default::default()));
        let buffer = Arc::new(IngestionBuffer::start(&BufferConfig::default(), coordinator));
        let sink = BufferedSink::new(Arc::clone(&buffer));

        let reading = Reading::Meter(MeterReading {
            meter_id: "M-1".into(),
            kwh_consumed_ac: 1.0,
            voltage: 240.0,
            observed_at: datetime!(2025-01-31 10:00 UTC),
        });
        let items = vec![
            Ok(Envelope::new(reading)),
            Err(PipelineError::Source("bad line".into())),
        ];
        sink.run(futures::stream::iter(items)).await.unwrap();

        assert_eq!(buffer.queue_status().meter_queue_size, 1);
        assert_eq!(buffer.stop().await.unwrap(), 1);
        assert_eq!(stores.meter_history.len(), 1);
    }
}
