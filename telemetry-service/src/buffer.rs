//! Per-class in-memory buffering in front of the coordinator.
//!
//! Readings accumulate in one FIFO per device class. A class is flushed in
//! batches of at most `batch_size` when it reaches that size, on every timer
//! tick, and synchronously (both classes) once a class reaches
//! `max_queue_size`. Failed batches go back to the front of their queue.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use telemetry_client::domain::{DeviceClass, DeviceReading, MeterReading, Reading, VehicleReading};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::BufferConfig,
    coordinator::{Coordinator, IngestError},
};

/// Destination of buffered batches for one reading type.
#[async_trait::async_trait]
pub trait BatchWriter<R>: Send + Sync + 'static {
    async fn write_batch(&self, batch: &[R]) -> Result<usize, IngestError>;
}

/// A writer accepting both device classes.
pub trait ReadingWriter: BatchWriter<MeterReading> + BatchWriter<VehicleReading> {}

impl<W> ReadingWriter for W where W: BatchWriter<MeterReading> + BatchWriter<VehicleReading> {}

#[async_trait::async_trait]
impl BatchWriter<MeterReading> for Coordinator {
    async fn write_batch(&self, batch: &[MeterReading]) -> Result<usize, IngestError> {
        self.write_meter_batch(batch).await
    }
}

#[async_trait::async_trait]
impl BatchWriter<VehicleReading> for Coordinator {
    async fn write_batch(&self, batch: &[VehicleReading]) -> Result<usize, IngestError> {
        self.write_vehicle_batch(batch).await
    }
}

#[derive(Debug)]
pub enum FlushOutcome {
    /// A batch of this many readings was written and discarded.
    Flushed(usize),
    /// Nothing was pending.
    Empty,
    /// Another flush of the same class was already in flight.
    Skipped,
    /// The batch was put back at the front of the queue.
    Failed(IngestError),
}

impl FlushOutcome {
    pub fn flushed(&self) -> usize {
        match self {
            Self::Flushed(n) => *n,
            _ => 0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Flushed(_) => "flushed",
            Self::Empty => "empty",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct FlushSummary {
    pub meters: FlushOutcome,
    pub vehicles: FlushOutcome,
}

impl FlushSummary {
    pub fn flushed(&self) -> usize {
        self.meters.flushed() + self.vehicles.flushed()
    }

    /// Total flushed, or the first failure.
    pub fn into_result(self) -> Result<usize, IngestError> {
        let flushed = self.flushed();
        match (self.meters, self.vehicles) {
            (FlushOutcome::Failed(e), _) | (_, FlushOutcome::Failed(e)) => Err(e),
            _ => Ok(flushed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub meter_queue_size: usize,
    pub vehicle_queue_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Skip,
    Wait,
}

struct Lane<R> {
    class: DeviceClass,
    queue: Mutex<VecDeque<R>>,
    // Held for the duration of a write; one flush per class at a time.
    in_flight: tokio::sync::Mutex<()>,
}

impl<R: DeviceReading> Lane<R> {
    fn new(class: DeviceClass) -> Self {
        Self {
            class,
            queue: Mutex::new(VecDeque::new()),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    fn push(&self, reading: R) -> usize {
        let len = {
            let mut queue = self.queue.lock();
            queue.push_back(reading);
            queue.len()
        };
        self.report_depth(len);
        len
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }

    fn report_depth(&self, len: usize) {
        metrics::gauge!("telemetry_buffer_pending", "class" => self.class.as_str()).set(len as f64);
    }

    async fn flush<W>(&self, writer: &W, batch_size: usize, in_flight: InFlight) -> FlushOutcome
    where
        W: BatchWriter<R> + ?Sized,
    {
        let _guard = match in_flight {
            InFlight::Wait => self.in_flight.lock().await,
            InFlight::Skip => match self.in_flight.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(class = %self.class, "flush already in flight, skipping");
                    return FlushOutcome::Skipped;
                }
            },
        };

        let (batch, remaining) = {
            let mut queue = self.queue.lock();
            let n = batch_size.min(queue.len());
            let batch: Vec<R> = queue.drain(..n).collect();
            (batch, queue.len())
        };
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        self.report_depth(remaining);

        let outcome = match writer.write_batch(&batch).await {
            Ok(n) => {
                tracing::debug!(class = %self.class, count = n, remaining, "flushed batch");
                FlushOutcome::Flushed(n)
            }
            Err(e) => {
                let len = {
                    let mut queue = self.queue.lock();
                    for reading in batch.into_iter().rev() {
                        queue.push_front(reading);
                    }
                    queue.len()
                };
                self.report_depth(len);
                tracing::warn!(class = %self.class, error = %e, pending = len, "flush failed, batch requeued");
                FlushOutcome::Failed(e)
            }
        };
        metrics::counter!("telemetry_buffer_flushes_total", "class" => self.class.as_str(), "outcome" => outcome.label())
            .increment(1);
        outcome
    }
}

struct Shared<W> {
    writer: Arc<W>,
    batch_size: usize,
    max_queue_size: usize,
    meters: Lane<MeterReading>,
    vehicles: Lane<VehicleReading>,
}

impl<W: ReadingWriter> Shared<W> {
    async fn flush_class(&self, class: DeviceClass, in_flight: InFlight) -> FlushOutcome {
        match class {
            DeviceClass::Meter => {
                self.meters
                    .flush(self.writer.as_ref(), self.batch_size, in_flight)
                    .await
            }
            DeviceClass::Vehicle => {
                self.vehicles
                    .flush(self.writer.as_ref(), self.batch_size, in_flight)
                    .await
            }
        }
    }

    async fn flush_both(&self, in_flight: InFlight) -> FlushSummary {
        let (meters, vehicles) = tokio::join!(
            self.flush_class(DeviceClass::Meter, in_flight),
            self.flush_class(DeviceClass::Vehicle, in_flight),
        );
        FlushSummary { meters, vehicles }
    }

    /// Flush one class batch by batch until it is empty or a write fails.
    async fn drain_class(&self, class: DeviceClass) -> Result<usize, IngestError> {
        let mut drained = 0;
        loop {
            match self.flush_class(class, InFlight::Wait).await {
                FlushOutcome::Flushed(n) => drained += n,
                FlushOutcome::Empty | FlushOutcome::Skipped => return Ok(drained),
                FlushOutcome::Failed(e) => return Err(e),
            }
        }
    }
}

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owned buffer handle with an explicit `start`/`stop` lifecycle.
pub struct IngestionBuffer<W> {
    shared: Arc<Shared<W>>,
    ticker: Mutex<Option<Ticker>>,
}

impl<W: ReadingWriter> IngestionBuffer<W> {
    /// Create the buffer and spawn its periodic flush task. Must be called
    /// inside a tokio runtime.
    pub fn start(config: &BufferConfig, writer: Arc<W>) -> Self {
        let shared = Arc::new(Shared {
            writer,
            batch_size: config.batch_size,
            max_queue_size: config.max_queue_size,
            meters: Lane::new(DeviceClass::Meter),
            vehicles: Lane::new(DeviceClass::Vehicle),
        });

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(
            Arc::clone(&shared),
            config.flush_interval(),
            cancel.clone(),
        ));

        tracing::info!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            max_queue_size = config.max_queue_size,
            "ingestion buffer started"
        );

        Self {
            shared,
            ticker: Mutex::new(Some(Ticker { cancel, handle })),
        }
    }

    /// Accept one reading. Never fails: write errors from the flushes this
    /// triggers are logged, and failed batches stay queued.
    pub async fn enqueue(&self, reading: Reading) {
        let (class, len) = match reading {
            Reading::Meter(m) => (DeviceClass::Meter, self.shared.meters.push(m)),
            Reading::Vehicle(v) => (DeviceClass::Vehicle, self.shared.vehicles.push(v)),
        };

        if len >= self.shared.max_queue_size {
            tracing::warn!(class = %class, pending = len, "queue at hard cap, flushing synchronously");
            metrics::counter!("telemetry_buffer_backpressure_total", "class" => class.as_str())
                .increment(1);
            let summary = self.shared.flush_both(InFlight::Wait).await;
            log_failures("backpressure", &summary);
        } else if len >= self.shared.batch_size {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let FlushOutcome::Failed(e) = shared.flush_class(class, InFlight::Skip).await {
                    tracing::error!(class = %class, error = %e, "size-triggered flush failed");
                }
            });
        }
    }

    /// Flush one batch of each class now. In-flight classes are skipped.
    pub async fn flush_now(&self) -> FlushSummary {
        self.shared.flush_both(InFlight::Skip).await
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            meter_queue_size: self.shared.meters.len(),
            vehicle_queue_size: self.shared.vehicles.len(),
        }
    }

    /// Cancel the periodic task, then drain both classes. Readings in a
    /// class whose write fails are left queued and reported as the error.
    pub async fn stop(&self) -> Result<usize, IngestError> {
        let ticker = self.ticker.lock().take();
        if let Some(Ticker { cancel, handle }) = ticker {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "flush task ended abnormally");
            }
        }

        let (meters, vehicles) = tokio::join!(
            self.shared.drain_class(DeviceClass::Meter),
            self.shared.drain_class(DeviceClass::Vehicle),
        );
        let status = self.queue_status();
        match (meters, vehicles) {
            (Ok(m), Ok(v)) => {
                tracing::info!(meters = m, vehicles = v, "ingestion buffer stopped");
                Ok(m + v)
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(
                    error = %e,
                    meters_pending = status.meter_queue_size,
                    vehicles_pending = status.vehicle_queue_size,
                    "final flush failed, readings left queued"
                );
                Err(e)
            }
        }
    }
}

impl<W> Drop for IngestionBuffer<W> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.cancel.cancel();
        }
    }
}

async fn run_ticker<W: ReadingWriter>(
    shared: Arc<Shared<W>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let summary = shared.flush_both(InFlight::Skip).await;
                log_failures("timer", &summary);
            }
        }
    }
}

fn log_failures(trigger: &'static str, summary: &FlushSummary) {
    for (class, outcome) in [
        (DeviceClass::Meter, &summary.meters),
        (DeviceClass::Vehicle, &summary.vehicles),
    ] {
        if let FlushOutcome::Failed(e) = outcome {
            tracing::error!(trigger, class = %class, error = %e, "flush failed");
        }
    }
}
