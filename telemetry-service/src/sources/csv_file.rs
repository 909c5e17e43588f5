use std::{fs::File, io::Read, path::PathBuf};

use csv::StringRecord;
use telemetry_client::domain::{MeterReading, Reading, VehicleReading};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// CSV backfill source for mixed meter and vehicle readings.
///
/// Expected header columns (by name):
/// - kind (`meter` or `vehicle`)
/// - device_id
/// - observed_at (RFC3339 timestamp)
/// - kwh_consumed_ac, voltage (meter rows)
/// - soc, kwh_delivered_dc, battery_temp (vehicle rows)
///
/// Columns that do not apply to a row's kind may be empty. Bad rows are
/// yielded as errors and reading continues.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

struct Row<'a> {
    record: &'a StringRecord,
    headers: &'a StringRecord,
}

impl Row<'_> {
    fn get(&self, name: &str) -> Result<&str, PipelineError> {
        self.headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| self.record.get(idx))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PipelineError::Source(format!("missing value for '{name}'")))
    }

    fn f64(&self, name: &str) -> Result<f64, PipelineError> {
        let raw = self.get(name)?;
        raw.parse()
            .map_err(|e| PipelineError::Source(format!("invalid {name} '{raw}': {e}")))
    }

    fn timestamp(&self) -> Result<OffsetDateTime, PipelineError> {
        let raw = self.get("observed_at")?;
        OffsetDateTime::parse(raw, &Rfc3339)
            .map_err(|e| PipelineError::Source(format!("invalid observed_at '{raw}': {e}")))
    }
}

fn record_to_reading(
    record: &StringRecord,
    headers: &StringRecord,
) -> Result<Reading, PipelineError> {
    let row = Row { record, headers };
    let device_id = row.get("device_id")?.to_string();
    let observed_at = row.timestamp()?;

    match row.get("kind")? {
        "meter" => Ok(Reading::Meter(MeterReading {
            meter_id: device_id,
            kwh_consumed_ac: row.f64("kwh_consumed_ac")?,
            voltage: row.f64("voltage")?,
            observed_at,
        })),
        "vehicle" => Ok(Reading::Vehicle(VehicleReading {
            vehicle_id: device_id,
            soc: row.f64("soc")?,
            kwh_delivered_dc: row.f64("kwh_delivered_dc")?,
            battery_temp: row.f64("battery_temp")?,
            observed_at,
        })),
        other => Err(PipelineError::Source(format!("unknown kind '{other}'"))),
    }
}

fn read_records<R>(reader: R) -> EnvelopeStream<Reading>
where
    R: Read + Send + 'static,
{
    // The csv reader is blocking; rows are parsed lazily as the stream is polled.
    let s = async_stream::stream! {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = match rdr.headers() {
            Ok(h) => h.clone(),
            Err(e) => {
                yield Err(PipelineError::Source(format!("failed to read CSV headers: {e}")));
                return;
            }
        };

        for (idx, result) in rdr.records().enumerate() {
            // Header is line 1.
            let line = idx + 2;
            let parsed = result
                .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))
                .and_then(|record| record_to_reading(&record, &headers));
            match parsed {
                Ok(reading) => yield Ok(Envelope::new(reading)),
                Err(e) => {
                    metrics::counter!("telemetry_source_parse_errors_total", "format" => "csv")
                        .increment(1);
                    yield Err(PipelineError::Source(format!("line {line}: {e}")));
                }
            }
        }
    };
    Box::pin(s)
}

#[async_trait::async_trait]
impl Source<Reading> for CsvFileSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        match File::open(&self.path) {
            Ok(file) => read_records(file),
            Err(e) => {
                let err = PipelineError::Source(format!(
                    "failed to open CSV file {}: {e}",
                    self.path.display()
                ));
                Box::pin(futures::stream::iter([Err(err)]))
            }
        }
    }
}
