use std::path::PathBuf;

use futures::StreamExt;
use telemetry_client::domain::Reading;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Longest accepted line; longer lines are reported and skipped.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdjsonInput {
    Stdin,
    File(PathBuf),
}

/// Newline-delimited JSON readings, one tagged [`Reading`] per line:
///
/// ```text
/// {"kind":"meter","meter_id":"M-1","kwh_consumed_ac":1.2,"voltage":239.8,"observed_at":"2025-01-31T10:00:00Z"}
/// {"kind":"vehicle","vehicle_id":"V-1","soc":54.0,"kwh_delivered_dc":1.0,"battery_temp":31.5,"observed_at":"2025-01-31T10:00:00Z"}
/// ```
///
/// Malformed lines are yielded as errors and reading continues.
pub struct NdjsonSource {
    input: NdjsonInput,
}

impl NdjsonSource {
    pub fn stdin() -> Self {
        Self {
            input: NdjsonInput::Stdin,
        }
    }

    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            input: NdjsonInput::File(path.into()),
        }
    }

    /// `None` or `-` reads stdin.
    pub fn from_arg(arg: Option<String>) -> Self {
        match arg.as_deref() {
            None | Some("-") => Self::stdin(),
            Some(path) => Self::file(path),
        }
    }
}

pub fn parse_line(line: &str) -> Result<Reading, PipelineError> {
    serde_json::from_str(line).map_err(|e| PipelineError::Source(format!("invalid reading: {e}")))
}

fn read_lines<R>(reader: R) -> EnvelopeStream<Reading>
where
    R: AsyncRead + Send + 'static,
{
    let s = async_stream::stream! {
        let mut lines = Box::pin(FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        ));
        let mut line_no: u64 = 0;

        while let Some(next) = lines.next().await {
            line_no += 1;
            match next {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => match parse_line(&line) {
                    Ok(reading) => yield Ok(Envelope::new(reading)),
                    Err(e) => {
                        metrics::counter!("telemetry_source_parse_errors_total", "format" => "ndjson")
                            .increment(1);
                        yield Err(PipelineError::Source(format!("line {line_no}: {e}")));
                    }
                },
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    metrics::counter!("telemetry_source_parse_errors_total", "format" => "ndjson")
                        .increment(1);
                    yield Err(PipelineError::Source(format!(
                        "line {line_no}: longer than {MAX_LINE_BYTES} bytes"
                    )));
                }
                Err(LinesCodecError::Io(e)) => {
                    yield Err(PipelineError::Source(format!("read failed: {e}")));
                    break;
                }
            }
        }
    };
    Box::pin(s)
}

#[async_trait::async_trait]
impl Source<Reading> for NdjsonSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        match &self.input {
            NdjsonInput::Stdin => read_lines(tokio::io::stdin()),
            NdjsonInput::File(path) => match tokio::fs::File::open(path).await {
                Ok(file) => read_lines(file),
                Err(e) => {
                    let err = PipelineError::Source(format!(
                        "failed to open {}: {e}",
                        path.display()
                    ));
                    Box::pin(futures::stream::iter([Err(err)]))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_client::domain::DeviceClass;

    const INPUT: &str = concat!(
        r#"{"kind":"meter","meter_id":"M-1","kwh_consumed_ac":1.2,"voltage":239.8,"observed_at":"2025-01-31T10:00:00Z"}"#,
        "\n\n",
        "not json\n",
        r#"{"kind":"vehicle","vehicle_id":"V-1","soc":54.0,"kwh_delivered_dc":1.0,"battery_temp":31.5,"observed_at":"2025-01-31T10:00:00Z"}"#,
        "\n",
    );

    #[tokio::test]
    async fn bad_lines_are_reported_and_skipped() {
        let items: Vec<_> = read_lines(INPUT.as_bytes()).collect().await;

        assert_eq!(items.len(), 3);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.payload.class(), DeviceClass::Meter);
        assert_eq!(first.payload.device_id(), "M-1");

        match &items[1] {
            Err(PipelineError::Source(msg)) => assert!(msg.starts_with("line 3:"), "{msg}"),
            other => panic!("expected a source error, got {other:?}"),
        }
        assert_eq!(items[2].as_ref().unwrap().payload.device_id(), "V-1");
    }

    #[tokio::test]
    async fn missing_file_yields_single_error() {
        let source = NdjsonSource::file("/nonexistent/telemetry.ndjson");
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn dash_means_stdin() {
        assert_eq!(NdjsonSource::from_arg(Some("-".into())).input, NdjsonInput::Stdin);
        assert_eq!(NdjsonSource::from_arg(None).input, NdjsonInput::Stdin);
        assert_eq!(
            NdjsonSource::from_arg(Some("a.ndjson".into())).input,
            NdjsonInput::File("a.ndjson".into())
        );
    }
}
