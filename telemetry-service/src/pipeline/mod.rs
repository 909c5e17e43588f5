//! Source -> transforms -> sink plumbing for the ingestion binaries.

use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

/// A payload plus the time the process received it.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

/// Consumes the stream. Upstream errors are per item: sinks log and skip
/// them rather than aborting the run.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T>>>,
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + 'static,
    K: Sink<T> + 'static,
{
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            transforms: Vec::new(),
            sink,
        }
    }

    pub fn with_transform(mut self, transform: impl Transform<T, T> + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        for t in self.transforms {
            stream = Box::pin(stream.then(move |item| {
                let t = Arc::clone(&t);
                async move {
                    match item {
                        Ok(env) => t.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Numbers(Vec<i64>);

    #[async_trait::async_trait]
    impl Source<i64> for Numbers {
        async fn stream(&self) -> EnvelopeStream<i64> {
            let items: Vec<_> = self.0.iter().copied().map(|n| Ok(Envelope::new(n))).collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct RejectNegative;

    #[async_trait::async_trait]
    impl Transform<i64, i64> for RejectNegative {
        async fn apply(&self, input: Envelope<i64>) -> Result<Envelope<i64>, PipelineError> {
            if input.payload < 0 {
                return Err(PipelineError::Transform("negative".into()));
            }
            Ok(input)
        }
    }

    struct Double;

    #[async_trait::async_trait]
    impl Transform<i64, i64> for Double {
        async fn apply(&self, input: Envelope<i64>) -> Result<Envelope<i64>, PipelineError> {
            Ok(Envelope {
                payload: input.payload * 2,
                received_at: input.received_at,
            })
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<(Vec<i64>, usize)>>);

    #[async_trait::async_trait]
    impl Sink<i64> for Collect {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<i64>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                let mut state = self.0.lock();
                match item {
                    Ok(env) => state.0.push(env.payload),
                    Err(_) => state.1 += 1,
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transforms_apply_in_order_and_errors_flow_through() {
        let sink = Collect::default();
        Pipeline::<_, i64, _>::new(Numbers(vec![1, -2, 3]), sink.clone())
            .with_transform(RejectNegative)
            .with_transform(Double)
            .run()
            .await
            .unwrap();

        let state = sink.0.lock();
        assert_eq!(state.0, vec![2, 6]);
        assert_eq!(state.1, 1);
    }
}
