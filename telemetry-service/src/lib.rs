pub mod analytics;
pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use analytics::AnalyticsEngine;
pub use buffer::IngestionBuffer;
pub use coordinator::Coordinator;
pub use pipeline::{Envelope, Pipeline};
