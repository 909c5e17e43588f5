pub mod buffered;
pub mod bulk;

pub use buffered::BufferedSink;
pub use bulk::BulkSink;
