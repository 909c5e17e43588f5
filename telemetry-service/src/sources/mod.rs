pub mod csv_file;
pub mod ndjson;

pub use csv_file::CsvFileSource;
pub use ndjson::NdjsonSource;
