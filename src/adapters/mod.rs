//! On-disk format adapters implementing [`crate::source::CatalogSource`].

pub mod parquet;
pub mod sqlite;

pub use parquet::{ParquetSource, ParquetSourceOptions};
pub use sqlite::SqliteSource;
