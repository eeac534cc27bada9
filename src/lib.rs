//! Catalog-access layer for astronomical simulation data.
//!
//! Heterogeneous on-disk catalogs (Parquet directories, SQLite truth
//! tables) are served through one uniform quantity interface: declarative
//! per-catalog modifier tables translate native column names into a
//! shared vocabulary of physical quantities, and queries iterate
//! partitions (tracts, visits) with pruning before any file is opened.
//!
//! ```no_run
//! use skycat::{CatalogConfig, NativeFilter};
//!
//! # fn main() -> skycat::Result<()> {
//! let config = CatalogConfig::from_yaml_file("object_catalog.yaml")?;
//! let catalog = config.build(None)?;
//! let tract = NativeFilter::from_exprs(["tract == 4850"])?;
//! let data = catalog.get_quantities(["ra", "dec", "mag_r"], None, Some(&tract))?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod catalog;
pub mod column;
pub mod config;
pub mod error;
pub mod filter;
pub mod funcs;
pub mod info;
pub mod quantity;
pub mod registry;
pub mod schema;
pub mod sed;
pub mod source;
pub mod user_config;

pub use catalog::{Catalog, QuantityIter};
pub use column::{Column, ColumnDtype, Scalar};
pub use config::CatalogConfig;
pub use error::{Error, Result};
pub use filter::{NativeFilter, PartitionIds, RowFilter};
pub use quantity::{QuantityModifier, QuantityResolver};
pub use registry::CatalogRegistry;
pub use schema::DeclaredSchema;
pub use sed::{SedGrid, SedGridCache, SedMatch};
pub use source::{CatalogSource, Partition, PartitionInfo};
pub use user_config::UserConfig;
