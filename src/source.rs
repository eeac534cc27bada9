//! The format-independent seam between the catalog facade and the on-disk
//! format adapters: a source enumerates partitions, a partition serves raw
//! native columns.

use std::collections::{BTreeMap, HashMap};

use crate::column::{Column, ColumnDtype, Scalar};
use crate::error::Result;

/// Identifying attributes of one partition (e.g. `tract: 4850`,
/// `patch: "3,2"`), used for pruning before any file is opened and
/// servable as constant columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionInfo(BTreeMap<String, Scalar>);

impl PartitionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Scalar) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }
}

/// One independently addressable subset of a catalog's data: a file, a
/// row group, or a whole database table.
///
/// Backing storage is opened lazily on the first column read. Partitions
/// are single-owner and never shared across threads.
pub trait Partition {
    /// Partition-identifying attributes, available without opening storage.
    fn info(&self) -> &PartitionInfo;

    /// Number of rows served by this partition.
    fn row_count(&self) -> Result<usize>;

    /// Native column names physically present in this partition.
    fn columns(&self) -> Result<Vec<String>>;

    /// Read the given native columns in one batched operation.
    fn read_columns(&self, names: &[String]) -> Result<HashMap<String, Column>>;

    /// Drop cached row data, keeping the partition usable.
    fn clear_cache(&self) {}

    /// Release the underlying file handle; reopened lazily if read again.
    fn close(&self) {}
}

/// A configured data source: an ordered set of partitions plus the
/// catalog-wide native column list.
pub trait CatalogSource {
    /// Partitions in iteration order, discovered once at construction.
    fn partitions(&self) -> &[Box<dyn Partition>];

    /// Native column names with their dtypes, taken from the source's own
    /// declared schema (file metadata, PRAGMA, ...).
    fn native_schema(&self) -> Result<BTreeMap<String, ColumnDtype>>;

    /// Native column names exposed by this source.
    fn native_columns(&self) -> Result<Vec<String>> {
        Ok(self.native_schema()?.into_keys().collect())
    }

    /// Per-native-column descriptions carried by the storage itself, if any
    /// (e.g. a SQLite `column_descriptions` table).
    fn column_descriptions(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}
