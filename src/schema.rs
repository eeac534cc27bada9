//! Declared column schemas.
//!
//! A catalog may carry a `schema.yaml` declaring every column's dtype and,
//! optionally, a default value. When a declared column is missing from one
//! partition's physical storage, a constant array of the partition's row
//! count is synthesized instead of failing the query. Boolean columns
//! following the `*_flag_bad` / `*_flag_noGoodPixels` naming convention
//! default to true: a column that was never measured must read as
//! "flagged", not "good".

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::column::{Column, ColumnDtype, Scalar};
use crate::error::{Error, Result};

const FLAG_TRUE_SUFFIXES: [&str; 2] = ["_flag_bad", "_flag_noGoodPixels"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub dtype: ColumnDtype,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Scalar>,
}

impl ColumnSchema {
    pub fn new(dtype: ColumnDtype) -> Self {
        Self {
            dtype,
            default: None,
        }
    }
}

/// The declared schema of one catalog: column name to dtype and default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclaredSchema(BTreeMap<String, ColumnSchema>);

impl DeclaredSchema {
    pub fn load_yaml(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Write the schema as YAML. An existing file is only replaced when
    /// `overwrite` is set, and is backed up to `<path>.bak` first.
    pub fn save_yaml(&self, path: &Path, overwrite: bool) -> Result<()> {
        if path.exists() {
            if !overwrite {
                return Err(Error::config(format!(
                    "schema file {} already exists; pass overwrite to replace it",
                    path.display()
                )));
            }
            let backup = path.with_extension("yaml.bak");
            log::warn!(
                "overwriting schema file {}; backed up at {}",
                path.display(),
                backup.display()
            );
            fs::copy(path, backup)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Build a schema from probed column dtypes, applying the flag-suffix
    /// default convention.
    pub fn from_native_schema(native: &BTreeMap<String, ColumnDtype>) -> Self {
        let mut out = BTreeMap::new();
        for (name, &dtype) in native {
            let mut entry = ColumnSchema::new(dtype);
            if dtype == ColumnDtype::Bool && has_flag_true_suffix(name) {
                entry.default = Some(Scalar::Bool(true));
            }
            out.insert(name.clone(), entry);
        }
        Self(out)
    }

    pub fn insert(&mut self, name: impl Into<String>, schema: ColumnSchema) {
        self.0.insert(name.into(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSchema> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The constant column served when `name` is declared here but missing
    /// from a partition's physical storage.
    pub fn fill_column(&self, name: &str, len: usize) -> Option<Column> {
        let schema = self.0.get(name)?;
        let value = schema
            .default
            .clone()
            .unwrap_or_else(|| default_for(name, schema.dtype));
        Some(Column::constant(&value, len))
    }
}

fn has_flag_true_suffix(name: &str) -> bool {
    FLAG_TRUE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Per-dtype default, with the boolean flag-suffix exception.
pub fn default_for(name: &str, dtype: ColumnDtype) -> Scalar {
    if dtype == ColumnDtype::Bool && has_flag_true_suffix(name) {
        Scalar::Bool(true)
    } else {
        dtype.default_value()
    }
}
