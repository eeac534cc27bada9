//! Declarative catalog configuration.
//!
//! A catalog config is a flat YAML mapping; `subclass_name` selects the
//! format adapter and the remaining keys parameterize discovery, quantity
//! modifiers and metadata. The loader validates eagerly so that a broken
//! config fails at construction, not mid-query.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapters::{ParquetSource, ParquetSourceOptions, SqliteSource};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::funcs;
use crate::info::load_info_yaml;
use crate::quantity::QuantityModifier;
use crate::schema::DeclaredSchema;
use crate::source::CatalogSource;

pub const DEFAULT_SCHEMA_FILENAME: &str = "schema.yaml";
const DEFAULT_SQLITE_TABLE: &str = "truth";
const DEFAULT_PIXEL_SCALE: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Adapter family: "parquet" or "sqlite".
    pub subclass_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // parquet family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_attr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tract: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracts: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visits: Option<Vec<i64>>,
    #[serde(default)]
    pub row_group_batches: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_filename: Option<String>,

    // sqlite family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    // quantity vocabulary
    /// Serve every native column under its own name, with no translation.
    #[serde(default)]
    pub is_dpdd: bool,
    #[serde(default)]
    pub quantity_modifiers: Vec<ModifierEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_path: Option<PathBuf>,
    #[serde(default)]
    pub bands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_scale: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<bool>,
}

/// One declarative modifier-table entry: either a rename (`native`) or a
/// derivation (`func` over `sources`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl CatalogConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: CatalogConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.subclass_name.as_str() {
            "parquet" => {
                if self.base_dir.is_none() {
                    return Err(Error::config("parquet catalogs require `base_dir`"));
                }
            }
            "sqlite" => {
                if self.filename.is_none() {
                    return Err(Error::config("sqlite catalogs require `filename`"));
                }
            }
            other => {
                return Err(Error::config(format!(
                    "unknown subclass_name '{}'",
                    other
                )))
            }
        }
        if self.tract.is_some() && self.tracts.is_some() {
            return Err(Error::config(
                "conflicting options: both `tract` and `tracts` defined",
            ));
        }
        if self.visit.is_some() && self.visits.is_some() {
            return Err(Error::config(
                "conflicting options: both `visit` and `visits` defined",
            ));
        }
        if (self.tract.is_some() || self.tracts.is_some())
            && (self.visit.is_some() || self.visits.is_some())
        {
            return Err(Error::config(
                "conflicting options: tract and visit selectors are mutually exclusive",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.quantity_modifiers {
            // Silent overwrites of duplicate names hide real config bugs.
            if !seen.insert(entry.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate quantity modifier '{}'",
                    entry.name
                )));
            }
            match (&entry.native, &entry.func) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(Error::config(format!(
                        "modifier '{}' must define exactly one of `native` or `func`",
                        entry.name
                    )))
                }
                (Some(_), None) => {}
                (None, Some(func)) => {
                    if entry.sources.is_empty() {
                        return Err(Error::config(format!(
                            "derived modifier '{}' needs at least one source",
                            entry.name
                        )));
                    }
                    if func != "psf_fwhm" && funcs::by_name(func).is_none() {
                        return Err(Error::config(format!(
                            "modifier '{}' references unknown function '{}'",
                            entry.name, func
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// The partition attribute and selected ids implied by the config.
    fn partition_selection(&self) -> (Option<String>, Option<Vec<i64>>) {
        let (attr, ids) = if self.visit.is_some() || self.visits.is_some() {
            (
                "visit",
                self.visit.map(|v| vec![v]).or_else(|| self.visits.clone()),
            )
        } else {
            (
                "tract",
                self.tract.map(|t| vec![t]).or_else(|| self.tracts.clone()),
            )
        };
        let attr = self
            .partition_attr
            .clone()
            .or_else(|| (ids.is_some() || self.subclass_name == "parquet").then(|| attr.to_string()));
        (attr, ids)
    }

    /// Resolved location of the declared-schema file, when applicable.
    pub fn schema_path(&self, root_dir: Option<&Path>) -> Option<PathBuf> {
        let base = resolve_dir(self.base_dir.as_deref()?, root_dir);
        let name = self
            .schema_filename
            .as_deref()
            .unwrap_or(DEFAULT_SCHEMA_FILENAME);
        // An absolute schema_filename wins over base_dir.
        Some(base.join(name))
    }

    /// Construct the catalog this config describes. A relative `base_dir`
    /// or `filename` is resolved against `root_dir` when one is given.
    pub fn build(&self, root_dir: Option<&Path>) -> Result<Catalog> {
        self.validate()?;
        let source: Box<dyn CatalogSource> = match self.subclass_name.as_str() {
            "parquet" => {
                let base_dir = self
                    .base_dir
                    .as_deref()
                    .ok_or_else(|| Error::config("parquet catalogs require `base_dir`"))?;
                let (partition_attr, selected_ids) = self.partition_selection();
                let mut options = ParquetSourceOptions::new(resolve_dir(base_dir, root_dir));
                if let Some(pattern) = &self.filename_pattern {
                    options.filename_pattern = pattern.clone();
                }
                options.partition_attr = partition_attr;
                options.selected_ids = selected_ids;
                options.row_group_batches = self.row_group_batches;
                Box::new(ParquetSource::discover(&options)?)
            }
            "sqlite" => {
                let filename = self
                    .filename
                    .as_deref()
                    .ok_or_else(|| Error::config("sqlite catalogs require `filename`"))?;
                let table = self.table.as_deref().unwrap_or(DEFAULT_SQLITE_TABLE);
                Box::new(SqliteSource::open(resolve_dir(filename, root_dir), table)?)
            }
            other => return Err(Error::config(format!("unknown subclass_name '{}'", other))),
        };

        let modifiers = if self.is_dpdd {
            source
                .native_columns()?
                .into_iter()
                .map(|c| (c, QuantityModifier::Identity))
                .collect()
        } else {
            self.build_modifiers()?
        };

        let info = match &self.meta_path {
            Some(path) => load_info_yaml(&resolve_dir(path, root_dir), &self.bands)?,
            None => Default::default(),
        };

        let schema = match self.schema_path(root_dir) {
            Some(path) if path.is_file() => Some(DeclaredSchema::load_yaml(&path)?),
            _ => None,
        };

        Catalog::new(
            source,
            modifiers,
            info,
            schema,
            self.use_cache.unwrap_or(true),
        )
    }

    fn build_modifiers(&self) -> Result<BTreeMap<String, QuantityModifier>> {
        let mut modifiers = BTreeMap::new();
        for entry in &self.quantity_modifiers {
            let modifier = match (&entry.native, &entry.func) {
                (Some(native), None) => QuantityModifier::Rename(native.clone()),
                (None, Some(func)) => {
                    let func = if func == "psf_fwhm" {
                        funcs::psf_fwhm(self.pixel_scale.unwrap_or(DEFAULT_PIXEL_SCALE))
                    } else {
                        funcs::by_name(func).ok_or_else(|| {
                            Error::config(format!("unknown derivation function '{}'", func))
                        })?
                    };
                    QuantityModifier::derived(func, entry.sources.iter().cloned())
                }
                _ => {
                    return Err(Error::config(format!(
                        "modifier '{}' must define exactly one of `native` or `func`",
                        entry.name
                    )))
                }
            };
            if modifiers.insert(entry.name.clone(), modifier).is_some() {
                return Err(Error::config(format!(
                    "duplicate quantity modifier '{}'",
                    entry.name
                )));
            }
        }
        Ok(modifiers)
    }
}

fn resolve_dir(path: &Path, root_dir: Option<&Path>) -> PathBuf {
    match root_dir {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_parquet_config() {
        let config = CatalogConfig::from_yaml_str(
            "subclass_name: parquet\nbase_dir: /data/object\ntracts: [4850, 4851]\n",
        )
        .unwrap();
        assert_eq!(config.subclass_name, "parquet");
        assert_eq!(config.tracts, Some(vec![4850, 4851]));
        let (attr, ids) = config.partition_selection();
        assert_eq!(attr.as_deref(), Some("tract"));
        assert_eq!(ids, Some(vec![4850, 4851]));
    }

    #[test]
    fn conflicting_tract_selectors_are_rejected() {
        let err = CatalogConfig::from_yaml_str(
            "subclass_name: parquet\nbase_dir: /data\ntract: 1\ntracts: [1, 2]\n",
        );
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn missing_required_key_is_rejected() {
        assert!(CatalogConfig::from_yaml_str("subclass_name: parquet\n").is_err());
        assert!(CatalogConfig::from_yaml_str("subclass_name: sqlite\n").is_err());
        assert!(CatalogConfig::from_yaml_str("subclass_name: hdf5\nbase_dir: /d\n").is_err());
    }

    #[test]
    fn duplicate_modifier_names_are_rejected() {
        let err = CatalogConfig::from_yaml_str(
            "subclass_name: sqlite\nfilename: /data/truth.db\nquantity_modifiers:\n  - {name: ra, native: raJ2000}\n  - {name: ra, native: ra_deg}\n",
        );
        match err {
            Err(Error::Configuration(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn modifier_entries_need_exactly_one_rule() {
        let err = CatalogConfig::from_yaml_str(
            "subclass_name: sqlite\nfilename: /d.db\nquantity_modifiers:\n  - {name: ra}\n",
        );
        assert!(err.is_err());

        let err = CatalogConfig::from_yaml_str(
            "subclass_name: sqlite\nfilename: /d.db\nquantity_modifiers:\n  - {name: ra, func: no_such_fn, sources: [x]}\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn psf_fwhm_modifier_binds_configured_pixel_scale() {
        use crate::column::Column;
        use crate::quantity::QuantityModifier;

        let config = CatalogConfig::from_yaml_str(
            "subclass_name: parquet\nbase_dir: /d\npixel_scale: 0.1\nquantity_modifiers:\n  - {name: psf_fwhm_r, func: psf_fwhm, sources: [r_ixx, r_iyy, r_ixy]}\n",
        )
        .unwrap();
        let modifiers = config.build_modifiers().unwrap();
        let derived = match &modifiers["psf_fwhm_r"] {
            QuantityModifier::Derived(d) => d,
            other => panic!("expected derived modifier, got {:?}", other),
        };
        assert_eq!(derived.sources, vec!["r_ixx", "r_iyy", "r_ixy"]);

        // xx = yy = 4, xy = 0: determinant 16, fwhm = 0.1 * 2.355 * 2.
        let out = (derived.func)(&[
            Column::Float64(vec![4.0]),
            Column::Float64(vec![4.0]),
            Column::Float64(vec![0.0]),
        ])
        .unwrap();
        match out {
            Column::Float64(v) => assert!((v[0] - 0.1 * 2.355 * 2.0).abs() < 1e-12),
            other => panic!("expected float column, got {:?}", other),
        }
    }

    #[test]
    fn visit_selection_switches_partition_attr() {
        let config = CatalogConfig::from_yaml_str(
            "subclass_name: parquet\nbase_dir: /data\nvisit: 512\n",
        )
        .unwrap();
        let (attr, ids) = config.partition_selection();
        assert_eq!(attr.as_deref(), Some("visit"));
        assert_eq!(ids, Some(vec![512]));
    }

    #[test]
    fn schema_path_resolves_against_root_dir() {
        let config = CatalogConfig::from_yaml_str(
            "subclass_name: parquet\nbase_dir: object\n",
        )
        .unwrap();
        let path = config.schema_path(Some(Path::new("/root"))).unwrap();
        assert_eq!(path, Path::new("/root/object/schema.yaml"));
    }
}
