//! Per-quantity descriptive metadata, loaded from a small YAML table that
//! is independent of the data files. Keys containing the `<band>`
//! placeholder expand to one entry per photometric band.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantityInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_dpdd: Option<bool>,
}

impl QuantityInfo {
    pub fn with_description(description: impl Into<String>) -> Self {
        QuantityInfo {
            description: description.into(),
            ..Default::default()
        }
    }
}

const BAND_PLACEHOLDER: &str = "<band>";

/// Load a quantity-info table, expanding `<band>` placeholders in keys and
/// descriptions for each of the given bands.
pub fn load_info_yaml(path: &Path, bands: &[String]) -> Result<HashMap<String, QuantityInfo>> {
    let content = fs::read_to_string(path)?;
    let base: HashMap<String, QuantityInfo> = serde_yaml::from_str(&content)?;
    Ok(expand_bands(base, bands))
}

pub fn expand_bands(
    base: HashMap<String, QuantityInfo>,
    bands: &[String],
) -> HashMap<String, QuantityInfo> {
    let mut out = HashMap::with_capacity(base.len());
    for (quantity, info) in base {
        if !bands.is_empty() && quantity.contains(BAND_PLACEHOLDER) {
            for band in bands {
                let mut expanded = info.clone();
                expanded.description = expanded.description.replace(BAND_PLACEHOLDER, band);
                if let Some(unit) = expanded.unit.as_mut() {
                    *unit = unit.replace(BAND_PLACEHOLDER, band);
                }
                out.insert(quantity.replace(BAND_PLACEHOLDER, band), expanded);
            }
        } else {
            out.insert(quantity, info);
        }
    }
    out
}
