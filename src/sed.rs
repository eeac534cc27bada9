//! Template-SED color matching.
//!
//! Matches per-object multi-band magnitudes against a precomputed grid of
//! template-SED magnitudes: nearest neighbor by Euclidean distance in
//! color space (adjacent-band magnitude differences), plus a
//! normalization built from the grid magnitude, the per-object mean
//! offset, and a flat-cosmology distance modulus.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Error, Result};

const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;
const INTEGRATION_STEPS: usize = 1000;

/// One row of the magnitude grid: a named template with per-band
/// magnitudes and a normalization magnitude.
#[derive(Debug, Clone)]
struct GridEntry {
    name: String,
    mags: Vec<f64>,
    colors: Vec<f64>,
    mag_norm: f64,
}

/// A loaded template-magnitude grid.
pub struct SedGrid {
    entries: Vec<GridEntry>,
    n_bands: usize,
}

/// Result of matching one object against the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SedMatch {
    pub name: String,
    pub mag_norm: f64,
    /// Euclidean distance to the matched template in color space.
    pub color_dist: f64,
    /// Euclidean distance in magnitude space after the mean offset.
    pub mag_dist: f64,
}

impl SedGrid {
    /// Parse a whitespace-delimited grid file: template name, N band
    /// magnitudes in ascending wavelength order, then the normalization
    /// magnitude. N is inferred from the first data line.
    pub fn from_grid_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read SED grid {}: {}", path.display(), e))
        })?;
        Self::from_grid_str(&content)
    }

    pub fn from_grid_str(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut n_bands = None;
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 {
                return Err(Error::config(format!(
                    "SED grid line {} has {} fields, expected name + magnitudes + magNorm",
                    lineno + 1,
                    tokens.len()
                )));
            }
            let bands = tokens.len() - 2;
            match n_bands {
                None => n_bands = Some(bands),
                Some(expected) if expected != bands => {
                    return Err(Error::config(format!(
                        "SED grid line {} has {} bands, expected {}",
                        lineno + 1,
                        bands,
                        expected
                    )))
                }
                _ => {}
            }
            let mut values = Vec::with_capacity(bands + 1);
            for token in &tokens[1..] {
                values.push(token.parse::<f64>().map_err(|_| {
                    Error::config(format!(
                        "SED grid line {}: '{}' is not a number",
                        lineno + 1,
                        token
                    ))
                })?);
            }
            let mag_norm = values.pop().unwrap_or(f64::NAN);
            let colors = adjacent_colors(&values);
            entries.push(GridEntry {
                name: tokens[0].to_string(),
                mags: values,
                colors,
                mag_norm,
            });
        }
        let n_bands =
            n_bands.ok_or_else(|| Error::config("SED grid file contains no data lines"))?;
        Ok(Self { entries, n_bands })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn n_bands(&self) -> usize {
        self.n_bands
    }

    /// Match each object (a per-band magnitude row) against the grid.
    ///
    /// `redshifts` feeds the distance-modulus term of the returned
    /// normalization; `h` and `omega_m` parameterize the flat cosmology.
    pub fn match_colors(
        &self,
        mags: &[Vec<f64>],
        redshifts: &[f64],
        h: f64,
        omega_m: f64,
    ) -> Result<Vec<SedMatch>> {
        if mags.len() != redshifts.len() {
            return Err(Error::config(format!(
                "{} magnitude rows but {} redshifts",
                mags.len(),
                redshifts.len()
            )));
        }
        let cosmology = FlatCosmology::new(100.0 * h, omega_m);
        let mut out = Vec::with_capacity(mags.len());
        for (row, &z) in mags.iter().zip(redshifts) {
            if row.len() != self.n_bands {
                return Err(Error::config(format!(
                    "object has {} magnitudes, grid has {} bands",
                    row.len(),
                    self.n_bands
                )));
            }
            let colors = adjacent_colors(row);

            let mut best = 0;
            let mut best_dd = f64::INFINITY;
            for (i, entry) in self.entries.iter().enumerate() {
                let dd: f64 = colors
                    .iter()
                    .zip(&entry.colors)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                if dd < best_dd {
                    best_dd = dd;
                    best = i;
                }
            }
            let entry = &self.entries[best];

            // Mean per-band offset between the object and its template.
            let d_mag: f64 = row
                .iter()
                .zip(&entry.mags)
                .map(|(a, b)| a - b)
                .sum::<f64>()
                / self.n_bands as f64;
            let mag_dist: f64 = row
                .iter()
                .zip(&entry.mags)
                .map(|(a, b)| {
                    let d = a - (b + d_mag);
                    d * d
                })
                .sum::<f64>()
                .sqrt();

            out.push(SedMatch {
                name: entry.name.clone(),
                mag_norm: entry.mag_norm + d_mag + cosmology.distance_modulus(z),
                color_dist: best_dd.sqrt(),
                mag_dist,
            });
        }
        Ok(out)
    }
}

fn adjacent_colors(mags: &[f64]) -> Vec<f64> {
    mags.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Flat matter + dark-energy cosmology, just enough for distance moduli.
struct FlatCosmology {
    h0: f64,
    omega_m: f64,
}

impl FlatCosmology {
    fn new(h0: f64, omega_m: f64) -> Self {
        Self { h0, omega_m }
    }

    fn e_inv(&self, z: f64) -> f64 {
        let omega_l = 1.0 - self.omega_m;
        1.0 / (self.omega_m * (1.0 + z).powi(3) + omega_l).sqrt()
    }

    /// Comoving distance in Mpc, by trapezoidal integration.
    fn comoving_distance(&self, z: f64) -> f64 {
        let dz = z / INTEGRATION_STEPS as f64;
        let mut sum = 0.5 * (self.e_inv(0.0) + self.e_inv(z));
        for i in 1..INTEGRATION_STEPS {
            sum += self.e_inv(i as f64 * dz);
        }
        SPEED_OF_LIGHT_KM_S / self.h0 * sum * dz
    }

    /// Distance modulus; zero at or below z = 0.
    fn distance_modulus(&self, z: f64) -> f64 {
        if z <= 0.0 {
            return 0.0;
        }
        let d_l = (1.0 + z) * self.comoving_distance(z);
        5.0 * d_l.log10() + 25.0
    }
}

/// Per-path memoization of loaded grids, owned by whoever needs it rather
/// than hidden in a global.
#[derive(Default)]
pub struct SedGridCache {
    grids: RefCell<HashMap<PathBuf, Rc<SedGrid>>>,
}

impl SedGridCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Rc<SedGrid>> {
        let path = path.as_ref();
        if let Some(grid) = self.grids.borrow().get(path) {
            return Ok(grid.clone());
        }
        let grid = Rc::new(SedGrid::from_grid_file(path)?);
        self.grids
            .borrow_mut()
            .insert(path.to_path_buf(), grid.clone());
        Ok(grid)
    }

    pub fn clear(&self) {
        self.grids.borrow_mut().clear();
    }
}
