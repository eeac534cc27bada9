//! Catalog registry: a directory of YAML configs, one per catalog, with a
//! per-registry cache of loaded catalogs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::catalog::Catalog;
use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use crate::user_config::UserConfig;

const CONFIG_EXTENSION: &str = "yaml";
const ROOT_DIR_KEY: &str = "root_dir";

pub struct CatalogRegistry {
    config_dir: PathBuf,
    root_dir: Option<PathBuf>,
    cache: RefCell<HashMap<String, Rc<Catalog>>>,
}

impl CatalogRegistry {
    /// A registry over `config_dir`, resolving relative data paths against
    /// the user-configured root directory when one is set.
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        if !config_dir.is_dir() {
            return Err(Error::config(format!(
                "config directory {} does not exist",
                config_dir.display()
            )));
        }
        let root_dir = UserConfig::load()?.get(ROOT_DIR_KEY).map(PathBuf::from);
        Ok(Self {
            config_dir,
            root_dir,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// Override the data root directory (mainly for tests).
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root_dir.into());
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Sorted names of every catalog the registry knows about.
    pub fn available_catalogs(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.config_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CONFIG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn has_catalog(&self, name: &str) -> bool {
        self.config_path(name).is_file()
    }

    /// Parsed (and validated) config for one catalog.
    pub fn get_catalog_config(&self, name: &str) -> Result<CatalogConfig> {
        let path = self.config_path(name);
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "catalog '{}' is not in the registry at {}",
                name,
                self.config_dir.display()
            )));
        }
        CatalogConfig::from_yaml_file(&path)
    }

    /// Load a catalog, constructing it on first use and serving the cached
    /// instance afterwards.
    pub fn load_catalog(&self, name: &str) -> Result<Rc<Catalog>> {
        if let Some(catalog) = self.cache.borrow().get(name) {
            return Ok(catalog.clone());
        }
        let config = self.get_catalog_config(name)?;
        log::info!("loading catalog '{}'", name);
        let catalog = Rc::new(config.build(self.root_dir.as_deref())?);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), catalog.clone());
        Ok(catalog)
    }

    /// Drop every cached catalog instance.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.{}", name, CONFIG_EXTENSION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(format!("{}.yaml", name)), content).unwrap();
    }

    #[test]
    fn lists_catalogs_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "zeta", "subclass_name: parquet\nbase_dir: /d\n");
        write_config(dir.path(), "alpha", "subclass_name: parquet\nbase_dir: /d\n");
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = CatalogRegistry::new(dir.path()).unwrap();
        assert_eq!(registry.available_catalogs().unwrap(), vec!["alpha", "zeta"]);
        assert!(registry.has_catalog("alpha"));
        assert!(!registry.has_catalog("notes"));
    }

    #[test]
    fn unknown_catalog_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CatalogRegistry::new(dir.path()).unwrap();
        assert!(matches!(
            registry.get_catalog_config("missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn invalid_config_surfaces_as_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "broken", "subclass_name: parquet\n");
        let registry = CatalogRegistry::new(dir.path()).unwrap();
        assert!(matches!(
            registry.get_catalog_config("broken"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn missing_config_dir_is_rejected() {
        assert!(CatalogRegistry::new("/no/such/dir").is_err());
    }
}
