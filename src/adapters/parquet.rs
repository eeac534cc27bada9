//! Parquet-backed catalog sources.
//!
//! One partition per file (or per row group when row-group batching is
//! enabled), with partition attributes parsed out of the filename. Column
//! selection is pushed down to the parquet reader so only requested
//! columns are decoded.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use arrow::datatypes::{DataType, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use regex::Regex;

use crate::column::{Column, ColumnDtype, Scalar};
use crate::error::{Error, Result};
use crate::source::{CatalogSource, Partition, PartitionInfo};

/// Default filename pattern; catalogs usually override it with something
/// like `r"object_tract_\d+\.parquet$"`.
pub const DEFAULT_FILE_PATTERN: &str = r".+\.parquet$";

fn internal_column_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Columns like `__index_level_0__` are writer bookkeeping, not data.
    RE.get_or_init(|| Regex::new(r"^__\w+__$").expect("internal column regex is valid"))
}

pub struct ParquetSourceOptions {
    pub base_dir: PathBuf,
    pub filename_pattern: String,
    /// Partition attribute parsed from the filename (e.g. "tract",
    /// "visit"); files without it are skipped with a warning.
    pub partition_attr: Option<String>,
    /// Restrict discovery to these attribute values.
    pub selected_ids: Option<Vec<i64>>,
    /// Yield one batch per row group instead of one per file.
    pub row_group_batches: bool,
}

impl ParquetSourceOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            filename_pattern: DEFAULT_FILE_PATTERN.to_string(),
            partition_attr: None,
            selected_ids: None,
            row_group_batches: false,
        }
    }
}

/// A directory of parquet files served as one catalog.
pub struct ParquetSource {
    partitions: Vec<Box<dyn Partition>>,
    schema: BTreeMap<String, ColumnDtype>,
}

impl ParquetSource {
    pub fn discover(options: &ParquetSourceOptions) -> Result<Self> {
        if !options.base_dir.is_dir() {
            return Err(Error::config(format!(
                "base_dir {} is not a valid directory",
                options.base_dir.display()
            )));
        }
        let filename_re = Regex::new(&options.filename_pattern)
            .map_err(|e| Error::config(format!("bad filename_pattern: {}", e)))?;
        let attr_re = options
            .partition_attr
            .as_ref()
            .map(|attr| Regex::new(&format!(r"{}_?(\d+)", regex::escape(attr))))
            .transpose()
            .map_err(|e| Error::config(format!("bad partition_attr: {}", e)))?;

        let mut names: Vec<String> = std::fs::read_dir(&options.base_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| filename_re.is_match(name))
            .collect();
        names.sort();

        let mut discovered: Vec<(Option<i64>, PathBuf, PartitionInfo)> = Vec::new();
        for name in names {
            let path = options.base_dir.join(&name);
            let mut info = PartitionInfo::new();
            let mut id = None;
            if let (Some(attr), Some(re)) = (&options.partition_attr, &attr_re) {
                let value = re
                    .captures(&name)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<i64>().ok());
                match value {
                    Some(v) => {
                        if options
                            .selected_ids
                            .as_ref()
                            .map(|ids| !ids.contains(&v))
                            .unwrap_or(false)
                        {
                            continue;
                        }
                        info = info.with(attr.clone(), Scalar::Int(v));
                        id = Some(v);
                    }
                    None => {
                        log::warn!(
                            "filename {} does not contain {} info; skipped",
                            name,
                            attr
                        );
                        continue;
                    }
                }
            }
            discovered.push((id, path, info));
        }
        discovered.sort_by_key(|(id, _, _)| *id);

        if let (Some(ids), Some(attr)) = (&options.selected_ids, &options.partition_attr) {
            let found: Vec<i64> = discovered.iter().filter_map(|(id, _, _)| *id).collect();
            if ids.iter().any(|id| !found.contains(id)) {
                log::warn!(
                    "not all requested {}s were found in {}",
                    attr,
                    options.base_dir.display()
                );
            }
        }

        let mut partitions: Vec<ParquetPartition> = Vec::new();
        for (_, path, info) in discovered {
            if options.row_group_batches {
                // Splitting by row group needs the footer up front.
                let num_row_groups = match read_num_row_groups(&path) {
                    Ok(n) => n,
                    Err(e) => {
                        log::warn!("cannot access {}; skipped: {}", path.display(), e);
                        continue;
                    }
                };
                for rg in 0..num_row_groups {
                    partitions.push(ParquetPartition::new(path.clone(), info.clone(), Some(rg)));
                }
            } else {
                partitions.push(ParquetPartition::new(path, info, None));
            }
        }

        if partitions.is_empty() {
            return Err(Error::config(format!(
                "no catalog files were found in base_dir {}",
                options.base_dir.display()
            )));
        }

        let schema = probe_schema(&partitions)?;
        Ok(Self {
            partitions: partitions
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn Partition>)
                .collect(),
            schema,
        })
    }
}

impl CatalogSource for ParquetSource {
    fn partitions(&self) -> &[Box<dyn Partition>] {
        &self.partitions
    }

    fn native_schema(&self) -> Result<BTreeMap<String, ColumnDtype>> {
        Ok(self.schema.clone())
    }
}

/// Column names and dtypes from the first readable partition; the catalog
/// treats this as the schema of the whole directory.
fn probe_schema(partitions: &[ParquetPartition]) -> Result<BTreeMap<String, ColumnDtype>> {
    let mut last_err = None;
    for partition in partitions {
        match partition.arrow_schema() {
            Ok(schema) => {
                let mut out = BTreeMap::new();
                for field in schema.fields() {
                    if internal_column_regex().is_match(field.name()) {
                        continue;
                    }
                    if let Some(dtype) = dtype_from_arrow(field.data_type()) {
                        out.insert(field.name().clone(), dtype);
                    } else {
                        log::debug!(
                            "column {} has unsupported data type {:?}; not served",
                            field.name(),
                            field.data_type()
                        );
                    }
                }
                return Ok(out);
            }
            Err(e) => {
                log::warn!("cannot read schema from {:?}: {}", partition.info(), e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::config("no readable parquet partition for schema")))
}

fn dtype_from_arrow(dtype: &DataType) -> Option<ColumnDtype> {
    match dtype {
        DataType::Float64 | DataType::Float32 => Some(ColumnDtype::Float64),
        DataType::Int64 | DataType::Int32 => Some(ColumnDtype::Int64),
        DataType::Boolean => Some(ColumnDtype::Bool),
        DataType::Utf8 | DataType::LargeUtf8 => Some(ColumnDtype::Str),
        _ => None,
    }
}

fn read_num_row_groups(path: &Path) -> Result<usize> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    Ok(builder.metadata().num_row_groups())
}

/// One parquet file, or one row group of one file.
pub struct ParquetPartition {
    path: PathBuf,
    info: PartitionInfo,
    row_group: Option<usize>,
    columns: RefCell<Option<Vec<String>>>,
    rows: RefCell<Option<usize>>,
    cache: RefCell<HashMap<String, Column>>,
}

impl ParquetPartition {
    pub fn new(path: PathBuf, info: PartitionInfo, row_group: Option<usize>) -> Self {
        Self {
            path,
            info,
            row_group,
            columns: RefCell::new(None),
            rows: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn builder(&self) -> Result<ParquetRecordBatchReaderBuilder<File>> {
        let file = File::open(&self.path)?;
        Ok(ParquetRecordBatchReaderBuilder::try_new(file)?)
    }

    fn arrow_schema(&self) -> Result<SchemaRef> {
        Ok(self.builder()?.schema().clone())
    }
}

impl Partition for ParquetPartition {
    fn info(&self) -> &PartitionInfo {
        &self.info
    }

    fn row_count(&self) -> Result<usize> {
        if let Some(rows) = *self.rows.borrow() {
            return Ok(rows);
        }
        let builder = self.builder()?;
        let metadata = builder.metadata();
        let rows = match self.row_group {
            Some(rg) => metadata.row_group(rg).num_rows() as usize,
            None => metadata.file_metadata().num_rows() as usize,
        };
        *self.rows.borrow_mut() = Some(rows);
        Ok(rows)
    }

    fn columns(&self) -> Result<Vec<String>> {
        if let Some(columns) = self.columns.borrow().as_ref() {
            return Ok(columns.clone());
        }
        let schema = self.arrow_schema()?;
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| !internal_column_regex().is_match(name))
            .collect();
        *self.columns.borrow_mut() = Some(columns.clone());
        Ok(columns)
    }

    fn read_columns(&self, names: &[String]) -> Result<HashMap<String, Column>> {
        let missing: Vec<String> = {
            let cache = self.cache.borrow();
            names
                .iter()
                .filter(|n| !cache.contains_key(*n))
                .cloned()
                .collect()
        };

        if !missing.is_empty() {
            let builder = self.builder()?;
            let descriptor = builder.parquet_schema();
            let mut leaves = Vec::with_capacity(missing.len());
            for name in &missing {
                let idx = (0..descriptor.num_columns())
                    .find(|&i| descriptor.column(i).name() == name)
                    .ok_or_else(|| {
                        Error::config(format!(
                            "column '{}' not found in {}",
                            name,
                            self.path.display()
                        ))
                    })?;
                leaves.push(idx);
            }
            let mask = ProjectionMask::leaves(descriptor, leaves);
            let mut builder = builder.with_projection(mask);
            if let Some(rg) = self.row_group {
                builder = builder.with_row_groups(vec![rg]);
            }
            let reader = builder.build()?;

            let mut parts: HashMap<String, Vec<Column>> = HashMap::new();
            for batch in reader {
                let batch = batch?;
                for (i, field) in batch.schema().fields().iter().enumerate() {
                    parts
                        .entry(field.name().clone())
                        .or_default()
                        .push(Column::from_arrow(batch.column(i))?);
                }
            }
            let rows = self.row_count()?;
            let mut cache = self.cache.borrow_mut();
            for name in &missing {
                let column = match parts.remove(name) {
                    Some(columns) => Column::concat(columns)?,
                    // Zero batches: the file (or row group) is empty.
                    None => Column::empty(ColumnDtype::Float64),
                };
                if column.len() != rows && rows != 0 {
                    return Err(Error::config(format!(
                        "column '{}' in {} has {} rows, expected {}",
                        name,
                        self.path.display(),
                        column.len(),
                        rows
                    )));
                }
                cache.insert(name.clone(), column);
            }
        }

        let cache = self.cache.borrow();
        Ok(names
            .iter()
            .filter_map(|n| cache.get(n).map(|c| (n.clone(), c.clone())))
            .collect())
    }

    fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    fn close(&self) {
        // Handles are opened per read; dropping caches releases everything.
        self.clear_cache();
        *self.columns.borrow_mut() = None;
        *self.rows.borrow_mut() = None;
    }
}
