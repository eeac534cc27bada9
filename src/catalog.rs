//! The catalog facade: one shared, format-independent implementation of
//! quantity resolution and partition iteration, serving any
//! [`CatalogSource`].

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::column::{Column, ColumnDtype};
use crate::error::Result;
use crate::filter::{NativeFilter, RowFilter};
use crate::info::QuantityInfo;
use crate::quantity::{QuantityModifier, QuantityResolver};
use crate::schema::DeclaredSchema;
use crate::source::{CatalogSource, Partition};

/// A named, configured data source served through the homogenized quantity
/// vocabulary.
///
/// Constructed once per logical dataset, read many times. Single-owner and
/// single-threaded; laziness here means deferred file opening, not
/// asynchronous scheduling.
pub struct Catalog {
    source: Box<dyn CatalogSource>,
    modifiers: BTreeMap<String, QuantityModifier>,
    native_quantities: BTreeSet<String>,
    native_schema: BTreeMap<String, ColumnDtype>,
    info: HashMap<String, QuantityInfo>,
    schema: Option<DeclaredSchema>,
    use_cache: bool,
    len: Cell<Option<usize>>,
}

impl Catalog {
    pub fn new(
        source: Box<dyn CatalogSource>,
        modifiers: BTreeMap<String, QuantityModifier>,
        info: HashMap<String, QuantityInfo>,
        schema: Option<DeclaredSchema>,
        use_cache: bool,
    ) -> Result<Self> {
        let native_schema = source.native_schema()?;
        let mut native_quantities: BTreeSet<String> = native_schema.keys().cloned().collect();
        // Partition attributes (tract, patch, visit, ...) are servable as
        // constant columns, so they count as native quantities too.
        for partition in source.partitions() {
            for (name, _) in partition.info().iter() {
                native_quantities.insert(name.clone());
            }
        }
        // Declared-schema columns are servable even when absent from every
        // physical file (constant default fill).
        if let Some(declared) = &schema {
            for name in declared.columns() {
                native_quantities.insert(name.clone());
            }
        }
        // Storage-carried column descriptions back-fill the info table.
        let mut info = info;
        for (name, description) in source.column_descriptions() {
            info.entry(name)
                .or_insert_with(|| QuantityInfo::with_description(description));
        }
        // A renamed quantity inherits its native column's description.
        let aliased: Vec<(String, QuantityInfo)> = modifiers
            .iter()
            .filter_map(|(name, modifier)| {
                if info.contains_key(name) {
                    return None;
                }
                let mut target = match modifier {
                    QuantityModifier::Rename(target) => target.as_str(),
                    _ => return None,
                };
                for _ in 0..modifiers.len() {
                    match modifiers.get(target) {
                        Some(QuantityModifier::Rename(next)) => target = next,
                        _ => break,
                    }
                }
                info.get(target).map(|i| (name.clone(), i.clone()))
            })
            .collect();
        info.extend(aliased);
        Ok(Self {
            source,
            modifiers,
            native_quantities,
            native_schema,
            info,
            schema,
            use_cache,
            len: Cell::new(None),
        })
    }

    /// All homogenized quantity names this catalog exposes.
    pub fn list_all_quantities(&self) -> Vec<String> {
        self.modifiers.keys().cloned().collect()
    }

    /// All native column names (including partition attributes).
    pub fn list_all_native_quantities(&self) -> Vec<String> {
        self.native_quantities.iter().cloned().collect()
    }

    pub fn has_quantity(&self, name: &str) -> bool {
        self.modifiers.contains_key(name) || self.native_quantities.contains(name)
    }

    /// Descriptive metadata for a quantity, when available.
    pub fn get_quantity_info(&self, name: &str) -> Option<&QuantityInfo> {
        self.info.get(name)
    }

    /// Native column names and dtypes as probed from storage.
    pub fn native_schema(&self) -> &BTreeMap<String, ColumnDtype> {
        &self.native_schema
    }

    /// Total row count over all partitions. Cached after the first call.
    pub fn row_count(&self) -> Result<usize> {
        if let Some(len) = self.len.get() {
            return Ok(len);
        }
        let mut total = 0;
        for partition in self.source.partitions() {
            total += partition.row_count()?;
        }
        self.len.set(Some(total));
        Ok(total)
    }

    /// Fetch quantities merged over all surviving partitions.
    ///
    /// `filters` are row-level predicates over homogenized values;
    /// `native_filters` prune partitions by their attributes before any
    /// file is opened. When no partition survives, every requested quantity
    /// comes back as an empty column.
    pub fn get_quantities<S: Into<String>>(
        &self,
        quantities: impl IntoIterator<Item = S>,
        filters: Option<&RowFilter>,
        native_filters: Option<&NativeFilter>,
    ) -> Result<HashMap<String, Column>> {
        let requested: Vec<String> = quantities.into_iter().map(Into::into).collect();
        let mut parts: HashMap<String, Vec<Column>> =
            requested.iter().map(|q| (q.clone(), Vec::new())).collect();
        for batch in self.get_quantities_iter(requested.iter().cloned(), filters, native_filters)? {
            let mut batch = batch?;
            for name in &requested {
                if let Some(column) = batch.remove(name) {
                    parts
                        .get_mut(name)
                        .map(|v| v.push(column))
                        .unwrap_or_default();
                }
            }
        }
        let mut out = HashMap::with_capacity(requested.len());
        for name in &requested {
            let columns = parts.remove(name).unwrap_or_default();
            let merged = if columns.is_empty() {
                Column::empty(self.empty_dtype(name))
            } else {
                Column::concat(columns)?
            };
            out.insert(name.clone(), merged);
        }
        Ok(out)
    }

    /// Fetch quantities one partition batch at a time.
    pub fn get_quantities_iter<'a, S: Into<String>>(
        &'a self,
        quantities: impl IntoIterator<Item = S>,
        filters: Option<&RowFilter>,
        native_filters: Option<&NativeFilter>,
    ) -> Result<QuantityIter<'a>> {
        let requested: Vec<String> = quantities.into_iter().map(Into::into).collect();
        let row_filter = filters.cloned();

        // Resolve everything up front so a bad name fails before any I/O.
        let resolver = self.resolver();
        let mut to_resolve = requested.clone();
        if let Some(f) = &row_filter {
            to_resolve.extend(f.quantities());
        }
        let needed = resolver.needed_native_quantities(&to_resolve)?;

        Ok(QuantityIter {
            catalog: self,
            requested,
            row_filter,
            native_filter: native_filters.cloned(),
            needed,
            next_partition: 0,
        })
    }

    /// Drop all cached row data.
    pub fn clear_cache(&self) {
        for partition in self.source.partitions() {
            partition.clear_cache();
        }
    }

    /// Release all cached file handles.
    pub fn close_all_file_handles(&self) {
        for partition in self.source.partitions() {
            partition.close();
        }
    }

    fn resolver(&self) -> QuantityResolver<'_> {
        QuantityResolver::new(&self.modifiers, &self.native_quantities)
    }

    fn empty_dtype(&self, name: &str) -> ColumnDtype {
        // Best effort: native and renamed requests keep the native column's
        // declared dtype, anything derived defaults to float.
        let mut name = name;
        for _ in 0..self.modifiers.len() {
            match self.modifiers.get(name) {
                Some(QuantityModifier::Rename(target)) => name = target,
                Some(QuantityModifier::Derived(_)) => return ColumnDtype::Float64,
                _ => break,
            }
        }
        self.native_schema
            .get(name)
            .copied()
            .unwrap_or(ColumnDtype::Float64)
    }

    /// Read the needed native columns from one partition, synthesizing
    /// constant columns for partition attributes and schema-declared
    /// defaults. Returns Ok(None) when the partition cannot serve the
    /// request and should be skipped.
    fn read_native_batch(
        &self,
        partition: &dyn Partition,
        needed: &BTreeSet<String>,
    ) -> Result<Option<HashMap<String, Column>>> {
        let physical: BTreeSet<String> = match partition.columns() {
            Ok(columns) => columns.into_iter().collect(),
            Err(e) => {
                log::warn!("cannot read partition {:?}; skipped: {}", partition.info(), e);
                return Ok(None);
            }
        };
        let rows = match partition.row_count() {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("cannot read partition {:?}; skipped: {}", partition.info(), e);
                return Ok(None);
            }
        };

        let mut to_read = Vec::new();
        let mut synthesized = HashMap::new();
        for name in needed {
            if physical.contains(name) {
                to_read.push(name.clone());
            } else if let Some(value) = partition.info().get(name) {
                synthesized.insert(name.clone(), Column::constant(value, rows));
            } else if let Some(column) = self
                .schema
                .as_ref()
                .and_then(|s| s.fill_column(name, rows))
            {
                synthesized.insert(name.clone(), column);
            } else {
                log::warn!(
                    "partition {:?} has no column '{}' and no declared default; skipped",
                    partition.info(),
                    name
                );
                return Ok(None);
            }
        }

        let mut data = if to_read.is_empty() {
            HashMap::new()
        } else {
            match partition.read_columns(&to_read) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("cannot read partition {:?}; skipped: {}", partition.info(), e);
                    return Ok(None);
                }
            }
        };
        data.extend(synthesized);
        Ok(Some(data))
    }
}

/// Iterator yielding one resolved-quantity map per surviving partition
/// batch. Unreadable partitions are skipped with a warning; evaluation
/// failures end the query with an error.
pub struct QuantityIter<'a> {
    catalog: &'a Catalog,
    requested: Vec<String>,
    row_filter: Option<RowFilter>,
    native_filter: Option<NativeFilter>,
    needed: BTreeSet<String>,
    next_partition: usize,
}

impl<'a> QuantityIter<'a> {
    fn evaluate_batch(
        &self,
        native_data: &HashMap<String, Column>,
    ) -> Result<HashMap<String, Column>> {
        let resolver = self.catalog.resolver();
        let mut resolved = HashMap::new();
        for name in &self.requested {
            resolved.insert(name.clone(), resolver.evaluate(name, native_data)?);
        }
        if let Some(filter) = &self.row_filter {
            let mut filter_columns = resolved.clone();
            for name in filter.quantities() {
                if !filter_columns.contains_key(&name) {
                    filter_columns.insert(name.clone(), resolver.evaluate(&name, native_data)?);
                }
            }
            let mask = filter.mask(&filter_columns)?;
            for column in resolved.values_mut() {
                *column = column.filter(&mask);
            }
        }
        Ok(resolved)
    }
}

impl<'a> Iterator for QuantityIter<'a> {
    type Item = Result<HashMap<String, Column>>;

    fn next(&mut self) -> Option<Self::Item> {
        let partitions = self.catalog.source.partitions();
        while self.next_partition < partitions.len() {
            let partition = &partitions[self.next_partition];
            self.next_partition += 1;

            // Pruning happens before the partition's storage is touched.
            if let Some(filter) = &self.native_filter {
                if !filter.check(partition.info()) {
                    continue;
                }
            }

            let native_data = match self.catalog.read_native_batch(partition.as_ref(), &self.needed)
            {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            };
            let batch = self.evaluate_batch(&native_data);
            if !self.catalog.use_cache {
                partition.clear_cache();
            }
            return Some(batch);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Scalar;
    use crate::error::Error;
    use crate::funcs;
    use crate::quantity::QuantityModifier;
    use crate::schema::{ColumnSchema, DeclaredSchema};
    use crate::source::PartitionInfo;
    use std::rc::Rc;
    use std::sync::Arc;

    /// In-memory partition counting how many times its storage is "opened".
    struct MockPartition {
        info: PartitionInfo,
        data: HashMap<String, Column>,
        opens: Rc<Cell<usize>>,
        fail_reads: bool,
    }

    impl Partition for MockPartition {
        fn info(&self) -> &PartitionInfo {
            &self.info
        }

        fn row_count(&self) -> Result<usize> {
            Ok(self
                .data
                .values()
                .next()
                .map(|c| c.len())
                .unwrap_or_default())
        }

        fn columns(&self) -> Result<Vec<String>> {
            Ok(self.data.keys().cloned().collect())
        }

        fn read_columns(&self, names: &[String]) -> Result<HashMap<String, Column>> {
            self.opens.set(self.opens.get() + 1);
            if self.fail_reads {
                return Err(Error::config("simulated unreadable partition"));
            }
            names
                .iter()
                .map(|n| {
                    self.data
                        .get(n)
                        .cloned()
                        .map(|c| (n.clone(), c))
                        .ok_or_else(|| Error::config(format!("no column {}", n)))
                })
                .collect()
        }
    }

    struct MockSource {
        partitions: Vec<Box<dyn Partition>>,
        schema: BTreeMap<String, ColumnDtype>,
    }

    impl CatalogSource for MockSource {
        fn partitions(&self) -> &[Box<dyn Partition>] {
            &self.partitions
        }

        fn native_schema(&self) -> Result<BTreeMap<String, ColumnDtype>> {
            Ok(self.schema.clone())
        }
    }

    fn two_tract_catalog(opens: Rc<Cell<usize>>) -> Catalog {
        let mut schema = BTreeMap::new();
        schema.insert("coord_ra".to_string(), ColumnDtype::Float64);
        schema.insert("flux_r".to_string(), ColumnDtype::Float64);

        let make = |tract: i64, ra: Vec<f64>, flux: Vec<f64>| -> Box<dyn Partition> {
            let mut data = HashMap::new();
            data.insert("coord_ra".to_string(), Column::Float64(ra));
            data.insert("flux_r".to_string(), Column::Float64(flux));
            Box::new(MockPartition {
                info: PartitionInfo::new().with("tract", Scalar::Int(tract)),
                data,
                opens: opens.clone(),
                fail_reads: false,
            })
        };

        let source = MockSource {
            partitions: vec![
                make(100, vec![0.1, 0.2, 0.3], vec![10.0, 20.0, 30.0]),
                make(200, vec![0.4, 0.5], vec![40.0, 50.0]),
            ],
            schema,
        };

        let mut modifiers = BTreeMap::new();
        modifiers.insert(
            "ra".to_string(),
            QuantityModifier::derived(Arc::new(funcs::rad2deg), ["coord_ra"]),
        );
        modifiers.insert(
            "flux_r".to_string(),
            QuantityModifier::Identity,
        );

        Catalog::new(Box::new(source), modifiers, HashMap::new(), None, true).unwrap()
    }

    #[test]
    fn listed_quantities_are_all_resolvable() {
        let catalog = two_tract_catalog(Rc::new(Cell::new(0)));
        for quantity in catalog.list_all_quantities() {
            let result = catalog.get_quantities([quantity.as_str()], None, None).unwrap();
            assert!(!result[&quantity].is_empty());
        }
    }

    #[test]
    fn native_filter_prunes_without_opening_files() {
        let opens = Rc::new(Cell::new(0));
        let catalog = two_tract_catalog(opens.clone());
        let filter = NativeFilter::from_exprs(["tract == 999"]).unwrap();
        let result = catalog
            .get_quantities(["ra"], None, Some(&filter))
            .unwrap();
        assert!(result["ra"].is_empty());
        assert_eq!(opens.get(), 0);
    }

    #[test]
    fn end_to_end_single_tract_selection() {
        let catalog = two_tract_catalog(Rc::new(Cell::new(0)));
        let filter = NativeFilter::from_exprs(["tract == 100"]).unwrap();
        let result = catalog
            .get_quantities(["ra", "tract"], None, Some(&filter))
            .unwrap();
        assert_eq!(result["ra"].len(), 3);
        assert_eq!(result["tract"], Column::Int64(vec![100, 100, 100]));
    }

    #[test]
    fn get_quantities_is_idempotent() {
        let catalog = two_tract_catalog(Rc::new(Cell::new(0)));
        let a = catalog.get_quantities(["ra", "flux_r"], None, None).unwrap();
        let b = catalog.get_quantities(["ra", "flux_r"], None, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn row_filter_applies_after_resolution() {
        let catalog = two_tract_catalog(Rc::new(Cell::new(0)));
        let filter = RowFilter::from_exprs(["flux_r > 25"]).unwrap();
        let result = catalog
            .get_quantities(["ra"], Some(&filter), None)
            .unwrap();
        // flux_r > 25 keeps 30, 40, 50.
        assert_eq!(result["ra"].len(), 3);
    }

    #[test]
    fn unknown_quantity_fails_before_io() {
        let opens = Rc::new(Cell::new(0));
        let catalog = two_tract_catalog(opens.clone());
        assert!(matches!(
            catalog.get_quantities(["nonexistent"], None, None),
            Err(Error::Configuration(_))
        ));
        assert_eq!(opens.get(), 0);
    }

    #[test]
    fn unreadable_partition_is_skipped_not_fatal() {
        let opens = Rc::new(Cell::new(0));
        let mut schema = BTreeMap::new();
        schema.insert("x".to_string(), ColumnDtype::Float64);
        let good = {
            let mut data = HashMap::new();
            data.insert("x".to_string(), Column::Float64(vec![1.0]));
            Box::new(MockPartition {
                info: PartitionInfo::new().with("tract", Scalar::Int(1)),
                data,
                opens: opens.clone(),
                fail_reads: false,
            }) as Box<dyn Partition>
        };
        let bad = {
            let mut data = HashMap::new();
            data.insert("x".to_string(), Column::Float64(vec![2.0]));
            Box::new(MockPartition {
                info: PartitionInfo::new().with("tract", Scalar::Int(2)),
                data,
                opens: opens.clone(),
                fail_reads: true,
            }) as Box<dyn Partition>
        };
        let source = MockSource {
            partitions: vec![bad, good],
            schema,
        };
        let catalog =
            Catalog::new(Box::new(source), BTreeMap::new(), HashMap::new(), None, true).unwrap();
        let result = catalog.get_quantities(["x"], None, None).unwrap();
        assert_eq!(result["x"], Column::Float64(vec![1.0]));
    }

    #[test]
    fn declared_schema_fills_missing_columns() {
        let opens = Rc::new(Cell::new(0));
        let mut native = BTreeMap::new();
        native.insert("x".to_string(), ColumnDtype::Float64);
        native.insert("r_flag_bad".to_string(), ColumnDtype::Bool);
        native.insert("n_obs".to_string(), ColumnDtype::Int64);

        // The partition physically has only `x`.
        let mut data = HashMap::new();
        data.insert("x".to_string(), Column::Float64(vec![1.0, 2.0]));
        let source = MockSource {
            partitions: vec![Box::new(MockPartition {
                info: PartitionInfo::new(),
                data,
                opens,
                fail_reads: false,
            })],
            schema: native.clone(),
        };

        let mut declared = DeclaredSchema::default();
        declared.insert("x", ColumnSchema::new(ColumnDtype::Float64));
        declared.insert("r_flag_bad", ColumnSchema::new(ColumnDtype::Bool));
        declared.insert("n_obs", ColumnSchema::new(ColumnDtype::Int64));

        let catalog = Catalog::new(
            Box::new(source),
            BTreeMap::new(),
            HashMap::new(),
            Some(declared),
            true,
        )
        .unwrap();
        let result = catalog
            .get_quantities(["x", "r_flag_bad", "n_obs"], None, None)
            .unwrap();
        assert_eq!(result["x"].len(), 2);
        // Missing flag column defaults to true (no data means "flagged").
        assert_eq!(result["r_flag_bad"], Column::Bool(vec![true, true]));
        assert_eq!(result["n_obs"], Column::Int64(vec![-1, -1]));
    }

    #[test]
    fn iterator_yields_one_batch_per_partition() {
        let catalog = two_tract_catalog(Rc::new(Cell::new(0)));
        let batches: Vec<_> = catalog
            .get_quantities_iter(["flux_r"], None, None)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0]["flux_r"].len(), 3);
        assert_eq!(batches[1]["flux_r"].len(), 2);
    }

    #[test]
    fn empty_result_for_renamed_quantity_keeps_native_dtype() {
        let opens = Rc::new(Cell::new(0));
        let mut schema = BTreeMap::new();
        schema.insert("good".to_string(), ColumnDtype::Bool);
        let mut data = HashMap::new();
        data.insert("good".to_string(), Column::Bool(vec![true, false]));
        let source = MockSource {
            partitions: vec![Box::new(MockPartition {
                info: PartitionInfo::new().with("tract", Scalar::Int(1)),
                data,
                opens,
                fail_reads: false,
            })],
            schema,
        };
        let mut modifiers = BTreeMap::new();
        modifiers.insert("clean".to_string(), QuantityModifier::Rename("good".into()));
        let catalog =
            Catalog::new(Box::new(source), modifiers, HashMap::new(), None, true).unwrap();

        let none = NativeFilter::from_exprs(["tract == 999"]).unwrap();
        let result = catalog.get_quantities(["clean"], None, Some(&none)).unwrap();
        assert_eq!(result["clean"], Column::Bool(Vec::new()));
    }

    #[test]
    fn renamed_quantities_inherit_storage_descriptions() {
        struct DescribedSource(MockSource);

        impl CatalogSource for DescribedSource {
            fn partitions(&self) -> &[Box<dyn Partition>] {
                self.0.partitions()
            }

            fn native_schema(&self) -> Result<BTreeMap<String, ColumnDtype>> {
                self.0.native_schema()
            }

            fn column_descriptions(&self) -> HashMap<String, String> {
                let mut out = HashMap::new();
                out.insert("redshift".to_string(), "true redshift".to_string());
                out
            }
        }

        let mut schema = BTreeMap::new();
        schema.insert("redshift".to_string(), ColumnDtype::Float64);
        let source = DescribedSource(MockSource {
            partitions: Vec::new(),
            schema,
        });
        let mut modifiers = BTreeMap::new();
        modifiers.insert(
            "redshift_true".to_string(),
            QuantityModifier::Rename("redshift".into()),
        );
        let catalog =
            Catalog::new(Box::new(source), modifiers, HashMap::new(), None, true).unwrap();

        assert_eq!(
            catalog.get_quantity_info("redshift").unwrap().description,
            "true redshift"
        );
        assert_eq!(
            catalog
                .get_quantity_info("redshift_true")
                .unwrap()
                .description,
            "true redshift"
        );
    }

    #[test]
    fn row_count_sums_partitions() {
        let catalog = two_tract_catalog(Rc::new(Cell::new(0)));
        assert_eq!(catalog.row_count().unwrap(), 5);
    }
}
