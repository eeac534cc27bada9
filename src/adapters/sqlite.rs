//! SQLite-backed catalog sources (truth tables and similar single-table
//! catalogs).
//!
//! The whole table is served as one partition. Columns are discovered from
//! `PRAGMA table_info` and all requested columns are fetched in a single
//! `SELECT` rather than one round-trip per column. If the database carries
//! a `column_descriptions` table, those descriptions feed the catalog's
//! quantity-info lookups.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::column::{Column, ColumnDtype};
use crate::error::{Error, Result};
use crate::schema;
use crate::source::{CatalogSource, Partition, PartitionInfo};

pub struct SqliteSource {
    partitions: Vec<Box<dyn Partition>>,
    schema: BTreeMap<String, ColumnDtype>,
    descriptions: HashMap<String, String>,
}

impl SqliteSource {
    pub fn open(path: impl Into<PathBuf>, table: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let table = table.into();
        if !path.is_file() {
            return Err(Error::config(format!(
                "{} is not a valid filename",
                path.display()
            )));
        }
        let conn = open_read_only(&path)?;
        let schema = read_table_schema(&conn, &table)?;
        if schema.is_empty() {
            return Err(Error::config(format!(
                "table '{}' does not exist or has no columns in {}",
                table,
                path.display()
            )));
        }
        let descriptions = read_column_descriptions(&conn);

        let partition = SqlitePartition {
            path,
            table,
            schema: schema.clone(),
            info: PartitionInfo::new(),
            conn: RefCell::new(Some(conn)),
            rows: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
        };
        Ok(Self {
            partitions: vec![Box::new(partition)],
            schema,
            descriptions,
        })
    }
}

impl CatalogSource for SqliteSource {
    fn partitions(&self) -> &[Box<dyn Partition>] {
        &self.partitions
    }

    fn native_schema(&self) -> Result<BTreeMap<String, ColumnDtype>> {
        Ok(self.schema.clone())
    }

    fn column_descriptions(&self) -> HashMap<String, String> {
        self.descriptions.clone()
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

fn read_table_schema(conn: &Connection, table: &str) -> Result<BTreeMap<String, ColumnDtype>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (name, decl_type) = row?;
        out.insert(name, dtype_from_decl(&decl_type));
    }
    Ok(out)
}

/// SQLite type affinity, reduced to the dtypes we serve. Untyped columns
/// fall back to float.
fn dtype_from_decl(decl: &str) -> ColumnDtype {
    let decl = decl.to_ascii_uppercase();
    if decl.contains("BOOL") {
        ColumnDtype::Bool
    } else if decl.contains("INT") {
        ColumnDtype::Int64
    } else if decl.contains("CHAR") || decl.contains("TEXT") || decl.contains("CLOB") {
        ColumnDtype::Str
    } else {
        ColumnDtype::Float64
    }
}

fn read_column_descriptions(conn: &Connection) -> HashMap<String, String> {
    let mut stmt = match conn.prepare("SELECT name, description FROM column_descriptions") {
        Ok(stmt) => stmt,
        Err(_) => return HashMap::new(), // table is optional
    };
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    });
    match rows {
        Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
        Err(_) => HashMap::new(),
    }
}

struct SqlitePartition {
    path: PathBuf,
    table: String,
    schema: BTreeMap<String, ColumnDtype>,
    info: PartitionInfo,
    conn: RefCell<Option<Connection>>,
    rows: RefCell<Option<usize>>,
    cache: RefCell<HashMap<String, Column>>,
}

impl SqlitePartition {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.borrow_mut();
        let conn = match guard.take() {
            Some(conn) => conn,
            None => open_read_only(&self.path)?,
        };
        let out = f(&conn);
        *guard = Some(conn);
        out
    }
}

impl Partition for SqlitePartition {
    fn info(&self) -> &PartitionInfo {
        &self.info
    }

    fn row_count(&self) -> Result<usize> {
        if let Some(rows) = *self.rows.borrow() {
            return Ok(rows);
        }
        let rows = self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"", self.table),
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })?;
        *self.rows.borrow_mut() = Some(rows);
        Ok(rows)
    }

    fn columns(&self) -> Result<Vec<String>> {
        Ok(self.schema.keys().cloned().collect())
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
            for name in &missing {
                if !self.schema.contains_key(name) {
                    return Err(Error::config(format!(
                        "column '{}' not found in table '{}'",
                        name, self.table
                    )));
                }
            }
            let dtypes: Vec<ColumnDtype> =
                missing.iter().map(|n| self.schema[n]).collect();
            let select = format!(
                "SELECT {} FROM \"{}\"",
                missing
                    .iter()
                    .map(|n| format!("\"{}\"", n))
                    .collect::<Vec<_>>()
                    .join(", "),
                self.table
            );
            let fetched = self.with_conn(|conn| {
                let mut builders: Vec<Column> = dtypes.iter().map(|&d| Column::empty(d)).collect();
                let mut stmt = conn.prepare(&select)?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    for (i, builder) in builders.iter_mut().enumerate() {
                        append_value(builder, row, i, &missing[i])?;
                    }
                }
                Ok(builders)
            })?;
            let mut cache = self.cache.borrow_mut();
            for (name, column) in missing.iter().zip(fetched) {
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
        *self.conn.borrow_mut() = None;
    }
}

/// Append one row's value to a column builder; NULL takes the column's
/// default (including the flag-suffix convention).
fn append_value(
    builder: &mut Column,
    row: &rusqlite::Row<'_>,
    idx: usize,
    name: &str,
) -> Result<()> {
    match builder {
        Column::Float64(v) => {
            v.push(row.get::<_, Option<f64>>(idx)?.unwrap_or(f64::NAN));
        }
        Column::Int64(v) => {
            v.push(row.get::<_, Option<i64>>(idx)?.unwrap_or(-1));
        }
        Column::Bool(v) => {
            let value = row.get::<_, Option<bool>>(idx)?.unwrap_or_else(|| {
                matches!(
                    schema::default_for(name, ColumnDtype::Bool),
                    crate::column::Scalar::Bool(true)
                )
            });
            v.push(value);
        }
        Column::Str(v) => {
            v.push(row.get::<_, Option<String>>(idx)?.unwrap_or_default());
        }
    }
    Ok(())
}
