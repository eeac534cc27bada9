use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeStringArray, StringArray,
};
use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single scalar value, as found in partition attributes, filter literals
/// and schema defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Numeric view used for cross-type comparisons (int vs float).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Element type of a [`Column`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnDtype {
    Float64,
    Int64,
    Bool,
    Str,
}

impl ColumnDtype {
    /// Constant used to fill a column that is declared in the schema but
    /// absent from a partition's physical storage.
    pub fn default_value(&self) -> Scalar {
        match self {
            ColumnDtype::Float64 => Scalar::Float(f64::NAN),
            ColumnDtype::Int64 => Scalar::Int(-1),
            ColumnDtype::Bool => Scalar::Bool(false),
            ColumnDtype::Str => Scalar::Str(String::new()),
        }
    }
}

/// An owned, typed column of values; one entry per catalog row in a
/// partition batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl Column {
    pub fn dtype(&self) -> ColumnDtype {
        match self {
            Column::Float64(_) => ColumnDtype::Float64,
            Column::Int64(_) => ColumnDtype::Int64,
            Column::Bool(_) => ColumnDtype::Bool,
            Column::Str(_) => ColumnDtype::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Float64(v) => v.len(),
            Column::Int64(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn empty(dtype: ColumnDtype) -> Self {
        match dtype {
            ColumnDtype::Float64 => Column::Float64(Vec::new()),
            ColumnDtype::Int64 => Column::Int64(Vec::new()),
            ColumnDtype::Bool => Column::Bool(Vec::new()),
            ColumnDtype::Str => Column::Str(Vec::new()),
        }
    }

    /// Build a constant-valued column of the given length.
    pub fn constant(value: &Scalar, len: usize) -> Self {
        match value {
            Scalar::Float(v) => Column::Float64(vec![*v; len]),
            Scalar::Int(v) => Column::Int64(vec![*v; len]),
            Scalar::Bool(v) => Column::Bool(vec![*v; len]),
            Scalar::Str(v) => Column::Str(vec![v.clone(); len]),
        }
    }

    /// View as f64 values; integer columns are widened.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        match self {
            Column::Float64(v) => Ok(v.clone()),
            Column::Int64(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            other => Err(Error::config(format!(
                "cannot interpret {:?} column as float64",
                other.dtype()
            ))),
        }
    }

    pub fn as_bool_slice(&self) -> Result<&[bool]> {
        match self {
            Column::Bool(v) => Ok(v),
            other => Err(Error::config(format!(
                "expected bool column, found {:?}",
                other.dtype()
            ))),
        }
    }

    /// Keep only the rows where `mask` is true. `mask` must have the same
    /// length as the column.
    pub fn filter(&self, mask: &[bool]) -> Column {
        fn keep<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, &m)| m)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            Column::Float64(v) => Column::Float64(keep(v, mask)),
            Column::Int64(v) => Column::Int64(keep(v, mask)),
            Column::Bool(v) => Column::Bool(keep(v, mask)),
            Column::Str(v) => Column::Str(keep(v, mask)),
        }
    }

    /// Concatenate per-partition batches into one column. Int64 batches are
    /// widened when mixed with Float64 (partitions of older catalogs may
    /// store a quantity as int); any other dtype mix is rejected.
    pub fn concat(parts: Vec<Column>) -> Result<Column> {
        let mut iter = parts.into_iter();
        let first = match iter.next() {
            Some(c) => c,
            None => return Ok(Column::empty(ColumnDtype::Float64)),
        };
        let mut out = first;
        for part in iter {
            out = match (out, part) {
                (Column::Float64(mut a), Column::Float64(b)) => {
                    a.extend(b);
                    Column::Float64(a)
                }
                (Column::Float64(mut a), Column::Int64(b)) => {
                    a.extend(b.iter().map(|&x| x as f64));
                    Column::Float64(a)
                }
                (Column::Int64(a), Column::Float64(b)) => {
                    let mut v: Vec<f64> = a.iter().map(|&x| x as f64).collect();
                    v.extend(b);
                    Column::Float64(v)
                }
                (Column::Int64(mut a), Column::Int64(b)) => {
                    a.extend(b);
                    Column::Int64(a)
                }
                (Column::Bool(mut a), Column::Bool(b)) => {
                    a.extend(b);
                    Column::Bool(a)
                }
                (Column::Str(mut a), Column::Str(b)) => {
                    a.extend(b);
                    Column::Str(a)
                }
                (a, b) => {
                    return Err(Error::config(format!(
                        "cannot concatenate {:?} column with {:?} column",
                        a.dtype(),
                        b.dtype()
                    )))
                }
            };
        }
        Ok(out)
    }

    /// Convert an arrow array into an owned column. Narrow numeric types are
    /// widened; nulls take the dtype default.
    pub fn from_arrow(array: &ArrayRef) -> Result<Column> {
        match array.data_type() {
            DataType::Float64 => {
                let arr = downcast::<Float64Array>(array)?;
                Ok(Column::Float64(
                    (0..arr.len())
                        .map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) })
                        .collect(),
                ))
            }
            DataType::Float32 => {
                let arr = downcast::<Float32Array>(array)?;
                Ok(Column::Float64(
                    (0..arr.len())
                        .map(|i| {
                            if arr.is_null(i) {
                                f64::NAN
                            } else {
                                arr.value(i) as f64
                            }
                        })
                        .collect(),
                ))
            }
            DataType::Int64 => {
                let arr = downcast::<Int64Array>(array)?;
                Ok(Column::Int64(
                    (0..arr.len())
                        .map(|i| if arr.is_null(i) { -1 } else { arr.value(i) })
                        .collect(),
                ))
            }
            DataType::Int32 => {
                let arr = downcast::<Int32Array>(array)?;
                Ok(Column::Int64(
                    (0..arr.len())
                        .map(|i| if arr.is_null(i) { -1 } else { arr.value(i) as i64 })
                        .collect(),
                ))
            }
            DataType::Boolean => {
                let arr = downcast::<BooleanArray>(array)?;
                Ok(Column::Bool(
                    (0..arr.len())
                        .map(|i| !arr.is_null(i) && arr.value(i))
                        .collect(),
                ))
            }
            DataType::Utf8 => {
                let arr = downcast::<StringArray>(array)?;
                Ok(Column::Str(
                    (0..arr.len())
                        .map(|i| {
                            if arr.is_null(i) {
                                String::new()
                            } else {
                                arr.value(i).to_string()
                            }
                        })
                        .collect(),
                ))
            }
            DataType::LargeUtf8 => {
                let arr = downcast::<LargeStringArray>(array)?;
                Ok(Column::Str(
                    (0..arr.len())
                        .map(|i| {
                            if arr.is_null(i) {
                                String::new()
                            } else {
                                arr.value(i).to_string()
                            }
                        })
                        .collect(),
                ))
            }
            other => Err(Error::config(format!(
                "unsupported arrow data type: {:?}",
                other
            ))),
        }
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::config("arrow array type does not match its declared data type"))
}
