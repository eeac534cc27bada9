//! Filter expressions.
//!
//! Two kinds of filters share one comparison syntax (`"tract == 4850"`,
//! `"mag_r < 24.5"`): native filters are evaluated against partition
//! attributes before any file is opened, row filters are evaluated against
//! resolved homogenized columns to a boolean mask.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::column::{Column, Scalar};
use crate::error::{Error, Result};
use crate::source::PartitionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn matches(&self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        matches!(
            (self, ord),
            (CmpOp::Eq, Equal)
                | (CmpOp::Ne, Less)
                | (CmpOp::Ne, Greater)
                | (CmpOp::Lt, Less)
                | (CmpOp::Le, Less)
                | (CmpOp::Le, Equal)
                | (CmpOp::Gt, Greater)
                | (CmpOp::Ge, Greater)
                | (CmpOp::Ge, Equal)
        )
    }
}

/// A single predicate over one quantity or partition attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Cmp(CmpOp, Scalar),
    /// Membership in an id list; produced by [`partition_filter`], not by
    /// the expression parser.
    In(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub quantity: String,
    pub predicate: Predicate,
}

fn expr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_]\w*)\s*(==|!=|<=|>=|<|>)\s*(.+?)\s*$")
            .expect("filter expression regex is valid")
    })
}

fn parse_literal(text: &str) -> Scalar {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Scalar::Int(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Scalar::Float(v);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Scalar::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Scalar::Bool(false);
    }
    Scalar::Str(trimmed.trim_matches(|c| c == '"' || c == '\'').to_string())
}

impl Comparison {
    /// Parse one comparison from text, e.g. `"tract == 4850"`.
    pub fn parse(expr: &str) -> Result<Self> {
        let caps = expr_regex()
            .captures(expr)
            .ok_or_else(|| Error::config(format!("cannot parse filter expression '{}'", expr)))?;
        let op = match &caps[2] {
            "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            other => return Err(Error::config(format!("unknown operator '{}'", other))),
        };
        Ok(Comparison {
            quantity: caps[1].to_string(),
            predicate: Predicate::Cmp(op, parse_literal(&caps[3])),
        })
    }

    fn check_scalar(&self, value: &Scalar) -> bool {
        match &self.predicate {
            Predicate::In(ids) => match value {
                Scalar::Int(v) => ids.contains(v),
                _ => false,
            },
            Predicate::Cmp(op, literal) => compare(value, literal)
                .map(|ord| op.matches(ord))
                .unwrap_or(false),
        }
    }
}

fn compare(a: &Scalar, b: &Scalar) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Scalar::Str(x), Scalar::Str(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// A conjunction of comparisons over partition attributes. Partitions whose
/// attributes fail any comparison are pruned before their file is opened.
/// A comparison on an attribute the partition does not carry fails it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeFilter(Vec<Comparison>);

impl NativeFilter {
    pub fn from_exprs<S: AsRef<str>>(exprs: impl IntoIterator<Item = S>) -> Result<Self> {
        Ok(Self(
            exprs
                .into_iter()
                .map(|e| Comparison::parse(e.as_ref()))
                .collect::<Result<_>>()?,
        ))
    }

    pub fn from_comparisons(comparisons: Vec<Comparison>) -> Self {
        Self(comparisons)
    }

    pub fn check(&self, info: &PartitionInfo) -> bool {
        self.0.iter().all(|c| {
            info.get(&c.quantity)
                .map(|v| c.check_scalar(v))
                .unwrap_or(false)
        })
    }
}

/// A conjunction of comparisons over homogenized quantities, evaluated per
/// batch to a boolean row mask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter(Vec<Comparison>);

impl RowFilter {
    pub fn from_exprs<S: AsRef<str>>(exprs: impl IntoIterator<Item = S>) -> Result<Self> {
        Ok(Self(
            exprs
                .into_iter()
                .map(|e| Comparison::parse(e.as_ref()))
                .collect::<Result<_>>()?,
        ))
    }

    /// Quantities this filter reads; they are resolved alongside the
    /// requested ones so a filter can use quantities the caller did not ask
    /// to be returned.
    pub fn quantities(&self) -> Vec<String> {
        self.0.iter().map(|c| c.quantity.clone()).collect()
    }

    /// Conjunctive mask over the given resolved columns.
    pub fn mask(&self, columns: &HashMap<String, Column>) -> Result<Vec<bool>> {
        let n = columns
            .values()
            .next()
            .map(|c| c.len())
            .unwrap_or_default();
        let mut mask = vec![true; n];
        for cmp in &self.0 {
            let column = columns.get(&cmp.quantity).ok_or_else(|| {
                Error::config(format!(
                    "filter quantity '{}' was not resolved",
                    cmp.quantity
                ))
            })?;
            apply_comparison(cmp, column, &mut mask)?;
        }
        Ok(mask)
    }
}

fn apply_comparison(cmp: &Comparison, column: &Column, mask: &mut [bool]) -> Result<()> {
    if column.len() != mask.len() {
        return Err(Error::config(format!(
            "filter column '{}' length {} does not match batch length {}",
            cmp.quantity,
            column.len(),
            mask.len()
        )));
    }
    match column {
        Column::Float64(values) => {
            for (m, v) in mask.iter_mut().zip(values) {
                *m &= cmp.check_scalar(&Scalar::Float(*v));
            }
        }
        Column::Int64(values) => {
            for (m, v) in mask.iter_mut().zip(values) {
                *m &= cmp.check_scalar(&Scalar::Int(*v));
            }
        }
        Column::Bool(values) => {
            for (m, v) in mask.iter_mut().zip(values) {
                *m &= cmp.check_scalar(&Scalar::Bool(*v));
            }
        }
        Column::Str(values) => {
            for (m, v) in mask.iter_mut().zip(values) {
                *m &= cmp.check_scalar(&Scalar::Str(v.clone()));
            }
        }
    }
    Ok(())
}

/// Partition id selection for [`partition_filter`].
pub enum PartitionIds {
    Single(i64),
    /// Inclusive on both ends.
    Range(i64, i64),
    List(Vec<i64>),
}

/// Build a native filter selecting partitions by integer id, e.g.
/// `partition_filter("tract", PartitionIds::Range(4850, 4860))`.
pub fn partition_filter(name: &str, ids: PartitionIds) -> Result<NativeFilter> {
    let predicate = match ids {
        PartitionIds::Single(id) => Predicate::Cmp(CmpOp::Eq, Scalar::Int(id)),
        PartitionIds::Range(lo, hi) => {
            return Ok(NativeFilter(vec![
                Comparison {
                    quantity: name.to_string(),
                    predicate: Predicate::Cmp(CmpOp::Ge, Scalar::Int(lo)),
                },
                Comparison {
                    quantity: name.to_string(),
                    predicate: Predicate::Cmp(CmpOp::Le, Scalar::Int(hi)),
                },
            ]))
        }
        PartitionIds::List(mut ids) => {
            ids.sort_unstable();
            ids.dedup();
            if ids.is_empty() {
                return Err(Error::config(format!("must select at least one {}", name)));
            }
            Predicate::In(ids)
        }
    };
    Ok(NativeFilter(vec![Comparison {
        quantity: name.to_string(),
        predicate,
    }]))
}

/// Shorthand for the most common partition attribute.
pub fn tract_filter(ids: PartitionIds) -> Result<NativeFilter> {
    partition_filter("tract", ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(tract: i64, patch: &str) -> PartitionInfo {
        PartitionInfo::new()
            .with("tract", Scalar::Int(tract))
            .with("patch", Scalar::Str(patch.to_string()))
    }

    #[test]
    fn parses_comparison_operators() {
        let c = Comparison::parse("tract == 4850").unwrap();
        assert_eq!(c.quantity, "tract");
        assert_eq!(c.predicate, Predicate::Cmp(CmpOp::Eq, Scalar::Int(4850)));

        let c = Comparison::parse("mag_r <= 24.5").unwrap();
        assert_eq!(c.predicate, Predicate::Cmp(CmpOp::Le, Scalar::Float(24.5)));

        let c = Comparison::parse("patch != '3,2'").unwrap();
        assert_eq!(
            c.predicate,
            Predicate::Cmp(CmpOp::Ne, Scalar::Str("3,2".to_string()))
        );
    }

    #[test]
    fn rejects_garbage_expressions() {
        assert!(Comparison::parse("tract").is_err());
        assert!(Comparison::parse("== 5").is_err());
    }

    #[test]
    fn native_filter_checks_partition_attributes() {
        let f = NativeFilter::from_exprs(["tract == 100"]).unwrap();
        assert!(f.check(&info(100, "0,0")));
        assert!(!f.check(&info(200, "0,0")));
    }

    #[test]
    fn missing_attribute_fails_the_partition() {
        let f = NativeFilter::from_exprs(["visit == 7"]).unwrap();
        assert!(!f.check(&info(100, "0,0")));
    }

    #[test]
    fn partition_filter_range_is_inclusive() {
        let f = partition_filter("tract", PartitionIds::Range(100, 200)).unwrap();
        assert!(f.check(&info(100, "0,0")));
        assert!(f.check(&info(200, "0,0")));
        assert!(!f.check(&info(201, "0,0")));
    }

    #[test]
    fn partition_filter_list_membership() {
        let f = partition_filter("tract", PartitionIds::List(vec![300, 100])).unwrap();
        assert!(f.check(&info(100, "0,0")));
        assert!(!f.check(&info(200, "0,0")));
    }

    #[test]
    fn empty_id_list_is_rejected() {
        assert!(partition_filter("tract", PartitionIds::List(vec![])).is_err());
    }

    #[test]
    fn row_filter_masks_rows_conjunctively() {
        let f = RowFilter::from_exprs(["mag_r < 24.0", "good == true"]).unwrap();
        let mut columns = HashMap::new();
        columns.insert(
            "mag_r".to_string(),
            Column::Float64(vec![23.0, 25.0, 23.5]),
        );
        columns.insert("good".to_string(), Column::Bool(vec![true, true, false]));
        assert_eq!(f.mask(&columns).unwrap(), vec![true, false, false]);
    }

    #[test]
    fn int_and_float_literals_compare_across_types() {
        let f = RowFilter::from_exprs(["redshift < 1"]).unwrap();
        let mut columns = HashMap::new();
        columns.insert("redshift".to_string(), Column::Float64(vec![0.5, 1.5]));
        assert_eq!(f.mask(&columns).unwrap(), vec![true, false]);
    }
}
