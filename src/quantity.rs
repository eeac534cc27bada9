//! Quantity-modifier resolution.
//!
//! A modifier table maps a homogenized quantity name to the rule producing
//! it from native columns. Resolution is transitive: rename chains are
//! followed and derived-quantity sources may themselves be homogenized
//! names. Every chain must bottom out in the catalog's native quantity set.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::column::Column;
use crate::error::{Error, Result};
use crate::funcs::DeriveFn;

/// How one homogenized quantity is produced from native columns.
#[derive(Clone)]
pub enum QuantityModifier {
    /// The homogenized name is itself a native column.
    Identity,
    /// A plain rename; the target may be native or another homogenized name.
    Rename(String),
    /// Computed by a function over one or more source columns.
    Derived(DerivedQuantity),
}

#[derive(Clone)]
pub struct DerivedQuantity {
    pub func: DeriveFn,
    pub sources: Vec<String>,
}

impl QuantityModifier {
    pub fn derived(func: DeriveFn, sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        QuantityModifier::Derived(DerivedQuantity {
            func,
            sources: sources.into_iter().map(Into::into).collect(),
        })
    }
}

impl std::fmt::Debug for QuantityModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuantityModifier::Identity => write!(f, "Identity"),
            QuantityModifier::Rename(n) => write!(f, "Rename({:?})", n),
            QuantityModifier::Derived(d) => {
                write!(f, "Derived(<fn>, {:?})", d.sources)
            }
        }
    }
}

/// Resolves homogenized names against a modifier table and a native
/// quantity set. Borrowed by a catalog for the duration of one query.
pub struct QuantityResolver<'a> {
    modifiers: &'a BTreeMap<String, QuantityModifier>,
    native: &'a BTreeSet<String>,
}

impl<'a> QuantityResolver<'a> {
    pub fn new(
        modifiers: &'a BTreeMap<String, QuantityModifier>,
        native: &'a BTreeSet<String>,
    ) -> Self {
        Self { modifiers, native }
    }

    /// The transitive set of native columns needed to produce `requested`.
    /// Fails if any name cannot be resolved to the native set, or if a
    /// rename chain loops.
    pub fn needed_native_quantities(
        &self,
        requested: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<BTreeSet<String>> {
        let mut needed = BTreeSet::new();
        for name in requested {
            let mut stack = Vec::new();
            self.collect_native(name.as_ref(), &mut needed, &mut stack)?;
        }
        Ok(needed)
    }

    fn collect_native(
        &self,
        name: &str,
        needed: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        if stack.iter().any(|n| n == name) {
            return Err(Error::config(format!(
                "circular quantity reference: {} -> {}",
                stack.join(" -> "),
                name
            )));
        }
        stack.push(name.to_string());
        let result = match self.modifiers.get(name) {
            None | Some(QuantityModifier::Identity) => {
                if self.native.contains(name) {
                    needed.insert(name.to_string());
                    Ok(())
                } else {
                    Err(Error::config(format!(
                        "quantity '{}' is not resolvable to any native quantity",
                        name
                    )))
                }
            }
            Some(QuantityModifier::Rename(target)) => self.collect_native(target, needed, stack),
            Some(QuantityModifier::Derived(d)) => {
                for source in &d.sources {
                    self.collect_native(source, needed, stack)?;
                }
                Ok(())
            }
        };
        stack.pop();
        result
    }

    /// Compute the final column for one requested name from already-read
    /// native data. Derivation failures surface as
    /// [`Error::QuantityEvaluation`] naming the requested quantity.
    pub fn evaluate(&self, name: &str, native_data: &HashMap<String, Column>) -> Result<Column> {
        let mut stack = Vec::new();
        self.evaluate_inner(name, name, native_data, &mut stack)
    }

    fn evaluate_inner(
        &self,
        requested: &str,
        name: &str,
        native_data: &HashMap<String, Column>,
        stack: &mut Vec<String>,
    ) -> Result<Column> {
        if stack.iter().any(|n| n == name) {
            return Err(Error::config(format!(
                "circular quantity reference: {} -> {}",
                stack.join(" -> "),
                name
            )));
        }
        stack.push(name.to_string());
        let result = match self.modifiers.get(name) {
            None | Some(QuantityModifier::Identity) => native_data
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    Error::evaluation(requested, format!("native column '{}' was not read", name))
                }),
            Some(QuantityModifier::Rename(target)) => {
                self.evaluate_inner(requested, target, native_data, stack)
            }
            Some(QuantityModifier::Derived(d)) => {
                let mut args = Vec::with_capacity(d.sources.len());
                for source in &d.sources {
                    args.push(self.evaluate_inner(requested, source, native_data, stack)?);
                }
                (d.func)(&args).map_err(|e| Error::evaluation(requested, e.to_string()))
            }
        };
        stack.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs;
    use std::sync::Arc;

    fn native(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn native_passthrough_without_modifier_entry() {
        let modifiers = BTreeMap::new();
        let native = native(&["coord_ra"]);
        let resolver = QuantityResolver::new(&modifiers, &native);
        let needed = resolver.needed_native_quantities(["coord_ra"]).unwrap();
        assert!(needed.contains("coord_ra"));
    }

    #[test]
    fn rename_chain_resolves_transitively() {
        let mut modifiers = BTreeMap::new();
        modifiers.insert("ra".to_string(), QuantityModifier::Rename("ra_deg".into()));
        modifiers.insert(
            "ra_deg".to_string(),
            QuantityModifier::Rename("coord_ra".into()),
        );
        let native = native(&["coord_ra"]);
        let resolver = QuantityResolver::new(&modifiers, &native);
        let needed = resolver.needed_native_quantities(["ra"]).unwrap();
        assert_eq!(needed, ["coord_ra".to_string()].into_iter().collect());
    }

    #[test]
    fn rename_loop_is_a_configuration_error() {
        let mut modifiers = BTreeMap::new();
        modifiers.insert("a".to_string(), QuantityModifier::Rename("b".into()));
        modifiers.insert("b".to_string(), QuantityModifier::Rename("a".into()));
        let native = native(&[]);
        let resolver = QuantityResolver::new(&modifiers, &native);
        match resolver.needed_native_quantities(["a"]) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("circular")),
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unresolvable_name_is_a_configuration_error() {
        let modifiers = BTreeMap::new();
        let native = native(&["x"]);
        let resolver = QuantityResolver::new(&modifiers, &native);
        assert!(matches!(
            resolver.needed_native_quantities(["y"]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn derived_quantity_evaluates_over_homogenized_sources() {
        let mut modifiers = BTreeMap::new();
        modifiers.insert(
            "lum_v".to_string(),
            QuantityModifier::Rename("otherLuminosities/totalLuminositiesStellar:V".into()),
        );
        modifiers.insert(
            "lum_v_dust".to_string(),
            QuantityModifier::Rename("otherLuminosities/totalLuminositiesStellar:V:dust".into()),
        );
        modifiers.insert(
            "A_v".to_string(),
            QuantityModifier::derived(Arc::new(funcs::calc_av), ["lum_v", "lum_v_dust"]),
        );
        let native = native(&[
            "otherLuminosities/totalLuminositiesStellar:V",
            "otherLuminosities/totalLuminositiesStellar:V:dust",
        ]);
        let resolver = QuantityResolver::new(&modifiers, &native);

        let needed = resolver.needed_native_quantities(["A_v"]).unwrap();
        assert_eq!(needed.len(), 2);

        let mut data = HashMap::new();
        data.insert(
            "otherLuminosities/totalLuminositiesStellar:V".to_string(),
            Column::Float64(vec![1.0, 2.0]),
        );
        data.insert(
            "otherLuminosities/totalLuminositiesStellar:V:dust".to_string(),
            Column::Float64(vec![1.0, 1.0]),
        );
        match resolver.evaluate("A_v", &data).unwrap() {
            Column::Float64(v) => {
                assert!(v[0].abs() < 1e-12);
                assert!((v[1] - 0.7526).abs() < 1e-4);
            }
            other => panic!("expected float column, got {:?}", other),
        }
    }

    #[test]
    fn failing_derivation_names_the_quantity() {
        let mut modifiers = BTreeMap::new();
        // Wrong arity: calc_av needs two sources.
        modifiers.insert(
            "A_v".to_string(),
            QuantityModifier::derived(Arc::new(funcs::calc_av), ["lum_v"]),
        );
        let native = native(&["lum_v"]);
        let resolver = QuantityResolver::new(&modifiers, &native);
        let mut data = HashMap::new();
        data.insert("lum_v".to_string(), Column::Float64(vec![1.0]));
        match resolver.evaluate("A_v", &data) {
            Err(Error::QuantityEvaluation { quantity, .. }) => assert_eq!(quantity, "A_v"),
            other => panic!("expected evaluation error, got {:?}", other.map(|_| ())),
        }
    }
}
