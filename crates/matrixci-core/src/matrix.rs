//! Matrix expansion and `${{ matrix.KEY }}` interpolation.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::workflow::{Matrix, Strategy};

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*matrix\.([A-Za-z0-9_-]+)\s*\}\}").expect("static regex is valid")
    })
}

/// Matrix keys referenced by `${{ matrix.KEY }}` expressions in `text`.
pub fn matrix_references(text: &str) -> Vec<String> {
    reference_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Environment variable carrying matrix key `key`.
pub fn env_var_name(key: &str) -> String {
    let name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("MATRIX_{name}")
}

/// One expanded combination of matrix values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Position in expansion order.
    pub index: usize,
    pub values: BTreeMap<String, String>,
}

impl MatrixEntry {
    /// Human-readable label, e.g. `python-version=3.9`.
    pub fn label(&self) -> String {
        if self.values.is_empty() {
            return "default".to_string();
        }
        self.values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every `${{ matrix.KEY }}` in `text` with this entry's value.
    pub fn interpolate(&self, text: &str) -> Result<String> {
        let mut missing = None;
        let out = reference_regex().replace_all(text, |caps: &regex::Captures<'_>| {
            match self.values.get(&caps[1]) {
                Some(v) => v.clone(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(key) => Err(CoreError::UnknownMatrixKey {
                key,
                text: text.to_string(),
            }),
            None => Ok(out.into_owned()),
        }
    }

    /// Environment variables exposing the matrix to step commands:
    /// `python-version` becomes `MATRIX_PYTHON_VERSION`.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (env_var_name(k), v.clone()))
            .collect()
    }

    fn contains_all(&self, pairs: &BTreeMap<String, String>) -> bool {
        pairs.iter().all(|(k, v)| self.values.get(k) == Some(v))
    }
}

/// Expands a strategy into independent matrix entries.
pub struct MatrixExpander;

impl MatrixExpander {
    /// Cartesian product over axes (key order), values in declared order,
    /// minus excluded combinations. An empty matrix yields a single entry.
    pub fn expand(strategy: &Strategy) -> Result<Vec<MatrixEntry>> {
        let Matrix { axes, exclude } = &strategy.matrix;

        let mut combos: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
        for (key, values) in axes {
            if values.is_empty() {
                return Err(CoreError::InvalidWorkflow(format!(
                    "matrix key '{key}' has no values"
                )));
            }
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    values.iter().map(move |value| {
                        let mut next = combo.clone();
                        next.insert(key.clone(), value.to_string());
                        next
                    })
                })
                .collect();
        }

        let exclusions: Vec<BTreeMap<String, String>> = exclude
            .iter()
            .map(|e| e.iter().map(|(k, v)| (k.clone(), v.to_string())).collect())
            .collect();

        let entries: Vec<MatrixEntry> = combos
            .into_iter()
            .map(|values| MatrixEntry { index: 0, values })
            .filter(|entry| !exclusions.iter().any(|ex| entry.contains_all(ex)))
            .enumerate()
            .map(|(index, entry)| MatrixEntry { index, ..entry })
            .collect();

        if entries.is_empty() {
            return Err(CoreError::InvalidWorkflow(
                "matrix exclusions remove every combination".to_string(),
            ));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{MatrixValue, Workflow};

    fn strategy(axes: &[(&str, &[&str])]) -> Strategy {
        let mut s = Strategy::default();
        for (k, vs) in axes {
            s.matrix.axes.insert(
                k.to_string(),
                vs.iter().map(|v| MatrixValue::Str(v.to_string())).collect(),
            );
        }
        s
    }

    #[test]
    fn default_workflow_expands_to_two_versions() {
        let wf = Workflow::typecheck_default();
        let entries = MatrixExpander::expand(&wf.strategy).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].get("python-version"), Some("3.9"));
        assert_eq!(entries[1].get("python-version"), Some("3.13"));
        assert_eq!(entries[0].index, 0);
        assert_eq!(entries[1].index, 1);
    }

    #[test]
    fn empty_matrix_yields_single_entry() {
        let entries = MatrixExpander::expand(&Strategy::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].values.is_empty());
        assert_eq!(entries[0].label(), "default");
    }

    #[test]
    fn cartesian_product_in_key_order() {
        let s = strategy(&[("os", &["linux", "mac"]), ("py", &["3.9", "3.13"])]);
        let labels: Vec<String> = MatrixExpander::expand(&s)
            .unwrap()
            .iter()
            .map(|e| e.label())
            .collect();
        assert_eq!(
            labels,
            vec![
                "os=linux,py=3.9",
                "os=linux,py=3.13",
                "os=mac,py=3.9",
                "os=mac,py=3.13"
            ]
        );
    }

    #[test]
    fn exclusions_drop_matching_entries_and_reindex() {
        let mut s = strategy(&[("os", &["linux", "mac"]), ("py", &["3.9", "3.13"])]);
        let mut ex = BTreeMap::new();
        ex.insert("os".to_string(), MatrixValue::Str("mac".to_string()));
        ex.insert("py".to_string(), MatrixValue::Str("3.9".to_string()));
        s.matrix.exclude.push(ex);

        let entries = MatrixExpander::expand(&s).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.label() != "os=mac,py=3.9"));
        let indices: Vec<usize> = entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn excluding_everything_is_an_error() {
        let mut s = strategy(&[("py", &["3.9"])]);
        let mut ex = BTreeMap::new();
        ex.insert("py".to_string(), MatrixValue::Str("3.9".to_string()));
        s.matrix.exclude.push(ex);
        assert!(MatrixExpander::expand(&s).is_err());
    }

    #[test]
    fn interpolate_replaces_references() {
        let s = strategy(&[("python-version", &["3.13"])]);
        let entry = &MatrixExpander::expand(&s).unwrap()[0];
        assert_eq!(
            entry
                .interpolate("python${{ matrix.python-version }} -m venv .venv")
                .unwrap(),
            "python3.13 -m venv .venv"
        );
        assert_eq!(
            entry.interpolate("${{matrix.python-version}}").unwrap(),
            "3.13"
        );
        assert_eq!(entry.interpolate("no refs").unwrap(), "no refs");
    }

    #[test]
    fn interpolate_unknown_key_errors() {
        let entry = &MatrixExpander::expand(&Strategy::default()).unwrap()[0];
        let err = entry.interpolate("${{ matrix.os }}").unwrap_err();
        assert!(matches!(err, CoreError::UnknownMatrixKey { key, .. } if key == "os"));
    }

    #[test]
    fn env_vars_are_upper_snake() {
        let s = strategy(&[("python-version", &["3.9"])]);
        let entry = &MatrixExpander::expand(&s).unwrap()[0];
        let env = entry.env_vars();
        assert_eq!(env.get("MATRIX_PYTHON_VERSION").map(String::as_str), Some("3.9"));
    }

    #[test]
    fn references_are_collected() {
        let refs = matrix_references("a ${{ matrix.x }} b ${{matrix.y-z}}");
        assert_eq!(refs, vec!["x".to_string(), "y-z".to_string()]);
    }
}
