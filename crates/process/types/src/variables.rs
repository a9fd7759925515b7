//! Variable scopes: the per-execution key/value store
//!
//! A scope only holds the variables set locally on one execution.
//! Lookups that fall back through parent executions are performed by
//! [`ExecutionTree`](crate::ExecutionTree), which owns the parent links.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A process variable value
pub type VariableValue = serde_json::Value;

/// Flattened view of variables, ordered by name
pub type VariableMap = BTreeMap<String, VariableValue>;

/// Local variables of one execution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableScope {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    variables: VariableMap,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(variables: VariableMap) -> Self {
        Self { variables }
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Set a variable, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: VariableValue) -> Option<VariableValue> {
        self.variables.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<VariableValue> {
        self.variables.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableValue)> {
        self.variables.iter()
    }

    pub fn as_map(&self) -> &VariableMap {
        &self.variables
    }

    /// Read an integer variable, accepting numeric strings
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.variables.get(name).and_then(as_i64)
    }
}

/// Interpret a value as an integer, accepting numbers and numeric strings
pub fn as_i64(value: &VariableValue) -> Option<i64> {
    match value {
        VariableValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        VariableValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
