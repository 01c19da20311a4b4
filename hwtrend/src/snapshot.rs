//! Sensor snapshots as ordered trees of numeric readings.
//!
//! A snapshot mirrors the nesting of `sensors -j` output: devices contain
//! feature groups which contain numeric leaves. Non-numeric values such as
//! `"Adapter": "ISA adapter"` carry no reading and are dropped on parse.

use serde_json::Value;

use crate::error::{CollectorError, Result};

/// One node of a snapshot tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// A numeric reading.
    Leaf(f64),
    /// Named children, ordered by name.
    Group(Vec<(String, Snapshot)>),
}

impl Snapshot {
    /// Builds a snapshot from a parsed JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::UnexpectedShape`] if the root is not an
    /// object.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(_) => Ok(Self::from_value(value).unwrap_or(Self::Group(Vec::new()))),
            other => Err(CollectorError::UnexpectedShape {
                reason: format!("expected an object at the root, found {}", json_kind(other)),
            }
            .into()),
        }
    }

    /// Parses raw JSON text into a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Malformed`] for invalid JSON and
    /// [`CollectorError::UnexpectedShape`] for a non-object root.
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|source| CollectorError::Malformed { source })?;
        Self::from_json(&value)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Leaf),
            Value::Object(map) => Some(Self::Group(
                map.iter()
                    .filter_map(|(name, child)| Self::from_value(child).map(|node| (name.clone(), node)))
                    .collect(),
            )),
            _ => None,
        }
    }

    /// Visits every leaf depth-first in key order, with its origin path.
    ///
    /// Walks with an explicit stack, so deeply nested input cannot overflow
    /// the call stack.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hwtrend::snapshot::Snapshot;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let snapshot = Snapshot::parse(r#"{"acpitz-acpi-0": {"Adapter": "ACPI interface", "temp1": {"temp1_input": 27.8}}}"#)?;
    /// let mut leaves = Vec::new();
    /// snapshot.walk(|path, value| leaves.push((path.join("/"), value)));
    /// assert_eq!(leaves, vec![("acpitz-acpi-0/temp1/temp1_input".to_string(), 27.8)]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&[&str], f64),
    {
        let mut path: Vec<&str> = Vec::new();
        // (depth of the node, name, node)
        let mut stack: Vec<(usize, Option<&str>, &Snapshot)> = vec![(0, None, self)];

        while let Some((depth, name, node)) = stack.pop() {
            path.truncate(depth);
            if let Some(name) = name {
                path.push(name);
            }

            match node {
                Snapshot::Leaf(value) => visit(&path, *value),
                Snapshot::Group(children) => {
                    let child_depth = path.len();
                    for (child_name, child) in children.iter().rev() {
                        stack.push((child_depth, Some(child_name.as_str()), child));
                    }
                }
            }
        }
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.walk(|_, _| count += 1);
        count
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
