//! Sensor type classification by key pattern.
//!
//! Types are declared in a JSON rules file:
//!
//! ```json
//! {
//!   "types": {
//!     "temperature": { "matches": ["temp\\d+_input"], "name": "Temperature", "unit": "°C" },
//!     "fan":         { "matches": ["fan\\d+_input"],  "name": "Fans", "unit": " RPM" }
//!   }
//! }
//! ```
//!
//! Declaration order is significant: a key belongs to the first type with a
//! pattern that matches anywhere in it. Keys matching nothing have no type.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConfigError, Result};

/// One configured sensor type.
#[derive(Debug, Clone)]
pub struct TypeRule {
    /// Type identifier, e.g. `temperature`.
    pub name: String,
    /// Display title; the identifier if not configured.
    pub title: String,
    /// Display unit appended to values.
    pub unit: Option<String>,
    /// Suggested lower bound of the chart axis.
    pub min: Option<f64>,
    /// Suggested upper bound of the chart axis.
    pub max: Option<f64>,
    patterns: Vec<Regex>,
}

impl TypeRule {
    /// Returns true if any pattern matches somewhere in `key`.
    pub fn matches(&self, key: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(key))
    }
}

#[derive(Debug, Deserialize)]
struct RawType {
    matches: Vec<String>,
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

/// Map of type name to definition that keeps document order.
struct OrderedTypes(Vec<(String, RawType)>);

impl<'de> Deserialize<'de> for OrderedTypes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = OrderedTypes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of sensor type definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, RawType>()? {
                    entries.push(entry);
                }
                Ok(OrderedTypes(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[derive(Deserialize)]
struct RulesFile {
    types: OrderedTypes,
}

/// Ordered set of sensor type rules.
///
/// # Examples
///
/// ```rust
/// use hwtrend::classify::TypeRules;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rules = TypeRules::from_json(r#"{"types": {"temperature": {"matches": ["temp\\d+_input"]}}}"#)?;
/// assert_eq!(rules.classify("coretemp_Package_id_0_temp1_input"), Some("temperature"));
/// assert_eq!(rules.classify("nct6775-isa-0290_fan1_input"), None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TypeRules {
    rules: Vec<TypeRule>,
}

impl TypeRules {
    /// Loads rules from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parses rules from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON,
    /// [`ConfigError::InvalidPattern`] for a bad regular expression and
    /// [`ConfigError::NoTypes`] if no type is declared.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: RulesFile = serde_json::from_str(json).map_err(|source| ConfigError::Parse { source })?;

        if file.types.0.is_empty() {
            return Err(ConfigError::NoTypes.into());
        }

        let rules = file
            .types
            .0
            .into_iter()
            .map(|(name, raw)| {
                let patterns = raw
                    .matches
                    .iter()
                    .map(|pattern| {
                        Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                            type_name: name.clone(),
                            pattern: pattern.clone(),
                            source,
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                Ok(TypeRule {
                    title: raw.title.unwrap_or_else(|| name.clone()),
                    name,
                    unit: raw.unit,
                    min: raw.min,
                    max: raw.max,
                    patterns,
                })
            })
            .collect::<std::result::Result<Vec<_>, ConfigError>>()?;

        Ok(Self { rules })
    }

    /// Type of `key`: the first type, in declaration order, with a matching
    /// pattern.
    pub fn classify(&self, key: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(key))
            .map(|rule| rule.name.as_str())
    }

    /// Rule for a type name.
    pub fn get(&self, name: &str) -> Option<&TypeRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// All rules in declaration order.
    pub fn rules(&self) -> &[TypeRule] {
        &self.rules
    }

    /// Groups keys by type. Every configured type gets an entry, possibly
    /// empty; keys without a type are left out.
    pub fn group<I, S>(&self, keys: I) -> TypeIndex
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members: BTreeMap<String, Vec<String>> = self
            .rules
            .iter()
            .map(|rule| (rule.name.clone(), Vec::new()))
            .collect();

        for key in keys {
            let key = key.as_ref();
            if let Some(list) = self.classify(key).and_then(|name| members.get_mut(name)) {
                list.push(key.to_string());
            }
        }

        for list in members.values_mut() {
            list.sort();
            list.dedup();
        }

        TypeIndex { members }
    }
}

/// Keys grouped by type. Derived from the current key set and never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeIndex {
    members: BTreeMap<String, Vec<String>>,
}

impl TypeIndex {
    /// Sorted keys of a type, `None` if the type is not configured.
    pub fn members(&self, type_name: &str) -> Option<&[String]> {
        self.members.get(type_name).map(Vec::as_slice)
    }

    /// Number of keys of a type (zero for unknown types).
    pub fn count(&self, type_name: &str) -> usize {
        self.members.get(type_name).map_or(0, Vec::len)
    }

    /// Iterates `(type, keys)` in type-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.members.iter().map(|(name, keys)| (name.as_str(), keys.as_slice()))
    }
}
