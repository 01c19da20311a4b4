//! Series keys derived from sensor origin paths.
//!
//! A reading's origin path is the chain of names from the device identifier
//! down to the metric leaf, e.g. `["coretemp-isa-0000", "Package id 0",
//! "temp1_input"]`. Its key is the segments joined with `_`, with whitespace
//! and path separators replaced by `_`:
//!
//! ```text
//! coretemp-isa-0000_Package_id_0_temp1_input
//! ```
//!
//! Keys double as archive file names, so they are validated before they are
//! used to build a path.

use std::fmt;

use crate::error::StoreError;

/// Longest accepted key in bytes. Leaves room for the file extension.
const MAX_KEY_LEN: usize = 240;

/// Bus tokens dropped from device labels.
const BUS_TOKENS: [&str; 2] = ["isa", "pci"];

/// A validated series key.
///
/// # Examples
///
/// ```rust
/// use hwtrend::key::SeriesKey;
///
/// assert!(SeriesKey::parse("nct6775-isa-0290_fan1_input").is_ok());
/// assert!(SeriesKey::parse("../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey(String);

impl SeriesKey {
    /// Validates `key` for use as an archive file name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the key is empty, too long,
    /// `.`/`..`, or contains a path separator or control character.
    pub fn parse(key: &str) -> Result<Self, StoreError> {
        let reason = if key.is_empty() {
            Some("key is empty")
        } else if key.len() > MAX_KEY_LEN {
            Some("key is too long")
        } else if key == "." || key == ".." {
            Some("key is a relative path component")
        } else if key.contains(['/', '\\']) {
            Some("key contains a path separator")
        } else if key.chars().any(char::is_control) {
            Some("key contains a control character")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason,
            }),
            None => Ok(Self(key.to_string())),
        }
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SeriesKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of [`derive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// The series key.
    pub key: String,
    /// Human-readable device name.
    pub device_label: String,
}

/// Derives the series key and device label from an origin path.
///
/// Pure and deterministic: the same path always yields the same key.
///
/// # Examples
///
/// ```rust
/// use hwtrend::key::derive;
///
/// let derived = derive(&["nct6775-isa-0290", "fan1", "input"]);
/// assert_eq!(derived.key, "nct6775-isa-0290_fan1_input");
/// assert_eq!(derived.device_label, "Nct6775 0290");
/// ```
pub fn derive<S: AsRef<str>>(origin_path: &[S]) -> DerivedKey {
    let joined = origin_path
        .iter()
        .map(|segment| segment.as_ref())
        .collect::<Vec<&str>>()
        .join("_");

    let key = joined
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
        .collect();

    let device_label = origin_path
        .first()
        .map_or_else(String::new, |segment| device_label(segment.as_ref()));

    DerivedKey { key, device_label }
}

/// Human-readable label for a device identifier.
///
/// Splits on `-`, drops the bus tokens `isa`/`pci`, capitalizes each word.
/// Falls back to the raw identifier when nothing is left.
pub fn device_label(device: &str) -> String {
    let words: Vec<String> = device
        .split('-')
        .filter(|word| !word.is_empty())
        .filter(|word| !BUS_TOKENS.iter().any(|bus| word.eq_ignore_ascii_case(bus)))
        .map(capitalize)
        .collect();

    if words.is_empty() {
        device.to_string()
    } else {
        words.join(" ")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Device label of an existing key, taken from the text before the first `_`.
pub fn device_label_for_key(key: &str) -> String {
    device_label(device_prefix(key))
}

fn device_prefix(key: &str) -> &str {
    key.split_once('_').map_or(key, |(device, _)| device)
}

/// Short sensor name of an existing key.
///
/// Drops the device prefix and the trailing metric leaf (the last two
/// `_`-separated tokens, such as `temp1_input`), showing `_` as spaces.
///
/// ```rust
/// use hwtrend::key::short_name_for_key;
///
/// assert_eq!(short_name_for_key("coretemp-isa-0000_Package_id_0_temp1_input"), "Package id 0");
/// assert_eq!(short_name_for_key("nct6775-isa-0290_fan1_input"), "fan1 input");
/// ```
pub fn short_name_for_key(key: &str) -> String {
    let rest = key.split_once('_').map_or(key, |(_, rest)| rest);

    let tokens: Vec<&str> = rest.split('_').collect();
    let name = if tokens.len() > 2 {
        tokens[..tokens.len() - 2].join(" ")
    } else {
        tokens.join(" ")
    };

    if name.trim().is_empty() { rest.replace('_', " ") } else { name }
}
