//! Persisted chart/UI state.
//!
//! The document is opaque to hwtrend: whatever JSON the UI posts is stored
//! and handed back verbatim. Writes go to a temporary file that is renamed
//! over the target; the last writer wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{ChartStateError, Result};

/// In-memory copy of the chart state file, shared by request handlers.
#[derive(Debug)]
pub struct ChartState {
    path: PathBuf,
    value: RwLock<Value>,
}

impl ChartState {
    /// Loads the state from `path`.
    ///
    /// A missing file yields an empty object. An unreadable or invalid file
    /// also yields an empty object, with a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();

        let value = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring invalid chart state");
                empty()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => empty(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable chart state");
                empty()
            }
        };

        Self {
            path,
            value: RwLock::new(value),
        }
    }

    /// A copy of the current document.
    pub fn get(&self) -> Value {
        self.value.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the document and persists it.
    ///
    /// The in-memory copy is only updated once the file was written.
    ///
    /// # Errors
    ///
    /// Returns [`ChartStateError`] if the document cannot be written.
    pub fn replace(&self, value: Value) -> Result<()> {
        let mut current = self.value.write().unwrap_or_else(PoisonError::into_inner);
        self.save(&value)?;
        *current = value;
        debug!(path = %self.path.display(), "chart state saved");
        Ok(())
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, value: &Value) -> Result<()> {
        let save_failed = |source| ChartStateError::Save {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(save_failed)?;
        }

        let contents = serde_json::to_vec(value).map_err(|source| ChartStateError::Serialize { source })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, contents).map_err(save_failed)?;
        fs::rename(&tmp, &self.path).map_err(save_failed)?;
        Ok(())
    }
}

fn empty() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_missing_file_is_empty_object() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = ChartState::load(temp_dir.path().join("chart_state.json"));
        assert_eq!(state.get(), json!({}));
    }

    #[test]
    fn test_corrupt_file_is_empty_object() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("chart_state.json");
        fs::write(&path, "{ broken").unwrap();

        let state = ChartState::load(&path);
        assert_eq!(state.get(), json!({}));
    }

    #[test]
    fn test_replace_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("static").join("chart_state.json");

        let state = ChartState::load(&path);
        let doc = json!({"temperature": {"hidden": ["coretemp-isa-0000_Core_0_temp2_input"]}, "range": "6h"});
        state.replace(doc.clone()).unwrap();
        assert_eq!(state.get(), doc);

        let reloaded = ChartState::load(&path);
        assert_eq!(reloaded.get(), doc);

        // Last writer wins, even for a non-object document
        state.replace(json!([1, 2, 3])).unwrap();
        assert_eq!(ChartState::load(&path).get(), json!([1, 2, 3]));
        assert!(!temp_dir.path().join("static").join("chart_state.json.tmp").exists());
    }
}
