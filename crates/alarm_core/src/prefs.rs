use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;

use crate::{error::PreferenceError, platform::PreferenceStore};

/// Preferences held in memory, as written by the host application.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_string(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.values.read().get(key).cloned())
    }
}

/// Reads a flat JSON object from disk on every lookup so edits made after an
/// alarm was scheduled are seen when it fires.
#[derive(Debug, Clone)]
pub struct JsonPreferenceStore {
    path: PathBuf,
}

impl JsonPreferenceStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let values: HashMap<String, Value> = serde_json::from_str(&raw)?;
        Ok(values.get(key).and_then(Value::as_str).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn json_store_observes_edits_between_lookups() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("prefs.json");
        let store = JsonPreferenceStore::new(&path);
        assert_eq!(store.get_string("flutter.candle_lighting_sound").unwrap(), None);

        fs::write(&path, r#"{"flutter.candle_lighting_sound": "yomtov_default"}"#).unwrap();
        assert_eq!(
            store.get_string("flutter.candle_lighting_sound").unwrap().as_deref(),
            Some("yomtov_default")
        );

        fs::write(&path, r#"{"flutter.candle_lighting_sound": "silent", "flutter.count": 3}"#)
            .unwrap();
        assert_eq!(
            store.get_string("flutter.candle_lighting_sound").unwrap().as_deref(),
            Some("silent")
        );
        assert_eq!(store.get_string("flutter.count").unwrap(), None);
    }

    #[test]
    fn json_store_reports_malformed_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("prefs.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            JsonPreferenceStore::new(&path).get_string("any"),
            Err(PreferenceError::Format(_))
        ));
    }
}
