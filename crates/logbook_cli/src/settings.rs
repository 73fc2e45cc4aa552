//! Settings persisted as a flat JSON object.

use logbook_core::{ControllerError, ControllerResult, Persistence};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Key/value settings backed by a JSON file.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonSettings {
    /// Opens `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> ControllerResult<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|err| {
                ControllerError::Settings(format!("{}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(path = %path.display(), count = values.len(), "settings loaded");

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn save(&self, values: &BTreeMap<String, String>) -> ControllerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Persistence for JsonSettings {
    fn rebuild_indexes(&self) -> ControllerResult<()> {
        let values = self.values.lock();
        self.save(&values)?;
        tracing::debug!(path = %self.path.display(), "settings compacted");
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn put_setting(&self, key: &str, value: &str) -> ControllerResult<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn settings_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        {
            let settings = JsonSettings::open(&path).unwrap();
            assert!(settings.get_setting("current_commander").is_none());
            settings.put_setting("current_commander", "3").unwrap();
        }

        let settings = JsonSettings::open(&path).unwrap();
        assert_eq!(settings.get_setting("current_commander").as_deref(), Some("3"));
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = JsonSettings::open(&path).unwrap();
        settings.rebuild_indexes().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn malformed_file_is_a_settings_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "[1, 2").unwrap();

        let err = JsonSettings::open(&path).unwrap_err();
        assert!(matches!(err, ControllerError::Settings(_)));
    }
}
