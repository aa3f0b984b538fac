use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::watch_types::PersistedState;

/// Reasons a state file could not be used; the run continues with empty state
#[derive(thiserror::Error, Debug)]
pub enum StoreWarning {
    /// No state file yet
    #[error("state file {0} not found")]
    Missing(PathBuf),

    /// The file exists but could not be read
    #[error("state file unreadable: {0}")]
    Unreadable(io::Error),

    /// The file is not valid state JSON
    #[error("state file corrupt: {0}")]
    Corrupt(serde_json::Error),
}

/// Flat JSON file holding the persisted state
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state, reporting why it could not be used
    pub fn try_load(&self) -> Result<PersistedState, StoreWarning> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreWarning::Missing(self.path.clone()));
            }
            Err(e) => return Err(StoreWarning::Unreadable(e)),
        };

        serde_json::from_slice(&bytes).map_err(StoreWarning::Corrupt)
    }

    /// Read the state, falling back to an empty one
    pub fn load(&self) -> PersistedState {
        match self.try_load() {
            Ok(state) => {
                debug!(
                    "Loaded state: {} tracked, {} history entries",
                    state.tracked.len(),
                    state.history.len()
                );
                state
            }
            Err(warning) => {
                warn!("{}, starting from empty state", warning);
                PersistedState::default()
            }
        }
    }

    /// Write the state atomically: temp file in the same directory, then rename
    pub fn save(&self, state: &PersistedState) -> io::Result<()> {
        let mut json = serde_json::to_vec_pretty(state).map_err(io::Error::other)?;
        json.push(b'\n');

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&json)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        debug!("State written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use shop_api::{Availability, ProductSnapshot};

    use super::*;

    fn sample_state() -> PersistedState {
        let mut state = PersistedState::default();
        state.tracked.insert(
            "rose-lassi".to_string(),
            ProductSnapshot {
                alias: "rose-lassi".to_string(),
                available: Availability::Available,
                inventory_quantity: Some(3),
                price: Some(600.5),
                observed_at: "2025-08-01T10:00:00.123456Z".parse().unwrap(),
            },
        );
        state.tracked.insert(
            "paneer".to_string(),
            ProductSnapshot::unknown("paneer", "2025-08-01T10:00:00Z".parse().unwrap()),
        );
        state
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        assert!(matches!(store.try_load(), Err(StoreWarning::Missing(_))));
        assert_eq!(store.load(), PersistedState::default());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{\"tracked\": {\"rose-lassi\": ").unwrap();
        let store = StateStore::new(&path);

        assert!(matches!(store.try_load(), Err(StoreWarning::Corrupt(_))));
        assert_eq!(store.load(), PersistedState::default());
    }

    #[test]
    fn test_save_load_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);

        store.save(&sample_state()).unwrap();
        let first = fs::read(&path).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, sample_state());

        store.save(&loaded).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
                "schema": 7,
                "tracked": {
                    "rose-lassi": {
                        "alias": "rose-lassi",
                        "available": false,
                        "inventory_quantity": 0,
                        "price": 600,
                        "observed_at": "2025-08-01T10:00:00Z",
                        "seller": "amul"
                    }
                },
                "history": [
                    {"alias": "rose-lassi", "observed_at": "2025-07-30T08:00:00Z", "channel": "sms"}
                ]
            }"#,
        )
        .unwrap();

        let state = StateStore::new(&path).try_load().unwrap();
        let snapshot = &state.tracked["rose-lassi"];

        assert_eq!(snapshot.available, Availability::Unavailable);
        assert_eq!(snapshot.inventory_quantity, Some(0));
        assert_eq!(snapshot.price, Some(600.0));
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].reason.is_none());
    }

    #[test]
    fn test_save_creates_parent_directory_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = StateStore::new(&path);

        store.save(&sample_state()).unwrap();

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
    }
}
