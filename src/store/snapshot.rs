//! YAML snapshots of an [`InMemoryStore`], read and written through the
//! `FileSystem` port.

use std::path::Path;

use super::memory::{InMemoryStore, StoreState};
use crate::error::{Error, Result};
use crate::ports::FileSystem;

/// Loads a store from `path`, or returns an empty store if the file is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<InMemoryStore> {
    if !fs.exists(path) {
        tracing::debug!(path = %path.display(), "no snapshot yet, starting empty");
        return Ok(InMemoryStore::new());
    }
    let contents = fs.read_to_string(path).map_err(|e| {
        Error::storage_with_source(format!("failed to read snapshot {}", path.display()), e)
    })?;
    let state: StoreState = serde_yaml::from_str(&contents).map_err(|e| {
        Error::storage_with_source(format!("failed to parse snapshot {}", path.display()), e)
    })?;
    Ok(InMemoryStore::from_state(state))
}

/// Writes the full store state to `path`.
///
/// # Errors
///
/// Returns an error if serialisation or the write fails.
pub fn save(fs: &dyn FileSystem, path: &Path, store: &InMemoryStore) -> Result<()> {
    let state = store.snapshot()?;
    let yaml = serde_yaml::to_string(&state)
        .map_err(|e| Error::storage_with_source("failed to serialize snapshot", e))?;
    fs.write_atomic(path, &yaml).map_err(|e| {
        Error::storage_with_source(format!("failed to write snapshot {}", path.display()), e)
    })?;
    tracing::debug!(path = %path.display(), tasks = state.tasks.len(), "snapshot saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use crate::model::task::fixtures::task;
    use crate::model::TaskId;
    use crate::store::{ChangeSet, WorkGraphStore};

    /// In-memory filesystem for testing snapshots without touching disk.
    struct MemFs {
        files: Mutex<HashMap<PathBuf, String>>,
    }

    impl MemFs {
        fn new() -> Self {
            Self { files: Mutex::new(HashMap::new()) }
        }
    }

    impl FileSystem for MemFs {
        fn read_to_string(
            &self,
            path: &Path,
        ) -> std::result::Result<String, Box<dyn std::error::Error + Send + Sync>> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| format!("not found: {}", path.display()).into())
        }

        fn write_atomic(
            &self,
            path: &Path,
            contents: &str,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.files.lock().unwrap().insert(path.to_path_buf(), contents.to_string());
            Ok(())
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }
    }

    #[test]
    fn missing_snapshot_yields_empty_store() {
        let fs = MemFs::new();
        let store = load(&fs, Path::new("/state.yaml")).unwrap();
        assert!(store.snapshot().unwrap().tasks.is_empty());
    }

    #[test]
    fn saved_tasks_survive_reload() {
        let fs = MemFs::new();
        let path = Path::new("/state.yaml");
        let store = InMemoryStore::new();
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
        store
            .apply(ChangeSet { tasks: vec![task("A", start, end)], ..ChangeSet::default() })
            .unwrap();

        save(&fs, path, &store).unwrap();
        let reloaded = load(&fs, path).unwrap();

        let loaded = reloaded.task(&TaskId::new("A")).unwrap().unwrap();
        assert_eq!(loaded.current_end, end);
    }

    #[test]
    fn corrupt_snapshot_is_a_storage_error() {
        let fs = MemFs::new();
        let path = Path::new("/state.yaml");
        fs.write_atomic(path, "tasks: [not, a, map").unwrap();
        let err = load(&fs, path).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }
}
