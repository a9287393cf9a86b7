//! Durable key/value storage for run checkpoints.
//!
//! The run-state machine writes its whole state after every step, so a run
//! interrupted between ticks resumes exactly where it stopped. Two stores
//! are provided:
//!
//! - `MemoryCheckpointStore`: process-local, for tests and embedding
//! - `FileCheckpointStore`: one JSON file per key, written atomically
//!
//! ## Run State Format
//!
//! The run state is stored under `RUN_STATE_KEY` as a JSON envelope:
//!
//! ```text
//! { "version": 1, "state": { "offset": 0, "queue": [...], ... } }
//! ```
//!
//! An envelope that does not parse, or that carries another version, is
//! rejected so the caller can rebuild the run instead of trusting its shape.

use crate::error::{Result, SyncError};
use crate::types::{RunState, SyncReport};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Key holding the run state of the run in progress
pub const RUN_STATE_KEY: &str = "sync_state";
/// Key holding the timestamp of the last run start
pub const LAST_SYNC_KEY: &str = "last_sync";
/// Key holding the report of the last completed run
pub const LAST_REPORT_KEY: &str = "last_sync_report";
/// Marker set when an upgrade requires a full sync
pub const NEEDS_UPGRADE_KEY: &str = "needs_upgrade_sync";
/// Marker set when a feature was activated that requires a full sync
pub const FEATURE_AUTO_ACTIVATED_KEY: &str = "feature_auto_activated_sync";

/// Current run state format version
pub const STATE_VERSION: u32 = 1;

/// Durable key/value store.
///
/// Implementations must make `set` durable before returning: the caller
/// treats a successful `set` as a completed checkpoint.
pub trait CheckpointStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// Run state as stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct StoredRunState {
    version: u32,
    state: RunState,
}

/// Borrowed form of `StoredRunState` used for writing
#[derive(Serialize)]
struct StoredRunStateRef<'a> {
    version: u32,
    state: &'a RunState,
}

/// Load the checkpointed run state, if any.
pub fn load_run_state(store: &dyn CheckpointStore) -> Result<Option<RunState>> {
    let Some(raw) = store.get(RUN_STATE_KEY)? else {
        return Ok(None);
    };

    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| SyncError::CheckpointCorrupted {
            reason: format!("Failed to parse run state: {}", e),
        })?;

    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| SyncError::CheckpointCorrupted {
            reason: "Missing run state version".to_string(),
        })?;
    if version != u64::from(STATE_VERSION) {
        return Err(SyncError::CheckpointVersionMismatch {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            expected: STATE_VERSION,
        });
    }

    let stored: StoredRunState =
        serde_json::from_value(value).map_err(|e| SyncError::CheckpointCorrupted {
            reason: format!("Invalid run state: {}", e),
        })?;

    debug!(
        queue = stored.state.queue.len(),
        offset = stored.state.offset,
        "Loaded run state checkpoint"
    );
    Ok(Some(stored.state))
}

/// Persist the run state.
pub fn save_run_state(store: &dyn CheckpointStore, state: &RunState) -> Result<()> {
    let encoded = serde_json::to_string(&StoredRunStateRef {
        version: STATE_VERSION,
        state,
    })?;
    store.set(RUN_STATE_KEY, &encoded)
}

/// Remove the checkpointed run state.
pub fn clear_run_state(store: &dyn CheckpointStore) -> Result<()> {
    store.delete(RUN_STATE_KEY)
}

/// Record the start time of a run.
pub fn save_last_sync(store: &dyn CheckpointStore, at: DateTime<Utc>) -> Result<()> {
    store.set(LAST_SYNC_KEY, &at.to_rfc3339())
}

/// Read the start time of the last run, if any.
pub fn load_last_sync(store: &dyn CheckpointStore) -> Result<Option<DateTime<Utc>>> {
    store
        .get(LAST_SYNC_KEY)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| SyncError::serialization(format!("Invalid last sync time: {}", e)))
        })
        .transpose()
}

/// Persist the report of a completed run.
pub fn save_report(store: &dyn CheckpointStore, report: &SyncReport) -> Result<()> {
    store.set(LAST_REPORT_KEY, &serde_json::to_string(report)?)
}

/// Read the report of the last completed run, if any.
pub fn load_report(store: &dyn CheckpointStore) -> Result<Option<SyncReport>> {
    store
        .get(LAST_REPORT_KEY)?
        .map(|raw| serde_json::from_str(&raw).map_err(SyncError::from))
        .transpose()
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    values: DashMap<String, String>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// File-backed store: each key is one `<key>.json` file in a directory.
///
/// ## Example
///
/// ```rust,ignore
/// use fullsync_core::checkpoint::{CheckpointStore, FileCheckpointStore};
///
/// let store = FileCheckpointStore::new("./state");
/// store.set("last_sync", "2024-01-01T00:00:00Z")?;
/// ```
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    /// Directory holding one file per key
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `base_dir`.
    ///
    /// The directory is created on first write.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        FileCheckpointStore {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the checkpoint files
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the file holding `key`
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(SyncError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.base_dir.join(format!("{}.json", key)))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        fs::create_dir_all(&self.base_dir)?;

        // Write to temp, then rename over the target
        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;

        debug!(key, path = %path.display(), "Checkpoint written");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(key, "Checkpoint removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SyncArgs, WorkItem};
    use tempfile::TempDir;

    fn sample_state() -> RunState {
        let mut state = RunState::new(SyncArgs::default().with_put_mapping(true));
        state.queue.push_back(WorkItem::global("user", true));
        state.offset = 700;
        state.found_items = 1200;
        state
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.delete("a").unwrap();
        store.delete("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path().join("state"));

        assert_eq!(store.get(RUN_STATE_KEY).unwrap(), None);
        store.set(RUN_STATE_KEY, "{}").unwrap();
        assert_eq!(store.get(RUN_STATE_KEY).unwrap().as_deref(), Some("{}"));
        assert!(!temp_dir.path().join("state/sync_state.json.tmp").exists());

        store.delete(RUN_STATE_KEY).unwrap();
        assert_eq!(store.get(RUN_STATE_KEY).unwrap(), None);
        store.delete(RUN_STATE_KEY).unwrap();
    }

    #[test]
    fn test_file_store_rejects_bad_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());

        assert!(matches!(
            store.set("../escape", "x"),
            Err(SyncError::InvalidKey { .. })
        ));
        assert!(matches!(store.get(""), Err(SyncError::InvalidKey { .. })));
    }

    #[test]
    fn test_run_state_persistence() {
        let store = MemoryCheckpointStore::new();
        assert!(load_run_state(&store).unwrap().is_none());

        let state = sample_state();
        save_run_state(&store, &state).unwrap();
        assert_eq!(load_run_state(&store).unwrap(), Some(state));

        clear_run_state(&store).unwrap();
        assert!(load_run_state(&store).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_state_is_rejected() {
        let store = MemoryCheckpointStore::new();
        store.set(RUN_STATE_KEY, "{not json").unwrap();
        let err = load_run_state(&store).unwrap_err();
        assert!(err.requires_rebuild());

        store
            .set(RUN_STATE_KEY, r#"{"version":1,"state":{"offset":"ten"}}"#)
            .unwrap();
        let err = load_run_state(&store).unwrap_err();
        assert!(matches!(err, SyncError::CheckpointCorrupted { .. }));
    }

    #[test]
    fn test_version_mismatch() {
        let store = MemoryCheckpointStore::new();
        store.set(RUN_STATE_KEY, r#"{"version":7,"state":{}}"#).unwrap();
        let err = load_run_state(&store).unwrap_err();
        assert!(matches!(
            err,
            SyncError::CheckpointVersionMismatch {
                found: 7,
                expected: STATE_VERSION
            }
        ));
    }

    #[test]
    fn test_last_sync_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(load_last_sync(&store).unwrap().is_none());

        let now = Utc::now();
        save_last_sync(&store, now).unwrap();
        assert_eq!(load_last_sync(&store).unwrap(), Some(now));
    }
}
