use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::models::StateSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read state from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("state file {path} is corrupt: {source}")]
    Corrupt { path: PathBuf, source: serde_json::Error },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write state to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Storage for the state snapshot. The snapshot is always read and replaced
/// as a whole.
pub trait StateStore: Send + Sync {
    /// Load the last persisted snapshot; `Ok(None)` when nothing was ever written
    fn load(&self) -> Result<Option<StateSnapshot>, StoreError>;

    /// Replace the persisted snapshot. Either the new snapshot is fully
    /// visible afterwards or the previous one is left untouched.
    fn persist(&self, snapshot: &StateSnapshot) -> Result<(), StoreError>;
}

/// JSON file replaced via write-to-temp, fsync, rename
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_temp(&self, temp: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = File::create(temp)?;
        file.write_all(contents)?;
        file.sync_all()
    }
}

/// Make a completed rename durable
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<StateSnapshot>, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path: self.path.clone(), source }),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path: self.path.clone(), source })
    }

    fn persist(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| StoreError::Write { path: parent.to_path_buf(), source })?;
        }

        let temp = self.temp_path();
        if let Err(source) = self.write_temp(&temp, &contents) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::Write { path: temp, source });
        }

        if let Err(source) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::Write { path: self.path.clone(), source });
        }

        sync_parent_dir(&self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::HostStatus;
    use crate::state::models::{HostState, MessageKind, PendingMessage};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn sample_snapshot() -> StateSnapshot {
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let at = day.and_hms_opt(9, 15, 0).unwrap();

        let mut snapshot = StateSnapshot::default();
        snapshot.hosts.insert(
            "Google-DNS".into(),
            HostState {
                consecutive_failures: 4,
                status: HostStatus::Down,
                daily_down_seconds: 180,
                last_change: Some(at),
                first_failure_at: Some(at),
                last_latency_ms: None,
            },
        );
        snapshot.hosts.insert(
            "Gateway".into(),
            HostState { last_latency_ms: Some(0.5), ..Default::default() },
        );
        snapshot.isp_outage.active = true;
        snapshot.isp_outage.started_at = Some(at);
        snapshot.daily_summary.last_report_date = Some(day);
        snapshot.daily_summary.last_report_posted = true;
        snapshot.outbox.push(PendingMessage::new(MessageKind::DailySummary { date: day }, "report".into(), at));
        snapshot
    }

    #[test]
    fn test_missing_file_is_cold_start() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        let snapshot = sample_snapshot();

        store.persist(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{\"hosts\": {\"Gateway\": ").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_unknown_and_missing_fields_are_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            br#"{
                "hosts": {
                    "Gateway": {
                        "consecutive_failures": 1,
                        "status": "up",
                        "daily_down_seconds": 0,
                        "last_change": null,
                        "jitter_ms": 3.5
                    }
                },
                "schema_version": 7
            }"#,
        )
        .unwrap();

        let snapshot = JsonFileStore::new(&path).load().unwrap().unwrap();
        assert_eq!(snapshot.hosts["Gateway"].consecutive_failures, 1);
        assert!(!snapshot.isp_outage.active);
        assert!(snapshot.outbox.is_empty());
    }

    #[test]
    fn test_failed_write_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let original = sample_snapshot();
        store.persist(&original).unwrap();

        // A directory squatting on the temp path makes the write fail
        fs::create_dir(store.temp_path()).unwrap();

        let result = store.persist(&StateSnapshot::default());
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert_eq!(store.load().unwrap(), Some(original));
    }
}
