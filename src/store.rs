//! Live-timings persistence.
//!
//! Persistence is a best-effort latest-snapshot: after every broadcast the
//! dispatcher schedules a flush of the current driver table, and on a new
//! session with matching identifiers the snapshot is merged back so lap
//! data survives a restart mid-event.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::Driver;
use crate::events::{DriverGuid, SessionType};

/// Errors from the live-timings store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The persisted live-timings snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveTimingsSnapshot {
    pub session_type: SessionType,
    pub track: String,
    pub track_layout: String,
    pub session_name: String,
    pub drivers: HashMap<DriverGuid, Driver>,
}

impl LiveTimingsSnapshot {
    /// True when this snapshot was taken in a session with the same
    /// identifying tuple.
    pub fn matches(
        &self,
        session_type: SessionType,
        track: &str,
        track_layout: &str,
        session_name: &str,
    ) -> bool {
        self.session_type == session_type
            && self.track == track
            && self.track_layout == track_layout
            && self.session_name == session_name
    }
}

/// Persistence collaborator for live-timings snapshots.
pub trait Store: Send + Sync {
    /// Loads the most recent snapshot, or `None` if nothing was persisted.
    fn load_live_timings(&self) -> Result<Option<LiveTimingsSnapshot>, StoreError>;

    /// Replaces the persisted snapshot.
    fn upsert_live_timings(&self, snapshot: &LiveTimingsSnapshot) -> Result<(), StoreError>;
}

/// In-memory store, for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RwLock<Option<LiveTimingsSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load_live_timings(&self) -> Result<Option<LiveTimingsSnapshot>, StoreError> {
        self.snapshot
            .read()
            .map(|snapshot| snapshot.clone())
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn upsert_live_timings(&self, snapshot: &LiveTimingsSnapshot) -> Result<(), StoreError> {
        let mut slot = self
            .snapshot
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }
}

/// Store that keeps the snapshot as a JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Store for JsonFileStore {
    fn load_live_timings(&self) -> Result<Option<LiveTimingsSnapshot>, StoreError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn upsert_live_timings(&self, snapshot: &LiveTimingsSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CarInfo;
    use crate::events::CarId;
    use std::time::Duration;

    fn snapshot_with_driver(guid: &str) -> LiveTimingsSnapshot {
        let mut driver = Driver::new(CarInfo {
            car_id: CarId(2),
            driver_guid: DriverGuid::from(guid),
            driver_name: "Ada Lovelace".into(),
            driver_initials: "AL".into(),
            car_model: "gt3_cup".into(),
        });
        driver.total_num_laps = 4;
        driver.current_car_mut().num_laps = 4;
        driver.current_car_mut().best_lap = Duration::from_millis(90_250);

        let mut drivers = HashMap::new();
        drivers.insert(driver.guid().clone(), driver);

        LiveTimingsSnapshot {
            session_type: SessionType::Practice,
            track: "magione".into(),
            track_layout: String::new(),
            session_name: "Practice".into(),
            drivers,
        }
    }

    #[test]
    fn memory_store_round_trips_by_value() {
        let store = MemoryStore::new();
        assert!(store.load_live_timings().unwrap().is_none());

        let snapshot = snapshot_with_driver("G1");
        store.upsert_live_timings(&snapshot).unwrap();

        let loaded = store.load_live_timings().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn json_file_store_round_trips_by_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("live_timings.json"));

        assert!(store.load_live_timings().unwrap().is_none());

        let snapshot = snapshot_with_driver("G1");
        store.upsert_live_timings(&snapshot).unwrap();

        let loaded = store.load_live_timings().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn snapshot_matches_requires_all_four_identifiers() {
        let snapshot = snapshot_with_driver("G1");
        assert!(snapshot.matches(SessionType::Practice, "magione", "", "Practice"));
        assert!(!snapshot.matches(SessionType::Qualify, "magione", "", "Practice"));
        assert!(!snapshot.matches(SessionType::Practice, "monza", "", "Practice"));
        assert!(!snapshot.matches(SessionType::Practice, "magione", "gp", "Practice"));
        assert!(!snapshot.matches(SessionType::Practice, "magione", "", "Quali"));
    }
}
