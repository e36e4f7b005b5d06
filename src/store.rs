//! Durable, merge-safe persistence of protocols and assignments.
//!
//! The store file is a single JSON document combining every protocol ever
//! saved with the accumulated well assignments per protocol index. Saving
//! merges the current session into the file without clobbering prior
//! contents: protocol names already on disk are dropped with a notice, and
//! assignment lists only ever grow. The rewrite is atomic (temp file +
//! rename), so a crash mid-save leaves the previous store intact.
//!
//! A corrupt store file is a recoverable condition everywhere: saving
//! treats it as empty after a warning, loading reports it and carries on
//! with an empty result.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::codec;
use crate::error::{AppResult, PlateError};
use crate::link::LinkHandle;
use crate::protocol::{Protocol, WellAssignment};

/// On-disk schema of the combined store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedStore {
    #[serde(default)]
    protocols: Vec<Protocol>,
    /// Keyed by protocol index rendered as a string, JSON-object style.
    #[serde(default)]
    assignments: BTreeMap<String, Vec<WellAssignment>>,
}

/// Outcome of a [`PersistenceStore::save`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Number of protocols newly written to disk
    pub saved: usize,
    /// Total protocols on disk after the save
    pub total_on_disk: usize,
    /// Session protocol names dropped because they were already on disk
    pub skipped: Vec<String>,
}

impl SaveReport {
    /// True when the save was a reported no-op.
    pub fn nothing_to_save(&self) -> bool {
        self.saved == 0
    }
}

/// Result of a [`PersistenceStore::load`] call, ready for
/// [`crate::registry::AssignmentRegistry::adopt`].
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    /// Protocols in on-disk order; positions are the dense indices
    pub protocols: Vec<Protocol>,
    /// Assignment lists keyed by protocol index
    pub assignments: BTreeMap<usize, Vec<WellAssignment>>,
}

/// Loads and saves the combined protocol/assignment store.
pub struct PersistenceStore {
    path: PathBuf,
    link: LinkHandle,
    replay_delay: Duration,
}

impl PersistenceStore {
    /// Creates a store over the given file, replaying definitions through
    /// `link` on load with `replay_delay` pacing between frames.
    pub fn new(path: PathBuf, link: LinkHandle, replay_delay: Duration) -> Self {
        Self {
            path,
            link,
            replay_delay,
        }
    }

    /// Reads and parses the store file, treating a corrupt file as empty
    /// after a warning. Only a missing file yields `Ok(None)`.
    fn read_existing(&self) -> AppResult<Option<PersistedStore>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&text) {
            Ok(store) => Ok(Some(store)),
            Err(e) => {
                warn!(
                    "Could not read existing protocol store {}: {}. Treating as empty.",
                    self.path.display(),
                    e
                );
                Ok(Some(PersistedStore::default()))
            }
        }
    }

    /// Atomically rewrites the store file.
    fn write_store(&self, store: &PersistedStore) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(store)
            .map_err(|e| PlateError::CorruptStore(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Merges the session's protocols and assignments into the store.
    ///
    /// Protocols whose names are already on disk are dropped with an
    /// individual notice. With zero new protocols the call is a no-op that
    /// rewrites nothing. Assignment lists are extended per index, never
    /// replaced. On a successful save the caller is expected to clear the
    /// session registry.
    pub fn save(
        &self,
        session_protocols: &[Protocol],
        session_assignments: &BTreeMap<usize, Vec<WellAssignment>>,
    ) -> AppResult<SaveReport> {
        let mut store = self.read_existing()?.unwrap_or_default();

        let mut existing_names: HashSet<String> =
            store.protocols.iter().map(|p| p.name.clone()).collect();

        let mut new_protocols = Vec::new();
        let mut skipped = Vec::new();
        for p in session_protocols {
            if existing_names.contains(&p.name) {
                warn!("Skipping duplicate protocol name: {}", p.name);
                skipped.push(p.name.clone());
            } else {
                existing_names.insert(p.name.clone());
                new_protocols.push(p.clone());
            }
        }

        if new_protocols.is_empty() {
            info!("No new protocols to save (all duplicates).");
            return Ok(SaveReport {
                saved: 0,
                total_on_disk: store.protocols.len(),
                skipped,
            });
        }

        let saved = new_protocols.len();
        store.protocols.extend(new_protocols);

        for (index, new_list) in session_assignments {
            if new_list.is_empty() {
                continue;
            }
            store
                .assignments
                .entry(index.to_string())
                .or_default()
                .extend(new_list.iter().cloned());
        }

        self.write_store(&store)?;
        let total_on_disk = store.protocols.len();
        info!(
            "Saved {} new protocols (total now: {}) to {}",
            saved,
            total_on_disk,
            self.path.display()
        );
        Ok(SaveReport {
            saved,
            total_on_disk,
            skipped,
        })
    }

    /// Loads the store and replays every protocol definition to the device.
    ///
    /// A missing file is an empty result, not an error. A parse failure is
    /// reported as [`PlateError::CorruptStore`]; the caller treats it as
    /// recoverable. Each definition frame is paced by the configured replay
    /// delay to respect device processing time. Indices come verbatim from
    /// the stored keys; keys that do not parse as non-negative integers are
    /// skipped with a warning.
    pub async fn load(&self) -> AppResult<LoadResult> {
        if !self.path.exists() {
            info!("No saved protocol store found at {}", self.path.display());
            return Ok(LoadResult::default());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let store: PersistedStore = serde_json::from_str(&text)
            .map_err(|e| PlateError::CorruptStore(e.to_string()))?;

        for protocol in &store.protocols {
            match codec::encode_create_protocol(protocol) {
                Ok(frame) => {
                    self.link.send(&frame).await;
                    tokio::time::sleep(self.replay_delay).await;
                }
                Err(e) => warn!("Skipping stored protocol '{}': {}", protocol.name, e),
            }
        }

        let mut assignments = BTreeMap::new();
        for (key, list) in store.assignments {
            match key.parse::<usize>() {
                Ok(index) => {
                    assignments.insert(index, list);
                }
                Err(_) => warn!("Skipping assignment entry with bad index key '{}'", key),
            }
        }

        debug!(
            "Loaded {} protocols with assignments from {}",
            store.protocols.len(),
            self.path.display()
        );
        Ok(LoadResult {
            protocols: store.protocols,
            assignments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockLink;
    use crate::protocol::Color;

    fn protocol(name: &str) -> Protocol {
        Protocol {
            name: name.into(),
            color: Color::Blue,
            intensity: 128,
            active: 10.0,
            silent: 5.0,
            pulse_on: 0.5,
            pulse_off: 0.5,
            total: 60.0,
        }
    }

    fn store_at(dir: &tempfile::TempDir) -> (PersistenceStore, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
        let mock = MockLink::new();
        let sent = mock.sent_log();
        let store = PersistenceStore::new(
            dir.path().join("protocols.json"),
            LinkHandle::new(Box::new(mock)),
            Duration::ZERO,
        );
        (store, sent)
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (store, sent) = store_at(&dir);

        let protocols = vec![protocol("P1"), protocol("P2")];
        let mut assignments = BTreeMap::new();
        assignments.insert(
            0,
            vec![WellAssignment::Single {
                row: "A".into(),
                col: "1".into(),
            }],
        );
        assignments.insert(1, vec![WellAssignment::range("B", "1", "B", "4")]);

        let report = store.save(&protocols, &assignments).unwrap();
        assert_eq!(report.saved, 2);
        assert_eq!(report.total_on_disk, 2);
        assert!(report.skipped.is_empty());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.protocols, protocols);
        assert_eq!(loaded.assignments, assignments);
        // load replays each definition onto the device
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_is_idempotent_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _sent) = store_at(&dir);
        let protocols = vec![protocol("P1")];
        let assignments = BTreeMap::new();

        store.save(&protocols, &assignments).unwrap();
        let report = store.save(&protocols, &assignments).unwrap();
        assert!(report.nothing_to_save());
        assert_eq!(report.skipped, vec!["P1".to_string()]);
        assert_eq!(report.total_on_disk, 1);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.protocols.len(), 1);
    }

    #[tokio::test]
    async fn test_assignment_merge_is_additive() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _sent) = store_at(&dir);

        let mut first = BTreeMap::new();
        first.insert(
            0,
            vec![WellAssignment::Single {
                row: "A".into(),
                col: "1".into(),
            }],
        );
        store.save(&[protocol("P1")], &first).unwrap();

        let mut second = BTreeMap::new();
        second.insert(0, vec![WellAssignment::range("B", "1", "B", "4")]);
        store.save(&[protocol("P2")], &second).unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.assignments[&0].len(), 2);
        assert_eq!(
            loaded.assignments[&0][1],
            WellAssignment::range("B", "1", "B", "4")
        );
    }

    #[tokio::test]
    async fn test_corrupt_store_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _sent) = store_at(&dir);
        std::fs::write(dir.path().join("protocols.json"), "{not json").unwrap();

        // load reports the corruption
        assert!(matches!(
            store.load().await,
            Err(PlateError::CorruptStore(_))
        ));

        // save treats the corrupt file as empty and proceeds
        let report = store.save(&[protocol("P1")], &BTreeMap::new()).unwrap();
        assert_eq!(report.saved, 1);
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.protocols.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (store, sent) = store_at(&dir);
        let loaded = store.load().await.unwrap();
        assert!(loaded.protocols.is_empty());
        assert!(loaded.assignments.is_empty());
        assert!(sent.lock().unwrap().is_empty());
    }
}
