//! Durable per-year state: events, snapshots, and the checkpoint that marks a
//! year complete. The checkpoint is always written last.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use contracts::{Checkpoint, EventRecord, Snapshot, SCHEMA_VERSION_V1};
use tracing::{debug, warn};

use crate::hash::is_hash_hex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("checkpoint for year {year} is corrupt: {reason}")]
    CheckpointCorrupt { year: u32, reason: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub trait RunStore {
    /// `Err(CheckpointCorrupt)` when a checkpoint exists but fails structural validation.
    fn load_checkpoint(&self, year: u32) -> Result<Option<Checkpoint>, StoreError>;

    fn load_snapshot(&self, year: u32) -> Result<Option<Snapshot>, StoreError>;

    fn load_events(&self, year: u32) -> Result<Vec<EventRecord>, StoreError>;

    /// Persists a validated year. A crash at any point must leave the year's
    /// checkpoint either absent, stale, or complete, never partially written.
    fn commit_year(
        &mut self,
        events: &[EventRecord],
        snapshot: &Snapshot,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError>;

    fn record_failure(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Valid checkpoints ascending by year. Corrupt entries are skipped.
    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError>;
}

/// Structural checks applied to every checkpoint read back from storage.
pub fn validate_checkpoint(year: u32, checkpoint: &Checkpoint) -> Result<(), StoreError> {
    let corrupt = |reason: String| StoreError::CheckpointCorrupt { year, reason };

    if checkpoint.schema_version != SCHEMA_VERSION_V1 {
        return Err(corrupt(format!(
            "schema_version {} is not {SCHEMA_VERSION_V1}",
            checkpoint.schema_version
        )));
    }
    if checkpoint.year != year {
        return Err(corrupt(format!("stored under {year} but names year {}", checkpoint.year)));
    }
    if !is_hash_hex(&checkpoint.input_hash) {
        return Err(corrupt(format!("malformed input_hash {:?}", checkpoint.input_hash)));
    }
    if checkpoint.is_complete() {
        match checkpoint.snapshot_hash.as_deref() {
            Some(hash) if is_hash_hex(hash) => {}
            other => return Err(corrupt(format!("malformed snapshot_hash {other:?}"))),
        }
        if !checkpoint.record_counts.reconciles() {
            return Err(corrupt("record_counts do not reconcile".to_string()));
        }
        if checkpoint.failure.is_some() {
            return Err(corrupt("complete checkpoint carries a failure".to_string()));
        }
    }
    Ok(())
}

/// JSON files under `checkpoints/`, `snapshots/`, `events/`, one per year.
#[derive(Debug, Clone)]
pub struct FsRunStore {
    root: PathBuf,
}

impl FsRunStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for dir in ["checkpoints", "snapshots", "events"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|err| StoreError::io(&path, err))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoint_path(&self, year: u32) -> PathBuf {
        self.year_path("checkpoints", year)
    }

    pub fn snapshot_path(&self, year: u32) -> PathBuf {
        self.year_path("snapshots", year)
    }

    pub fn events_path(&self, year: u32) -> PathBuf {
        self.year_path("events", year)
    }

    fn year_path(&self, dir: &str, year: u32) -> PathBuf {
        self.root.join(dir).join(format!("year_{year}.json"))
    }

    fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }
}

impl RunStore for FsRunStore {
    fn load_checkpoint(&self, year: u32) -> Result<Option<Checkpoint>, StoreError> {
        let Some(raw) = Self::read_optional(&self.checkpoint_path(year))? else {
            return Ok(None);
        };
        let checkpoint = serde_json::from_str::<Checkpoint>(&raw).map_err(|err| {
            StoreError::CheckpointCorrupt {
                year,
                reason: err.to_string(),
            }
        })?;
        validate_checkpoint(year, &checkpoint)?;
        Ok(Some(checkpoint))
    }

    fn load_snapshot(&self, year: u32) -> Result<Option<Snapshot>, StoreError> {
        match Self::read_optional(&self.snapshot_path(year))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn load_events(&self, year: u32) -> Result<Vec<EventRecord>, StoreError> {
        match Self::read_optional(&self.events_path(year))? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn commit_year(
        &mut self,
        events: &[EventRecord],
        snapshot: &Snapshot,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        let year = checkpoint.year;
        write_atomic(&self.events_path(year), &serde_json::to_vec(events)?)?;
        write_atomic(&self.snapshot_path(year), &serde_json::to_vec(snapshot)?)?;
        write_atomic(
            &self.checkpoint_path(year),
            &serde_json::to_vec_pretty(checkpoint)?,
        )?;
        debug!(year, root = %self.root.display(), "committed year to filesystem store");
        Ok(())
    }

    fn record_failure(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let year = checkpoint.year;
        write_atomic(&self.checkpoint_path(year), &serde_json::to_vec_pretty(checkpoint)?)?;
        for path in [self.snapshot_path(year), self.events_path(year)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(year, path = %path.display(), "removed stale year output"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(StoreError::io(&path, err)),
            }
        }
        Ok(())
    }

    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let dir = self.root.join("checkpoints");
        let entries = fs::read_dir(&dir).map_err(|err| StoreError::io(&dir, err))?;
        let mut years = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::io(&dir, err))?;
            let name = entry.file_name();
            let year = name
                .to_str()
                .and_then(|name| name.strip_prefix("year_"))
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<u32>().ok());
            if let Some(year) = year {
                years.push(year);
            }
        }
        years.sort_unstable();

        let mut checkpoints = Vec::with_capacity(years.len());
        for year in years {
            match self.load_checkpoint(year) {
                Ok(Some(checkpoint)) => checkpoints.push(checkpoint),
                Ok(None) => {}
                Err(StoreError::CheckpointCorrupt { year, reason }) => {
                    warn!(year, %reason, "skipping corrupt checkpoint");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(checkpoints)
    }
}

/// Write to a sibling temp file, fsync, then rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| {
        StoreError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"),
        )
    })?;
    fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;

    let tmp_path = path.with_extension(format!("json.tmp-{}", std::process::id()));
    let mut file = fs::File::create(&tmp_path).map_err(|err| StoreError::io(&tmp_path, err))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| StoreError::io(&tmp_path, err))?;
    drop(file);
    fs::rename(&tmp_path, path).map_err(|err| StoreError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CheckpointStatus, RecordCounts};

    fn complete_checkpoint(year: u32) -> Checkpoint {
        Checkpoint {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_test".to_string(),
            year,
            status: CheckpointStatus::Complete,
            input_hash: "00000000000000ab".to_string(),
            snapshot_hash: Some("0123456789abcdef".to_string()),
            record_counts: RecordCounts {
                starting_active: 10,
                experienced_terminations: 2,
                new_hire_terminations: 1,
                hires: 4,
                promotions: 0,
                ending_active: 11,
                events: 7,
            },
            failure: None,
        }
    }

    #[test]
    fn validation_accepts_well_formed_checkpoint() {
        validate_checkpoint(2025, &complete_checkpoint(2025)).expect("valid");
    }

    #[test]
    fn validation_rejects_mismatched_year_and_counts() {
        assert!(matches!(
            validate_checkpoint(2026, &complete_checkpoint(2025)),
            Err(StoreError::CheckpointCorrupt { year: 2026, .. })
        ));

        let mut broken = complete_checkpoint(2025);
        broken.record_counts.ending_active = 12;
        assert!(matches!(
            validate_checkpoint(2025, &broken),
            Err(StoreError::CheckpointCorrupt { .. })
        ));

        let mut no_hash = complete_checkpoint(2025);
        no_hash.snapshot_hash = None;
        assert!(validate_checkpoint(2025, &no_hash).is_err());
    }

    #[test]
    fn failed_checkpoint_needs_no_snapshot_hash() {
        let mut failed = complete_checkpoint(2025);
        failed.status = CheckpointStatus::Failed;
        failed.snapshot_hash = None;
        failed.record_counts = RecordCounts::default();
        failed.failure = Some("boom".to_string());
        validate_checkpoint(2025, &failed).expect("failed checkpoints are structurally valid");
    }

    #[test]
    fn write_atomic_replaces_content_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("value.json");
        write_atomic(&path, b"first").expect("write");
        write_atomic(&path, b"second").expect("overwrite");
        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn garbage_checkpoint_file_is_reported_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsRunStore::open(dir.path()).expect("open");
        fs::write(store.checkpoint_path(2025), "{not json").expect("write garbage");
        assert!(matches!(
            store.load_checkpoint(2025),
            Err(StoreError::CheckpointCorrupt { year: 2025, .. })
        ));
        assert!(store.list_checkpoints().expect("list").is_empty());
        assert!(store.load_checkpoint(2030).expect("missing").is_none());
    }
}
