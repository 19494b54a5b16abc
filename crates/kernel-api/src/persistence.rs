use std::path::Path;

use contracts::{Checkpoint, EventRecord, Snapshot};
use kernel_core::store::{validate_checkpoint, RunStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no run store is attached")]
    NotAttached,
}

impl From<PersistenceError> for StoreError {
    fn from(value: PersistenceError) -> Self {
        match value {
            PersistenceError::Serde(err) => StoreError::Serde(err),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Per-run tables in one SQLite file; every committed year is one transaction.
#[derive(Debug)]
pub struct SqliteRunStore {
    conn: Connection,
    run_id: String,
}

impl SqliteRunStore {
    pub fn open(path: impl AsRef<Path>, run_id: impl Into<String>) -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open(path)?, run_id.into())
    }

    pub fn open_in_memory(run_id: impl Into<String>) -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?, run_id.into())
    }

    fn with_connection(conn: Connection, run_id: String) -> Result<Self, PersistenceError> {
        let mut store = Self { conn, run_id };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Removes every year stored for this run.
    pub fn delete_run(&mut self) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        for table in ["events", "snapshots", "checkpoints"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE run_id = ?1"),
                params![self.run_id.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        let mode: String =
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "sqlite store configured");
        self.conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                status TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                snapshot_hash TEXT,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (run_id, year)
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                run_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                snapshot_id TEXT NOT NULL,
                snapshot_hash TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (run_id, year)
            );

            CREATE TABLE IF NOT EXISTS events (
                run_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                sequence_in_year INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (run_id, event_id),
                UNIQUE (run_id, year, sequence_in_year)
            );

            CREATE INDEX IF NOT EXISTS idx_events_run_year ON events(run_id, year);
            CREATE INDEX IF NOT EXISTS idx_events_run_record ON events(run_id, record_id);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name) VALUES(1, 'initial_v1')",
            [],
        )?;
        Ok(())
    }

    fn load_checkpoint_payload(&self, year: u32) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .conn
            .query_row(
                "SELECT payload_json FROM checkpoints WHERE run_id = ?1 AND year = ?2",
                params![self.run_id.as_str(), i64::from(year)],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn stored_years(&self) -> Result<Vec<u32>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT year FROM checkpoints WHERE run_id = ?1 ORDER BY year ASC")?;
        let rows = stmt.query_map(params![self.run_id.as_str()], |row| row.get::<_, i64>(0))?;
        let mut years = Vec::new();
        for row in rows {
            if let Ok(year) = u32::try_from(row?) {
                years.push(year);
            }
        }
        Ok(years)
    }

    fn upsert_checkpoint(
        tx: &rusqlite::Transaction<'_>,
        run_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        tx.execute(
            "INSERT INTO checkpoints (
                run_id,
                year,
                status,
                input_hash,
                snapshot_hash,
                payload_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(run_id, year) DO UPDATE SET
                status = excluded.status,
                input_hash = excluded.input_hash,
                snapshot_hash = excluded.snapshot_hash,
                payload_json = excluded.payload_json",
            params![
                run_id,
                i64::from(checkpoint.year),
                format!("{:?}", checkpoint.status),
                checkpoint.input_hash.as_str(),
                checkpoint.snapshot_hash.as_deref(),
                serde_json::to_string(checkpoint)?,
            ],
        )?;
        Ok(())
    }

    fn clear_year(tx: &rusqlite::Transaction<'_>, run_id: &str, year: u32) -> Result<(), PersistenceError> {
        tx.execute(
            "DELETE FROM events WHERE run_id = ?1 AND year = ?2",
            params![run_id, i64::from(year)],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE run_id = ?1 AND year = ?2",
            params![run_id, i64::from(year)],
        )?;
        Ok(())
    }

    fn commit_year_checked(
        &mut self,
        events: &[EventRecord],
        snapshot: &Snapshot,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        Self::clear_year(&tx, &self.run_id, checkpoint.year)?;

        for event in events {
            tx.execute(
                "INSERT INTO events (
                    run_id,
                    event_id,
                    year,
                    sequence_in_year,
                    event_type,
                    record_id,
                    payload_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    self.run_id.as_str(),
                    event.event_id.as_str(),
                    i64::from(event.year),
                    i64::try_from(event.sequence_in_year).unwrap_or(i64::MAX),
                    format!("{:?}", event.event_type),
                    event.record_id.as_str(),
                    serde_json::to_string(event)?,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO snapshots (
                run_id,
                year,
                snapshot_id,
                snapshot_hash,
                payload_json
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.run_id.as_str(),
                i64::from(snapshot.year),
                snapshot.snapshot_id.as_str(),
                snapshot.snapshot_hash.as_str(),
                serde_json::to_string(snapshot)?,
            ],
        )?;

        Self::upsert_checkpoint(&tx, &self.run_id, checkpoint)?;
        tx.commit()?;
        debug!(year = checkpoint.year, events = events.len(), "committed year to sqlite store");
        Ok(())
    }

    fn record_failure_checked(&mut self, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        Self::clear_year(&tx, &self.run_id, checkpoint.year)?;
        Self::upsert_checkpoint(&tx, &self.run_id, checkpoint)?;
        tx.commit()?;
        Ok(())
    }
}

impl RunStore for SqliteRunStore {
    fn load_checkpoint(&self, year: u32) -> Result<Option<Checkpoint>, StoreError> {
        let Some(raw) = self.load_checkpoint_payload(year)? else {
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
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM snapshots WHERE run_id = ?1 AND year = ?2",
                params![self.run_id.as_str(), i64::from(year)],
                |row| row.get(0),
            )
            .optional()
            .map_err(PersistenceError::from)?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn load_events(&self, year: u32) -> Result<Vec<EventRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT payload_json
                 FROM events
                 WHERE run_id = ?1 AND year = ?2
                 ORDER BY sequence_in_year ASC",
            )
            .map_err(PersistenceError::from)?;
        let rows = stmt
            .query_map(params![self.run_id.as_str(), i64::from(year)], |row| {
                row.get::<_, String>(0)
            })
            .map_err(PersistenceError::from)?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row.map_err(PersistenceError::from)?;
            events.push(serde_json::from_str::<EventRecord>(&payload)?);
        }
        Ok(events)
    }

    fn commit_year(
        &mut self,
        events: &[EventRecord],
        snapshot: &Snapshot,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        Ok(self.commit_year_checked(events, snapshot, checkpoint)?)
    }

    fn record_failure(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        Ok(self.record_failure_checked(checkpoint)?)
    }

    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let mut checkpoints = Vec::new();
        for year in self.stored_years()? {
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
