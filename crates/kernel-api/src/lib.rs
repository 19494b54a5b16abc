//! In-process API facade over a workforce scenario with SQLite or filesystem run storage.

mod persistence;

use std::path::Path;

use contracts::{
    Checkpoint, ContractViolation, EventRecord, GrowthPlan, PolicyParameters, RunReport, Scenario,
    Snapshot,
};
use kernel_core::store::{FsRunStore, RunStore, StoreError};
use kernel_core::{baseline_snapshot, CancelSignal, EngineError, MultiYearRunner, RunnerError};
use tracing::info;

pub use persistence::{PersistenceError, SqliteRunStore};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid scenario: {0}")]
    Scenario(#[from] ContractViolation),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("scenario has no policy for year {0}")]
    UnknownYear(u32),

    #[error("snapshot for year {0} is not available; run the scenario first")]
    SnapshotUnavailable(u32),
}

#[derive(Debug)]
enum AttachedStore {
    Sqlite(SqliteRunStore),
    Fs(FsRunStore),
}

impl AttachedStore {
    fn as_store(&self) -> &dyn RunStore {
        match self {
            Self::Sqlite(store) => store,
            Self::Fs(store) => store,
        }
    }

    fn as_store_mut(&mut self) -> &mut dyn RunStore {
        match self {
            Self::Sqlite(store) => store,
            Self::Fs(store) => store,
        }
    }
}

#[derive(Debug)]
pub struct WorkforceApi {
    scenario: Scenario,
    baseline: Snapshot,
    runner: MultiYearRunner,
    store: Option<AttachedStore>,
    last_report: Option<RunReport>,
}

impl WorkforceApi {
    pub fn from_scenario(scenario: Scenario) -> Result<Self, ApiError> {
        scenario.validate()?;
        let baseline = baseline_snapshot(
            &scenario.config.run_id,
            scenario.baseline_year,
            scenario.baseline.clone(),
        )?;
        let runner = MultiYearRunner::from_config(&scenario.config)?;
        Ok(Self {
            scenario,
            baseline,
            runner,
            store: None,
            last_report: None,
        })
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), ApiError> {
        let store = SqliteRunStore::open(path, self.run_id())?;
        self.store = Some(AttachedStore::Sqlite(store));
        Ok(())
    }

    pub fn attach_fs_store(&mut self, dir: impl AsRef<Path>) -> Result<(), ApiError> {
        let store = FsRunStore::open(dir)?;
        self.store = Some(AttachedStore::Fs(store));
        Ok(())
    }

    pub fn run_id(&self) -> &str {
        &self.scenario.config.run_id
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.baseline
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Runs every scenario year, resuming from whatever the attached store holds.
    pub fn run(&mut self, cancel: &CancelSignal) -> Result<RunReport, ApiError> {
        let store = self
            .store
            .as_mut()
            .ok_or(PersistenceError::NotAttached)?
            .as_store_mut();
        let report = self
            .runner
            .run(store, &self.baseline, &self.scenario.policies, cancel)?;
        info!(%report, "scenario run complete");
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Growth plan for `year` against the committed state of the year before.
    pub fn plan_year(&self, year: u32) -> Result<GrowthPlan, ApiError> {
        let policy = self.policy(year)?;
        let prior_year = year.saturating_sub(1);
        let prior = self
            .snapshot_for_year(prior_year)?
            .ok_or(ApiError::SnapshotUnavailable(prior_year))?;
        Ok(self.runner.pipeline().plan(&prior, policy)?)
    }

    pub fn checkpoints(&self) -> Result<Vec<Checkpoint>, ApiError> {
        Ok(self.attached()?.list_checkpoints()?)
    }

    pub fn events_for_year(&self, year: u32) -> Result<Vec<EventRecord>, ApiError> {
        Ok(self.attached()?.load_events(year)?)
    }

    pub fn snapshot_for_year(&self, year: u32) -> Result<Option<Snapshot>, ApiError> {
        if year == self.baseline.year {
            return Ok(Some(self.baseline.clone()));
        }
        match &self.store {
            Some(store) => Ok(store.as_store().load_snapshot(year)?),
            None => Ok(None),
        }
    }

    fn policy(&self, year: u32) -> Result<&PolicyParameters, ApiError> {
        self.scenario
            .policies
            .iter()
            .find(|policy| policy.year == year)
            .ok_or(ApiError::UnknownYear(year))
    }

    fn attached(&self) -> Result<&dyn RunStore, ApiError> {
        self.store
            .as_ref()
            .map(AttachedStore::as_store)
            .ok_or(ApiError::Persistence(PersistenceError::NotAttached))
    }
}
