//! Multi-year driver with checkpoint-based resume.
//!
//! Years run strictly in ascending order. A year is skipped on resume only when
//! its checkpoint is complete, its input hash matches, its snapshot is intact,
//! and no earlier year in this run was recomputed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use contracts::{
    PolicyParameters, RecordCounts, RunReport, Snapshot, WorkforceConfig, YearDisposition,
    YearReport, SCHEMA_VERSION_V1,
};
use tracing::{debug, info, warn};

use crate::hash::{hash_hex, records_fingerprint};
use crate::pipeline::{failed_checkpoint, YearFailure, YearTransitionPipeline};
use crate::store::{RunStore, StoreError};
use crate::EngineError;

/// Cooperative cancellation, observed between years.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Year(#[from] YearFailure),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid run input: {0}")]
    Input(String),
}

impl RunnerError {
    /// The year that stopped the run, when a year was running.
    pub fn failed_year(&self) -> Option<u32> {
        match self {
            Self::Year(failure) => Some(failure.year),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct MultiYearRunner {
    pipeline: YearTransitionPipeline,
}

impl MultiYearRunner {
    pub fn new(pipeline: YearTransitionPipeline) -> Self {
        Self { pipeline }
    }

    pub fn from_config(config: &WorkforceConfig) -> Result<Self, RunnerError> {
        Ok(Self::new(YearTransitionPipeline::new(config)?))
    }

    pub fn pipeline(&self) -> &YearTransitionPipeline {
        &self.pipeline
    }

    pub fn run(
        &self,
        store: &mut dyn RunStore,
        baseline: &Snapshot,
        policies: &[PolicyParameters],
        cancel: &CancelSignal,
    ) -> Result<RunReport, RunnerError> {
        check_years(baseline.year, policies)?;
        info!(
            run_id = self.pipeline.run_id(),
            baseline_year = baseline.year,
            years = policies.len(),
            worker_threads = self.pipeline.worker_threads(),
            "starting run"
        );

        let mut report = RunReport {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.pipeline.run_id().to_string(),
            years: Vec::with_capacity(policies.len()),
            cancelled: false,
        };
        let mut prior = baseline.clone();
        let mut recomputing = false;

        for policy in policies {
            if cancel.is_cancelled() {
                info!(next_year = policy.year, "run cancelled before year start");
                report.cancelled = true;
                break;
            }

            let input_hash = self.pipeline.input_hash(&prior, policy);
            if !recomputing {
                if let Some((snapshot, record_counts)) =
                    reusable_year(store, policy.year, &input_hash)?
                {
                    info!(year = policy.year, "checkpoint matches; skipping year");
                    report.years.push(YearReport {
                        year: policy.year,
                        disposition: YearDisposition::Skipped,
                        record_counts,
                    });
                    prior = snapshot;
                    continue;
                }
            }
            recomputing = true;

            let outcome = match self.pipeline.run_year(&prior, policy) {
                Ok(outcome) => outcome,
                Err(failure) => {
                    let checkpoint = failed_checkpoint(self.pipeline.run_id(), &input_hash, &failure);
                    if let Err(err) = store.record_failure(&checkpoint) {
                        warn!(year = failure.year, %err, "could not record failed checkpoint");
                    }
                    return Err(failure.into());
                }
            };

            store.commit_year(&outcome.events, &outcome.snapshot, &outcome.checkpoint())?;
            report.years.push(YearReport {
                year: outcome.year,
                disposition: YearDisposition::Computed,
                record_counts: outcome.record_counts,
            });
            prior = outcome.snapshot;
        }

        info!(%report, "run finished");
        Ok(report)
    }
}

fn check_years(baseline_year: u32, policies: &[PolicyParameters]) -> Result<(), RunnerError> {
    let mut expected = u64::from(baseline_year) + 1;
    for policy in policies {
        if u64::from(policy.year) != expected {
            return Err(RunnerError::Input(format!(
                "policy years must be contiguous from {}; expected {expected}, found {}",
                u64::from(baseline_year) + 1,
                policy.year
            )));
        }
        expected += 1;
    }
    Ok(())
}

/// The stored snapshot and counts for `year` when its checkpoint can be trusted.
fn reusable_year(
    store: &dyn RunStore,
    year: u32,
    input_hash: &str,
) -> Result<Option<(Snapshot, RecordCounts)>, StoreError> {
    let checkpoint = match store.load_checkpoint(year) {
        Ok(Some(checkpoint)) => checkpoint,
        Ok(None) => return Ok(None),
        Err(StoreError::CheckpointCorrupt { reason, .. }) => {
            warn!(year, %reason, "corrupt checkpoint; recomputing year");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    if !checkpoint.is_complete() {
        debug!(year, failure = ?checkpoint.failure, "previous attempt failed; recomputing year");
        return Ok(None);
    }
    if checkpoint.input_hash != input_hash {
        info!(year, stored = %checkpoint.input_hash, current = %input_hash, "inputs changed; recomputing year");
        return Ok(None);
    }

    let snapshot = match store.load_snapshot(year) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            warn!(year, "checkpoint without snapshot; recomputing year");
            return Ok(None);
        }
        Err(StoreError::Serde(err)) => {
            warn!(year, %err, "unreadable snapshot; recomputing year");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    let content_hash = hash_hex(records_fingerprint(&snapshot.records));
    if checkpoint.snapshot_hash.as_deref() != Some(content_hash.as_str())
        || snapshot.snapshot_hash != content_hash
        || snapshot.year != year
    {
        warn!(year, "snapshot does not match checkpoint; recomputing year");
        return Ok(None);
    }
    Ok(Some((snapshot, checkpoint.record_counts)))
}
