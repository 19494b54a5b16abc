//! Single-year transition: solve, apportion, select, generate, validate, commit.
//!
//! The pipeline is a pure function of `(prior snapshot, policy, config)`. It
//! never touches durable state; the runner persists a [`YearOutcome`] only after
//! `run_year` has returned it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use contracts::{
    AttributeDistribution, Checkpoint, CheckpointStatus, EventRecord, GroupKey, GroupQuota,
    GrowthPlan, PolicyParameters, PopulationRecord, RecordCounts, RecordId, Snapshot,
    WorkforceConfig, SCHEMA_VERSION_V1,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::hash::{hash_hex, Fingerprint, HASH_CONTRACT_VERSION};
use crate::EngineError;

mod commit;
mod snapshot;
mod stages;
#[cfg(test)]
mod tests;

pub use snapshot::{baseline_snapshot, seal_snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YearStage {
    Start,
    Solved,
    Apportioned,
    Selected,
    Generated,
    Validated,
    Committed,
    Failed,
}

const STAGE_ORDER: [YearStage; 7] = [
    YearStage::Start,
    YearStage::Solved,
    YearStage::Apportioned,
    YearStage::Selected,
    YearStage::Generated,
    YearStage::Validated,
    YearStage::Committed,
];

impl YearStage {
    pub fn next(self) -> Option<YearStage> {
        let index = STAGE_ORDER.iter().position(|stage| *stage == self)?;
        STAGE_ORDER.get(index + 1).copied()
    }
}

impl fmt::Display for YearStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("year {year} failed during {stage}: {source}")]
pub struct YearFailure {
    pub year: u32,
    pub stage: YearStage,
    #[source]
    pub source: EngineError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YearQuotas {
    pub experienced_terminations: Vec<GroupQuota>,
    pub promotions: Vec<GroupQuota>,
    pub hires: Vec<GroupQuota>,
    pub new_hire_terminations: Vec<GroupQuota>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearOutcome {
    pub year: u32,
    pub input_hash: String,
    pub plan: GrowthPlan,
    pub quotas: YearQuotas,
    pub events: Vec<EventRecord>,
    pub snapshot: Snapshot,
    pub record_counts: RecordCounts,
    pub stage_trace: Vec<YearStage>,
}

impl YearOutcome {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.snapshot.run_id.clone(),
            year: self.year,
            status: CheckpointStatus::Complete,
            input_hash: self.input_hash.clone(),
            snapshot_hash: Some(self.snapshot.snapshot_hash.clone()),
            record_counts: self.record_counts,
            failure: None,
        }
    }
}

pub fn failed_checkpoint(run_id: &str, input_hash: &str, failure: &YearFailure) -> Checkpoint {
    Checkpoint {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        run_id: run_id.to_string(),
        year: failure.year,
        status: CheckpointStatus::Failed,
        input_hash: input_hash.to_string(),
        snapshot_hash: None,
        record_counts: RecordCounts::default(),
        failure: Some(failure.to_string()),
    }
}

/// Per-group unit of selection work; groups share no mutable state.
#[derive(Debug, Clone)]
struct GroupWork {
    group_key: GroupKey,
    candidates: Vec<RecordId>,
    termination_quota: u64,
    promotion_rate: f64,
    promotion_target: Option<GroupKey>,
}

#[derive(Debug, Clone, PartialEq)]
struct GroupSelection {
    group_key: GroupKey,
    terminated: Vec<RecordId>,
    promoted: Vec<RecordId>,
    promotion_quota: u64,
    promotion_target: Option<GroupKey>,
}

#[derive(Debug, Clone)]
struct Apportionment {
    active_by_group: BTreeMap<GroupKey, Vec<RecordId>>,
    terminations: Vec<GroupQuota>,
    hires: Vec<GroupQuota>,
}

#[derive(Debug, Clone)]
struct CohortSelection {
    cohort: Vec<PopulationRecord>,
    hires_by_group: BTreeMap<GroupKey, u64>,
    new_hire_quotas: Vec<GroupQuota>,
    terminated_by_group: Vec<(GroupKey, Vec<RecordId>)>,
}

#[derive(Debug, Clone)]
struct Transition {
    records: Vec<PopulationRecord>,
    counts: RecordCounts,
}

#[derive(Debug, Default)]
struct StageTrace {
    reached: Vec<YearStage>,
}

impl StageTrace {
    fn new() -> Self {
        Self {
            reached: vec![YearStage::Start],
        }
    }

    fn advance(&mut self, stage: YearStage) {
        debug!(%stage, "stage reached");
        self.reached.push(stage);
    }

    fn attempting(&self) -> YearStage {
        self.reached
            .last()
            .and_then(|stage| stage.next())
            .unwrap_or(YearStage::Start)
    }
}

#[derive(Debug)]
pub struct YearTransitionPipeline {
    run_id: String,
    hiring_mix: BTreeMap<GroupKey, f64>,
    group_profiles: BTreeMap<GroupKey, AttributeDistribution>,
    config_fingerprint: u64,
    worker_threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl YearTransitionPipeline {
    pub fn new(config: &WorkforceConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let worker_threads = usize::from(config.worker_threads.max(1));
        let pool = if worker_threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    warn!(%err, worker_threads, "worker pool unavailable; running groups inline");
                    None
                }
            }
        } else {
            None
        };

        let mut fingerprint = Fingerprint::default().u64(config.hiring_mix.len() as u64);
        for (group, weight) in &config.hiring_mix {
            fingerprint = fingerprint.group(*group).f64(*weight);
        }
        fingerprint = fingerprint.u64(config.group_profiles.len() as u64);
        for (group, profile) in &config.group_profiles {
            fingerprint = fingerprint
                .group(*group)
                .u32(profile.age_min)
                .u32(profile.age_max)
                .f64(profile.compensation_min)
                .f64(profile.compensation_max)
                .u64(profile.max_cohort_size.unwrap_or(u64::MAX));
        }

        Ok(Self {
            run_id: config.run_id.clone(),
            hiring_mix: config.hiring_mix.clone(),
            group_profiles: config.group_profiles.clone(),
            config_fingerprint: fingerprint.finish(),
            worker_threads,
            pool,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Hash of everything a year's result depends on: the policy, the engine
    /// config, the hash contract version, and the incoming snapshot.
    pub fn input_hash(&self, prior: &Snapshot, policy: &PolicyParameters) -> String {
        let mut fingerprint = Fingerprint::default()
            .u32(HASH_CONTRACT_VERSION)
            .u64(self.config_fingerprint)
            .str(&prior.snapshot_hash)
            .u32(policy.year)
            .f64(policy.target_growth_rate)
            .f64(policy.experienced_termination_rate)
            .f64(policy.new_hire_termination_rate)
            .u64(policy.seed)
            .u64(policy.promotion_rates.len() as u64);
        for (group, rate) in &policy.promotion_rates {
            fingerprint = fingerprint.group(*group).f64(*rate);
        }
        hash_hex(fingerprint.finish())
    }

    /// Solve only; no selection or generation.
    pub fn plan(&self, prior: &Snapshot, policy: &PolicyParameters) -> Result<GrowthPlan, EngineError> {
        self.check_inputs(prior, policy)?;
        self.solve_stage(prior, policy)
    }

    pub fn run_year(
        &self,
        prior: &Snapshot,
        policy: &PolicyParameters,
    ) -> Result<YearOutcome, YearFailure> {
        let span = tracing::info_span!("year", year = policy.year);
        let _guard = span.enter();

        let mut trace = StageTrace::new();
        match self.drive(prior, policy, &mut trace) {
            Ok(outcome) => {
                info!(
                    starting = outcome.record_counts.starting_active,
                    hires = outcome.record_counts.hires,
                    experienced_terminations = outcome.record_counts.experienced_terminations,
                    new_hire_terminations = outcome.record_counts.new_hire_terminations,
                    promotions = outcome.record_counts.promotions,
                    ending = outcome.record_counts.ending_active,
                    "year committed"
                );
                Ok(outcome)
            }
            Err(source) => {
                let stage = trace.attempting();
                warn!(%stage, error = %source, "year failed");
                Err(YearFailure {
                    year: policy.year,
                    stage,
                    source,
                })
            }
        }
    }

    fn drive(
        &self,
        prior: &Snapshot,
        policy: &PolicyParameters,
        trace: &mut StageTrace,
    ) -> Result<YearOutcome, EngineError> {
        self.check_inputs(prior, policy)?;
        let input_hash = self.input_hash(prior, policy);

        let plan = self.solve_stage(prior, policy)?;
        trace.advance(YearStage::Solved);

        let apportionment = self.apportion_stage(prior, &plan)?;
        trace.advance(YearStage::Apportioned);

        let selections = self.select_stage(&apportionment, policy)?;
        trace.advance(YearStage::Selected);

        let cohort = self.generate_stage(&plan, &apportionment, policy)?;
        trace.advance(YearStage::Generated);

        let transition = self.validate_stage(prior, &plan, &selections, &cohort, policy.year)?;
        trace.advance(YearStage::Validated);

        let (events, snapshot, record_counts) =
            self.commit_stage(prior, policy.year, &selections, &cohort, transition)?;
        trace.advance(YearStage::Committed);

        let quotas = YearQuotas {
            experienced_terminations: apportionment.terminations,
            promotions: selections
                .iter()
                .map(|selection| GroupQuota {
                    group_key: selection.group_key,
                    quota: selection.promotion_quota,
                })
                .collect(),
            hires: apportionment.hires,
            new_hire_terminations: cohort.new_hire_quotas,
        };

        Ok(YearOutcome {
            year: policy.year,
            input_hash,
            plan,
            quotas,
            events,
            snapshot,
            record_counts,
            stage_trace: trace.reached.clone(),
        })
    }

    fn check_inputs(&self, prior: &Snapshot, policy: &PolicyParameters) -> Result<(), EngineError> {
        policy.validate()?;
        if u64::from(policy.year) != u64::from(prior.year) + 1 {
            return Err(EngineError::InfeasiblePolicy(format!(
                "policy for year {} cannot follow snapshot of year {}",
                policy.year, prior.year
            )));
        }
        Ok(())
    }

    /// Ascending set of known groups; promotions move one step up this ladder.
    fn ladder(&self, active_by_group: &BTreeMap<GroupKey, Vec<RecordId>>) -> BTreeSet<GroupKey> {
        self.hiring_mix
            .keys()
            .chain(self.group_profiles.keys())
            .chain(active_by_group.keys())
            .copied()
            .collect()
    }

    fn map_groups<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) if items.len() > 1 => {
                pool.install(|| items.into_par_iter().map(&f).collect::<Vec<_>>())
            }
            _ => items.into_iter().map(f).collect(),
        }
    }
}
