//! v1 cross-boundary contracts for the workforce engine, its run stores, and the CLI.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod serde_u64_string;

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Stable, globally unique identity of a population record.
pub type RecordId = String;

/// Sub-group key (job level). Ascending order is the canonical merge order.
pub type GroupKey = u16;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ContractViolation {
    #[error("{field} is not a finite number")]
    NonFiniteRate { field: &'static str },

    #[error("{field} must be >= 0.0, got {value}")]
    NegativeRate { field: &'static str, value: f64 },

    #[error("{field} must be < 1.0, got {value}")]
    RateAtOrAboveOne { field: &'static str, value: f64 },

    #[error("target_growth_rate must be > -1.0, got {value}")]
    GrowthBelowFloor { value: f64 },

    #[error("unsupported schema_version {found}, expected {expected}")]
    SchemaVersion { found: String, expected: &'static str },

    #[error("policy years must be contiguous from {expected}, found {found}")]
    NonContiguousYears { expected: u32, found: u32 },

    #[error("duplicate record_id {0} in baseline")]
    DuplicateRecord(RecordId),

    #[error("group profile {group}: {reason}")]
    InvalidProfile { group: GroupKey, reason: String },

    #[error("hiring_mix weight for group {group} must be finite and >= 0.0, got {value}")]
    InvalidMixWeight { group: GroupKey, value: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopulationRecord {
    pub record_id: RecordId,
    pub group_key: GroupKey,
    pub age: u32,
    pub tenure_years: u32,
    pub compensation: f64,
    pub status: RecordStatus,
    pub hire_year: u32,
    #[serde(default)]
    pub termination_year: Option<u32>,
}

impl PopulationRecord {
    pub fn active(
        record_id: impl Into<RecordId>,
        group_key: GroupKey,
        age: u32,
        tenure_years: u32,
        compensation: f64,
        hire_year: u32,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            group_key,
            age,
            tenure_years,
            compensation,
            status: RecordStatus::Active,
            hire_year,
            termination_year: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Per-year policy inputs. Immutable once handed to a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyParameters {
    pub schema_version: String,
    pub year: u32,
    pub target_growth_rate: f64,
    pub experienced_termination_rate: f64,
    pub new_hire_termination_rate: f64,
    #[serde(with = "serde_u64_string")]
    pub seed: u64,
    /// Share of eligible survivors promoted out of each group.
    #[serde(default)]
    pub promotion_rates: BTreeMap<GroupKey, f64>,
}

impl PolicyParameters {
    pub fn new(
        year: u32,
        target_growth_rate: f64,
        experienced_termination_rate: f64,
        new_hire_termination_rate: f64,
        seed: u64,
    ) -> Result<Self, ContractViolation> {
        let policy = Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            year,
            target_growth_rate,
            experienced_termination_rate,
            new_hire_termination_rate,
            seed,
            promotion_rates: BTreeMap::new(),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_promotion_rate(mut self, group: GroupKey, rate: f64) -> Result<Self, ContractViolation> {
        self.promotion_rates.insert(group, rate);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ContractViolation> {
        check_schema(&self.schema_version)?;
        if !self.target_growth_rate.is_finite() {
            return Err(ContractViolation::NonFiniteRate {
                field: "target_growth_rate",
            });
        }
        if self.target_growth_rate <= -1.0 {
            return Err(ContractViolation::GrowthBelowFloor {
                value: self.target_growth_rate,
            });
        }
        check_unit_rate("experienced_termination_rate", self.experienced_termination_rate)?;
        check_unit_rate("new_hire_termination_rate", self.new_hire_termination_rate)?;
        for rate in self.promotion_rates.values() {
            check_unit_rate("promotion_rates", *rate)?;
        }
        Ok(())
    }
}

fn check_unit_rate(field: &'static str, value: f64) -> Result<(), ContractViolation> {
    if !value.is_finite() {
        return Err(ContractViolation::NonFiniteRate { field });
    }
    if value < 0.0 {
        return Err(ContractViolation::NegativeRate { field, value });
    }
    if value >= 1.0 {
        return Err(ContractViolation::RateAtOrAboveOne { field, value });
    }
    Ok(())
}

fn check_schema(found: &str) -> Result<(), ContractViolation> {
    if found != SCHEMA_VERSION_V1 {
        return Err(ContractViolation::SchemaVersion {
            found: found.to_string(),
            expected: SCHEMA_VERSION_V1,
        });
    }
    Ok(())
}

/// Integer event counts that satisfy the growth equation exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrowthPlan {
    pub starting_count: u64,
    pub target_ending_count: u64,
    pub experienced_terminations: u64,
    pub hires: u64,
    pub new_hire_terminations: u64,
}

impl GrowthPlan {
    /// Implied ending count minus target. Zero for every valid plan.
    pub fn reconciliation_error(&self) -> i128 {
        i128::from(self.starting_count) + i128::from(self.hires)
            - i128::from(self.experienced_terminations)
            - i128::from(self.new_hire_terminations)
            - i128::from(self.target_ending_count)
    }
}

impl fmt::Display for GrowthPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start={} target={} exp_terms={} hires={} nh_terms={}",
            self.starting_count,
            self.target_ending_count,
            self.experienced_terminations,
            self.hires,
            self.new_hire_terminations
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupQuota {
    pub group_key: GroupKey,
    pub quota: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ExperiencedTermination,
    Promotion,
    Hire,
    NewHireTermination,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub schema_version: String,
    pub run_id: String,
    pub event_id: String,
    pub year: u32,
    pub sequence_in_year: u64,
    pub event_type: EventType,
    pub record_id: RecordId,
    pub group_key: GroupKey,
    pub compensation: f64,
    pub details: Option<Value>,
}

/// Full record set at the end of a year. Read-only once committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub schema_version: String,
    pub run_id: String,
    pub snapshot_id: String,
    pub year: u32,
    pub records: Vec<PopulationRecord>,
    pub snapshot_hash: String,
}

impl Snapshot {
    pub fn active_records(&self) -> impl Iterator<Item = &PopulationRecord> {
        self.records.iter().filter(|record| record.is_active())
    }

    pub fn active_count(&self) -> u64 {
        self.active_records().count() as u64
    }

    pub fn active_counts_by_group(&self) -> BTreeMap<GroupKey, u64> {
        let mut counts = BTreeMap::new();
        for record in self.active_records() {
            *counts.entry(record.group_key).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordCounts {
    pub starting_active: u64,
    pub experienced_terminations: u64,
    pub new_hire_terminations: u64,
    pub hires: u64,
    pub promotions: u64,
    pub ending_active: u64,
    pub events: u64,
}

impl RecordCounts {
    pub fn reconciles(&self) -> bool {
        u128::from(self.starting_active) + u128::from(self.hires)
            == u128::from(self.ending_active)
                + u128::from(self.experienced_terminations)
                + u128::from(self.new_hire_terminations)
    }
}

/// Durable per-year marker used to decide whether a year may be skipped on resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub schema_version: String,
    pub run_id: String,
    pub year: u32,
    pub status: CheckpointStatus,
    pub input_hash: String,
    #[serde(default)]
    pub snapshot_hash: Option<String>,
    pub record_counts: RecordCounts,
    #[serde(default)]
    pub failure: Option<String>,
}

impl Checkpoint {
    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Complete
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "year={} status={:?} input_hash={} start={} hires={} exp_terms={} nh_terms={} promotions={} end={}",
            self.year,
            self.status,
            self.input_hash,
            self.record_counts.starting_active,
            self.record_counts.hires,
            self.record_counts.experienced_terminations,
            self.record_counts.new_hire_terminations,
            self.record_counts.promotions,
            self.record_counts.ending_active
        )
    }
}

/// Per-group sampling bounds for synthetic new hires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeDistribution {
    pub age_min: u32,
    pub age_max: u32,
    pub compensation_min: f64,
    pub compensation_max: f64,
    /// Upper bound on records one cohort may draw from this profile.
    #[serde(default)]
    pub max_cohort_size: Option<u64>,
}

impl AttributeDistribution {
    pub fn new(age_min: u32, age_max: u32, compensation_min: f64, compensation_max: f64) -> Self {
        Self {
            age_min,
            age_max,
            compensation_min,
            compensation_max,
            max_cohort_size: None,
        }
    }

    pub fn validate(&self, group: GroupKey) -> Result<(), ContractViolation> {
        let reason = if self.age_min > self.age_max {
            Some(format!("age_min {} > age_max {}", self.age_min, self.age_max))
        } else if !self.compensation_min.is_finite() || !self.compensation_max.is_finite() {
            Some("compensation bounds must be finite".to_string())
        } else if self.compensation_min < 0.0 || self.compensation_min > self.compensation_max {
            Some(format!(
                "compensation range [{}, {}] is empty or negative",
                self.compensation_min, self.compensation_max
            ))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ContractViolation::InvalidProfile { group, reason }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkforceConfig {
    pub schema_version: String,
    pub run_id: String,
    /// Threads for per-group stages within a year. 1 disables the pool.
    pub worker_threads: u16,
    #[serde(default)]
    pub hiring_mix: BTreeMap<GroupKey, f64>,
    #[serde(default)]
    pub group_profiles: BTreeMap<GroupKey, AttributeDistribution>,
}

impl WorkforceConfig {
    pub fn validate(&self) -> Result<(), ContractViolation> {
        check_schema(&self.schema_version)?;
        for (group, weight) in &self.hiring_mix {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ContractViolation::InvalidMixWeight {
                    group: *group,
                    value: *weight,
                });
            }
        }
        for (group, profile) in &self.group_profiles {
            profile.validate(*group)?;
        }
        Ok(())
    }
}

impl Default for WorkforceConfig {
    fn default() -> Self {
        let levels: [(GroupKey, f64, AttributeDistribution); 5] = [
            (1, 0.40, AttributeDistribution::new(22, 35, 55_000.0, 75_000.0)),
            (2, 0.30, AttributeDistribution::new(25, 45, 70_000.0, 95_000.0)),
            (3, 0.20, AttributeDistribution::new(28, 55, 90_000.0, 130_000.0)),
            (4, 0.08, AttributeDistribution::new(32, 60, 120_000.0, 180_000.0)),
            (5, 0.02, AttributeDistribution::new(38, 65, 170_000.0, 260_000.0)),
        ];
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_local_001".to_string(),
            worker_threads: 1,
            hiring_mix: levels.iter().map(|(group, weight, _)| (*group, *weight)).collect(),
            group_profiles: levels
                .into_iter()
                .map(|(group, _, profile)| (group, profile))
                .collect(),
        }
    }
}

/// Everything a multi-year run consumes: engine config, baseline rows, yearly policies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub config: WorkforceConfig,
    pub baseline_year: u32,
    pub baseline: Vec<PopulationRecord>,
    pub policies: Vec<PolicyParameters>,
}

impl Scenario {
    pub fn validate(&self) -> Result<(), ContractViolation> {
        self.config.validate()?;

        let mut seen = std::collections::BTreeSet::new();
        for record in &self.baseline {
            if !seen.insert(record.record_id.as_str()) {
                return Err(ContractViolation::DuplicateRecord(record.record_id.clone()));
            }
        }

        let mut expected = self.baseline_year.saturating_add(1);
        for policy in &self.policies {
            policy.validate()?;
            if policy.year != expected {
                return Err(ContractViolation::NonContiguousYears {
                    expected,
                    found: policy.year,
                });
            }
            expected = expected.saturating_add(1);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum YearDisposition {
    Computed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct YearReport {
    pub year: u32,
    pub disposition: YearDisposition,
    pub record_counts: RecordCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub schema_version: String,
    pub run_id: String,
    pub years: Vec<YearReport>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn computed_years(&self) -> Vec<u32> {
        self.years_with(YearDisposition::Computed)
    }

    pub fn skipped_years(&self) -> Vec<u32> {
        self.years_with(YearDisposition::Skipped)
    }

    fn years_with(&self, disposition: YearDisposition) -> Vec<u32> {
        self.years
            .iter()
            .filter(|report| report.disposition == disposition)
            .map(|report| report.year)
            .collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={} computed={:?} skipped={:?} cancelled={}",
            self.run_id,
            self.computed_years(),
            self.skipped_years(),
            self.cancelled
        )
    }
}
