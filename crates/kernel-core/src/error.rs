use contracts::{ContractViolation, GroupKey, RecordId};

/// Failures of the year-level algorithms. All are deterministic functions of
/// the inputs, so none is retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("infeasible policy: {0}")]
    InfeasiblePolicy(String),

    #[error("cannot apportion {quota} units across an empty group set")]
    EmptyGroupSet { quota: u64 },

    #[error("selection quota {quota} exceeds {available} candidates")]
    InsufficientCandidates { quota: u64, available: usize },

    #[error("profile for group {group} exhausted: requested {requested}, produced {produced}")]
    ProfileExhausted {
        group: GroupKey,
        requested: u64,
        produced: u64,
    },

    #[error("reconciliation failure: {0}")]
    ReconciliationFailure(String),

    #[error("record_id {0} already exists in the population")]
    DuplicateRecordId(RecordId),
}

impl From<ContractViolation> for EngineError {
    fn from(value: ContractViolation) -> Self {
        Self::InfeasiblePolicy(value.to_string())
    }
}
