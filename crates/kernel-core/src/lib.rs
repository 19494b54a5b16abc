//! Deterministic year-over-year workforce transitions with exact growth reconciliation.

pub mod apportion;
pub mod cohort;
mod error;
pub mod hash;
pub mod pipeline;
pub mod runner;
pub mod selector;
pub mod solver;
pub mod store;

pub use apportion::{apportion, apportion_groups};
pub use cohort::generate;
pub use error::EngineError;
pub use pipeline::{
    baseline_snapshot, seal_snapshot, YearFailure, YearOutcome, YearStage,
    YearTransitionPipeline,
};
pub use runner::{CancelSignal, MultiYearRunner, RunnerError};
pub use selector::select;
pub use solver::solve;
pub use store::{FsRunStore, RunStore, StoreError};
