//! Seeded, platform-independent selection of exactly `quota` records.
//!
//! Candidates are ordered by `(rank_key(seed, year, id), id)` ascending and the
//! first `quota` are taken. The ordering is the only source of randomness.

use contracts::RecordId;

use crate::hash::rank_key;
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCandidate {
    pub rank_key: u64,
    pub record_id: RecordId,
}

pub fn rank(candidates: &[RecordId], seed: u64, year: u32) -> Vec<RankedCandidate> {
    let mut ranked = candidates
        .iter()
        .map(|record_id| RankedCandidate {
            rank_key: rank_key(seed, year, record_id),
            record_id: record_id.clone(),
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        a.rank_key
            .cmp(&b.rank_key)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    ranked
}

/// Returns the selected ids in rank order.
pub fn select(
    quota: u64,
    candidates: &[RecordId],
    seed: u64,
    year: u32,
) -> Result<Vec<RecordId>, EngineError> {
    if quota > candidates.len() as u64 {
        return Err(EngineError::InsufficientCandidates {
            quota,
            available: candidates.len(),
        });
    }
    if quota == 0 {
        return Ok(Vec::new());
    }
    Ok(rank(candidates, seed, year)
        .into_iter()
        .take(quota as usize)
        .map(|ranked| ranked.record_id)
        .collect())
}
