//! Synthetic new-hire cohorts.
//!
//! Records are numbered with a year-global 1-based sequence assigned in
//! ascending group order, so ids (`NH_{year}_{sequence:06}`) never repeat across
//! years and each record's attributes depend only on `(seed, year, sequence)`.

use std::collections::BTreeMap;

use contracts::{AttributeDistribution, GroupKey, PopulationRecord, RecordId};

use crate::hash::{sample_age, sample_compensation, sequence_key};
use crate::EngineError;

pub const NEW_HIRE_PREFIX: &str = "NH";

pub fn new_hire_id(year: u32, sequence: u64) -> RecordId {
    format!("{NEW_HIRE_PREFIX}_{year}_{sequence:06}")
}

/// One group's slice of the year's cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortBatch {
    pub group_key: GroupKey,
    pub first_sequence: u64,
    pub count: u64,
    pub profile: AttributeDistribution,
}

/// Validates profiles against quotas and assigns sequence ranges.
pub fn plan_batches(
    hire_quota_by_group: &BTreeMap<GroupKey, u64>,
    group_profiles: &BTreeMap<GroupKey, AttributeDistribution>,
) -> Result<Vec<CohortBatch>, EngineError> {
    let mut batches = Vec::new();
    let mut next_sequence = 1_u64;
    for (group_key, quota) in hire_quota_by_group {
        if *quota == 0 {
            continue;
        }
        let exhausted = |produced: u64| EngineError::ProfileExhausted {
            group: *group_key,
            requested: *quota,
            produced,
        };
        let profile = group_profiles.get(group_key).ok_or_else(|| exhausted(0))?;
        if profile.validate(*group_key).is_err() {
            return Err(exhausted(0));
        }
        if let Some(capacity) = profile.max_cohort_size {
            if capacity < *quota {
                return Err(exhausted(capacity));
            }
        }
        batches.push(CohortBatch {
            group_key: *group_key,
            first_sequence: next_sequence,
            count: *quota,
            profile: profile.clone(),
        });
        next_sequence = next_sequence.saturating_add(*quota);
    }
    Ok(batches)
}

pub fn generate_batch(batch: &CohortBatch, seed: u64, year: u32) -> Vec<PopulationRecord> {
    (0..batch.count)
        .map(|offset| {
            let sequence = batch.first_sequence + offset;
            let key = sequence_key(seed, year, sequence);
            PopulationRecord::active(
                new_hire_id(year, sequence),
                batch.group_key,
                sample_age(key, batch.profile.age_min, batch.profile.age_max),
                0,
                sample_compensation(
                    key,
                    batch.profile.compensation_min,
                    batch.profile.compensation_max,
                ),
                year,
            )
        })
        .collect()
}

pub fn generate(
    hire_quota_by_group: &BTreeMap<GroupKey, u64>,
    group_profiles: &BTreeMap<GroupKey, AttributeDistribution>,
    seed: u64,
    year: u32,
) -> Result<Vec<PopulationRecord>, EngineError> {
    let mut cohort = Vec::new();
    for batch in plan_batches(hire_quota_by_group, group_profiles)? {
        let records = generate_batch(&batch, seed, year);
        ensure_complete(&batch, records.len())?;
        cohort.extend(records);
    }
    Ok(cohort)
}

pub(crate) fn ensure_complete(batch: &CohortBatch, produced: usize) -> Result<(), EngineError> {
    if produced as u64 != batch.count {
        return Err(EngineError::ProfileExhausted {
            group: batch.group_key,
            requested: batch.count,
            produced: produced as u64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles() -> BTreeMap<GroupKey, AttributeDistribution> {
        BTreeMap::from([
            (1, AttributeDistribution::new(22, 30, 50_000.0, 60_000.0)),
            (2, AttributeDistribution::new(30, 45, 80_000.0, 95_000.0)),
        ])
    }

    #[test]
    fn generates_exact_quota_per_group_with_global_sequence() {
        let quotas = BTreeMap::from([(1, 3), (2, 2)]);
        let cohort = generate(&quotas, &profiles(), 9, 2027).expect("generate");
        let ids = cohort.iter().map(|r| r.record_id.as_str()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "NH_2027_000001",
                "NH_2027_000002",
                "NH_2027_000003",
                "NH_2027_000004",
                "NH_2027_000005"
            ]
        );
        assert_eq!(cohort.iter().filter(|r| r.group_key == 1).count(), 3);
        assert_eq!(cohort.iter().filter(|r| r.group_key == 2).count(), 2);
        let all_profiles = profiles();
        for record in &cohort {
            let profile = &all_profiles[&record.group_key];
            assert!((profile.age_min..=profile.age_max).contains(&record.age));
            assert!(record.compensation >= profile.compensation_min);
            assert!(record.compensation <= profile.compensation_max);
            assert_eq!(record.tenure_years, 0);
            assert_eq!(record.hire_year, 2027);
            assert!(record.is_active());
        }
    }

    #[test]
    fn same_inputs_same_cohort() {
        let quotas = BTreeMap::from([(1, 25), (2, 10)]);
        let first = generate(&quotas, &profiles(), 77, 2025).expect("generate");
        let second = generate(&quotas, &profiles(), 77, 2025).expect("generate");
        assert_eq!(first, second);
        let other_seed = generate(&quotas, &profiles(), 78, 2025).expect("generate");
        assert_ne!(first, other_seed);
    }

    #[test]
    fn zero_quota_groups_need_no_profile() {
        let quotas = BTreeMap::from([(1, 1), (9, 0)]);
        let cohort = generate(&quotas, &profiles(), 1, 2025).expect("generate");
        assert_eq!(cohort.len(), 1);
    }

    #[test]
    fn missing_or_capped_profile_is_exhausted() {
        let quotas = BTreeMap::from([(3, 4)]);
        assert_eq!(
            generate(&quotas, &profiles(), 1, 2025),
            Err(EngineError::ProfileExhausted {
                group: 3,
                requested: 4,
                produced: 0
            })
        );

        let mut capped = profiles();
        if let Some(profile) = capped.get_mut(&1) {
            profile.max_cohort_size = Some(2);
        }
        assert_eq!(
            generate(&BTreeMap::from([(1, 3)]), &capped, 1, 2025),
            Err(EngineError::ProfileExhausted {
                group: 1,
                requested: 3,
                produced: 2
            })
        );
    }

    #[test]
    fn degenerate_profile_is_exhausted() {
        let broken = BTreeMap::from([(1, AttributeDistribution::new(40, 30, 1.0, 2.0))]);
        assert!(matches!(
            generate(&BTreeMap::from([(1, 1)]), &broken, 1, 2025),
            Err(EngineError::ProfileExhausted { group: 1, .. })
        ));
    }
}
