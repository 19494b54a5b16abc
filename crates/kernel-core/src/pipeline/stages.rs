use super::*;

use std::ops::Bound::{Excluded, Unbounded};

use crate::apportion::{apportion_group_counts, apportion_groups};
use crate::cohort::{ensure_complete, generate_batch, plan_batches};
use crate::hash::{stream_key, PROMOTION_STREAM};
use crate::selector::select;
use crate::solver::{floor_share, solve_for};

impl YearTransitionPipeline {
    pub(super) fn solve_stage(
        &self,
        prior: &Snapshot,
        policy: &PolicyParameters,
    ) -> Result<GrowthPlan, EngineError> {
        let plan = solve_for(policy, prior.active_count())?;
        debug!(%plan, "growth plan solved");
        Ok(plan)
    }

    pub(super) fn apportion_stage(
        &self,
        prior: &Snapshot,
        plan: &GrowthPlan,
    ) -> Result<Apportionment, EngineError> {
        let mut active_by_group = BTreeMap::<GroupKey, Vec<RecordId>>::new();
        for record in prior.active_records() {
            active_by_group
                .entry(record.group_key)
                .or_default()
                .push(record.record_id.clone());
        }
        let headcounts = active_by_group
            .iter()
            .map(|(group, ids)| (*group, ids.len() as u64))
            .collect::<BTreeMap<_, _>>();

        let terminations = apportion_group_counts(plan.experienced_terminations, &headcounts)?;
        let hires = apportion_groups(plan.hires, &self.hiring_mix)?;

        Ok(Apportionment {
            active_by_group,
            terminations,
            hires,
        })
    }

    pub(super) fn select_stage(
        &self,
        apportionment: &Apportionment,
        policy: &PolicyParameters,
    ) -> Result<Vec<GroupSelection>, EngineError> {
        let ladder = self.ladder(&apportionment.active_by_group);
        let quota_by_group = apportionment
            .terminations
            .iter()
            .map(|quota| (quota.group_key, quota.quota))
            .collect::<BTreeMap<_, _>>();

        let work = apportionment
            .active_by_group
            .iter()
            .map(|(group_key, candidates)| GroupWork {
                group_key: *group_key,
                candidates: candidates.clone(),
                termination_quota: quota_by_group.get(group_key).copied().unwrap_or(0),
                promotion_rate: policy.promotion_rates.get(group_key).copied().unwrap_or(0.0),
                promotion_target: ladder.range((Excluded(*group_key), Unbounded)).next().copied(),
            })
            .collect::<Vec<_>>();

        let seed = policy.seed;
        let promotion_seed = stream_key(seed, PROMOTION_STREAM);
        let year = policy.year;
        let mut selections = self
            .map_groups(work, |work| select_group(work, seed, promotion_seed, year))
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        selections.sort_by_key(|selection| selection.group_key);
        Ok(selections)
    }

    pub(super) fn generate_stage(
        &self,
        plan: &GrowthPlan,
        apportionment: &Apportionment,
        policy: &PolicyParameters,
    ) -> Result<CohortSelection, EngineError> {
        let hire_quotas = apportionment
            .hires
            .iter()
            .map(|quota| (quota.group_key, quota.quota))
            .collect::<BTreeMap<_, _>>();
        let batches = plan_batches(&hire_quotas, &self.group_profiles)?;

        let seed = policy.seed;
        let year = policy.year;
        let mut generated = self
            .map_groups(batches, |batch| -> Result<_, EngineError> {
                let records = generate_batch(&batch, seed, year);
                ensure_complete(&batch, records.len())?;
                Ok((batch.group_key, records))
            })
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        generated.sort_by_key(|(group_key, _)| *group_key);

        let hires_by_group = generated
            .iter()
            .map(|(group_key, records)| (*group_key, records.len() as u64))
            .collect::<BTreeMap<_, _>>();
        let new_hire_quotas = apportion_group_counts(plan.new_hire_terminations, &hires_by_group)?;
        let quota_by_group = new_hire_quotas
            .iter()
            .map(|quota| (quota.group_key, quota.quota))
            .collect::<BTreeMap<_, _>>();

        let work = generated
            .iter()
            .map(|(group_key, records)| {
                let ids = records
                    .iter()
                    .map(|record| record.record_id.clone())
                    .collect::<Vec<_>>();
                (*group_key, ids, quota_by_group.get(group_key).copied().unwrap_or(0))
            })
            .collect::<Vec<_>>();
        let mut terminated_by_group = self
            .map_groups(work, |(group_key, ids, quota)| {
                select(quota, &ids, seed, year).map(|picked| (group_key, picked))
            })
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        terminated_by_group.sort_by_key(|(group_key, _)| *group_key);

        Ok(CohortSelection {
            cohort: generated.into_iter().flat_map(|(_, records)| records).collect(),
            hires_by_group,
            new_hire_quotas,
            terminated_by_group,
        })
    }

    /// Re-derives every count from the realized selections, not the plan.
    pub(super) fn validate_stage(
        &self,
        prior: &Snapshot,
        plan: &GrowthPlan,
        selections: &[GroupSelection],
        cohort: &CohortSelection,
        year: u32,
    ) -> Result<Transition, EngineError> {
        let mismatch = |what: &str, planned: u64, realized: u64| {
            EngineError::ReconciliationFailure(format!(
                "{what}: planned {planned}, realized {realized}"
            ))
        };

        let starting_active = prior.active_count();
        let experienced_terminations = selections
            .iter()
            .map(|selection| selection.terminated.len() as u64)
            .sum::<u64>();
        let promotions = selections
            .iter()
            .map(|selection| selection.promoted.len() as u64)
            .sum::<u64>();
        let hires = cohort.cohort.len() as u64;
        let new_hire_terminations = cohort
            .terminated_by_group
            .iter()
            .map(|(_, ids)| ids.len() as u64)
            .sum::<u64>();

        if starting_active != plan.starting_count {
            return Err(mismatch("starting count", plan.starting_count, starting_active));
        }
        if experienced_terminations != plan.experienced_terminations {
            return Err(mismatch(
                "experienced terminations",
                plan.experienced_terminations,
                experienced_terminations,
            ));
        }
        if hires != plan.hires {
            return Err(mismatch("hires", plan.hires, hires));
        }
        if new_hire_terminations != plan.new_hire_terminations {
            return Err(mismatch(
                "new-hire terminations",
                plan.new_hire_terminations,
                new_hire_terminations,
            ));
        }
        for (group_key, produced) in &cohort.hires_by_group {
            let terminated = cohort
                .terminated_by_group
                .iter()
                .find(|(group, _)| group == group_key)
                .map(|(_, ids)| ids.len() as u64)
                .unwrap_or(0);
            if terminated > *produced {
                return Err(mismatch("new-hire terminations in group", *produced, terminated));
            }
        }

        let realized_end = i128::from(starting_active) + i128::from(hires)
            - i128::from(experienced_terminations)
            - i128::from(new_hire_terminations);
        if realized_end != i128::from(plan.target_ending_count) {
            return Err(EngineError::ReconciliationFailure(format!(
                "realized ending {realized_end} != target {}",
                plan.target_ending_count
            )));
        }

        let mut terminated_ids = BTreeSet::new();
        for selection in selections {
            for id in &selection.terminated {
                if !terminated_ids.insert(id.as_str()) {
                    return Err(EngineError::ReconciliationFailure(format!(
                        "{id} selected for termination twice"
                    )));
                }
            }
            if selection.promoted.len() as u64 != selection.promotion_quota {
                return Err(mismatch(
                    "promotions in group",
                    selection.promotion_quota,
                    selection.promoted.len() as u64,
                ));
            }
            if let Some(id) = selection
                .promoted
                .iter()
                .find(|id| terminated_ids.contains(id.as_str()))
            {
                return Err(EngineError::ReconciliationFailure(format!(
                    "{id} both terminated and promoted"
                )));
            }
        }

        let existing = prior
            .records
            .iter()
            .map(|record| record.record_id.as_str())
            .collect::<BTreeSet<_>>();
        let mut fresh = BTreeSet::new();
        for record in &cohort.cohort {
            if existing.contains(record.record_id.as_str()) || !fresh.insert(record.record_id.as_str()) {
                return Err(EngineError::DuplicateRecordId(record.record_id.clone()));
            }
        }

        let records = self.advance_population(prior, year, selections, cohort);
        let ending_active = records.iter().filter(|record| record.is_active()).count() as u64;
        if ending_active != plan.target_ending_count {
            return Err(mismatch(
                "ending active headcount",
                plan.target_ending_count,
                ending_active,
            ));
        }

        Ok(Transition {
            records,
            counts: RecordCounts {
                starting_active,
                experienced_terminations,
                new_hire_terminations,
                hires,
                promotions,
                ending_active,
                events: experienced_terminations + promotions + hires + new_hire_terminations,
            },
        })
    }
}

fn select_group(
    work: GroupWork,
    seed: u64,
    promotion_seed: u64,
    year: u32,
) -> Result<GroupSelection, EngineError> {
    let terminated = select(work.termination_quota, &work.candidates, seed, year)?;

    let (promotion_quota, promoted) = match work.promotion_target {
        Some(_) if work.promotion_rate > 0.0 => {
            let leaving = terminated.iter().map(String::as_str).collect::<BTreeSet<_>>();
            let survivors = work
                .candidates
                .iter()
                .filter(|id| !leaving.contains(id.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            let quota = floor_share(survivors.len() as u64, work.promotion_rate);
            (quota, select(quota, &survivors, promotion_seed, year)?)
        }
        _ => (0, Vec::new()),
    };

    Ok(GroupSelection {
        group_key: work.group_key,
        terminated,
        promoted,
        promotion_quota,
        promotion_target: work.promotion_target,
    })
}
