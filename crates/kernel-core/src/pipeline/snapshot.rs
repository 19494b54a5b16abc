use super::*;

use contracts::RecordStatus;

use crate::hash::records_fingerprint;

/// Sorts `records` by id and stamps the content hash.
pub fn seal_snapshot(run_id: &str, year: u32, mut records: Vec<PopulationRecord>) -> Snapshot {
    records.sort_by(|a, b| a.record_id.cmp(&b.record_id));
    let snapshot_hash = hash_hex(records_fingerprint(&records));
    Snapshot {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        run_id: run_id.to_string(),
        snapshot_id: format!("snap_{run_id}_{year}"),
        year,
        records,
        snapshot_hash,
    }
}

/// Snapshot of the baseline population, treated as the end state of `year`.
pub fn baseline_snapshot(
    run_id: &str,
    year: u32,
    records: Vec<PopulationRecord>,
) -> Result<Snapshot, EngineError> {
    let mut seen = BTreeSet::new();
    for record in &records {
        if !seen.insert(record.record_id.as_str()) {
            return Err(EngineError::DuplicateRecordId(record.record_id.clone()));
        }
    }
    Ok(seal_snapshot(run_id, year, records))
}

impl YearTransitionPipeline {
    /// End-of-year records: the prior year's actives, aged and moved, plus the
    /// cohort. Anyone leaving this year stays in the set as terminated.
    pub(super) fn advance_population(
        &self,
        prior: &Snapshot,
        year: u32,
        selections: &[GroupSelection],
        cohort: &CohortSelection,
    ) -> Vec<PopulationRecord> {
        let terminated = selections
            .iter()
            .flat_map(|selection| selection.terminated.iter().map(String::as_str))
            .collect::<BTreeSet<_>>();
        let promoted = selections
            .iter()
            .filter_map(|selection| {
                selection
                    .promotion_target
                    .map(|target| (selection, target))
            })
            .flat_map(|(selection, target)| {
                selection
                    .promoted
                    .iter()
                    .map(move |id| (id.as_str(), target))
            })
            .collect::<BTreeMap<_, _>>();
        let new_hire_terminated = cohort
            .terminated_by_group
            .iter()
            .flat_map(|(_, ids)| ids.iter().map(String::as_str))
            .collect::<BTreeSet<_>>();

        let mut records = Vec::with_capacity(prior.records.len() + cohort.cohort.len());
        for record in prior.active_records() {
            let mut next = record.clone();
            if terminated.contains(record.record_id.as_str()) {
                next.status = RecordStatus::Terminated;
                next.termination_year = Some(year);
            } else {
                next.age = next.age.saturating_add(1);
                next.tenure_years = next.tenure_years.saturating_add(1);
                if let Some(target) = promoted.get(record.record_id.as_str()) {
                    next.group_key = *target;
                    if let Some(floor) = self.compensation_floor(*target) {
                        next.compensation = next.compensation.max(floor);
                    }
                }
            }
            records.push(next);
        }
        for record in &cohort.cohort {
            let mut next = record.clone();
            if new_hire_terminated.contains(record.record_id.as_str()) {
                next.status = RecordStatus::Terminated;
                next.termination_year = Some(year);
            }
            records.push(next);
        }
        records.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        records
    }

    fn compensation_floor(&self, group: GroupKey) -> Option<f64> {
        self.group_profiles
            .get(&group)
            .map(|profile| profile.compensation_min)
    }
}
