use super::*;

use contracts::EventType;
use serde_json::json;

struct EventLog<'a> {
    run_id: &'a str,
    year: u32,
    events: Vec<EventRecord>,
}

impl EventLog<'_> {
    fn push(
        &mut self,
        event_type: EventType,
        record: &PopulationRecord,
        details: serde_json::Value,
    ) {
        let sequence_in_year = self.events.len() as u64 + 1;
        self.events.push(EventRecord {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.run_id.to_string(),
            event_id: format!("evt_{}_{sequence_in_year:07}", self.year),
            year: self.year,
            sequence_in_year,
            event_type,
            record_id: record.record_id.clone(),
            group_key: record.group_key,
            compensation: record.compensation,
            details: Some(details),
        });
    }
}

fn committed<'r>(
    records: &BTreeMap<&str, &'r PopulationRecord>,
    id: &str,
    what: &str,
) -> Result<&'r PopulationRecord, EngineError> {
    records.get(id).copied().ok_or_else(|| {
        EngineError::ReconciliationFailure(format!("{what} {id} missing from the population"))
    })
}

impl YearTransitionPipeline {
    /// Emits the year's events in canonical order: experienced terminations,
    /// promotions, hires, new-hire terminations; ascending group within each,
    /// rank order within a group.
    pub(super) fn commit_stage(
        &self,
        prior: &Snapshot,
        year: u32,
        selections: &[GroupSelection],
        cohort: &CohortSelection,
        transition: Transition,
    ) -> Result<(Vec<EventRecord>, Snapshot, RecordCounts), EngineError> {
        let before = prior
            .records
            .iter()
            .map(|record| (record.record_id.as_str(), record))
            .collect::<BTreeMap<_, _>>();
        let after = transition
            .records
            .iter()
            .map(|record| (record.record_id.as_str(), record))
            .collect::<BTreeMap<_, _>>();

        let mut log = EventLog {
            run_id: &self.run_id,
            year,
            events: Vec::with_capacity(transition.counts.events as usize),
        };

        for selection in selections {
            for id in &selection.terminated {
                let record = committed(&after, id, "terminated record")?;
                log.push(
                    EventType::ExperiencedTermination,
                    record,
                    json!({ "age": record.age, "tenure_years": record.tenure_years }),
                );
            }
        }

        for selection in selections {
            for id in &selection.promoted {
                let record = committed(&after, id, "promoted record")?;
                let previous = committed(&before, id, "promoted record")?;
                log.push(
                    EventType::Promotion,
                    record,
                    json!({
                        "from_group": selection.group_key,
                        "to_group": record.group_key,
                        "previous_compensation": previous.compensation,
                    }),
                );
            }
        }

        for record in &cohort.cohort {
            log.push(EventType::Hire, record, json!({ "age": record.age }));
        }

        for (_, ids) in &cohort.terminated_by_group {
            for id in ids {
                let record = committed(&after, id, "terminated new hire")?;
                log.push(
                    EventType::NewHireTermination,
                    record,
                    json!({ "hire_year": record.hire_year }),
                );
            }
        }

        let events = log.events;
        if events.len() as u64 != transition.counts.events {
            return Err(EngineError::ReconciliationFailure(format!(
                "emitted {} events, validated {}",
                events.len(),
                transition.counts.events
            )));
        }
        let counts = transition.counts;
        let snapshot = seal_snapshot(&self.run_id, year, transition.records);
        debug!(events = events.len(), snapshot_hash = %snapshot.snapshot_hash, "year sealed");
        Ok((events, snapshot, counts))
    }
}
