use super::*;

use contracts::{EventType, RecordStatus};

use crate::hash::is_hash_hex;
use crate::solver::solve;
use crate::store::validate_checkpoint;

fn config(worker_threads: u16) -> WorkforceConfig {
    WorkforceConfig {
        run_id: "run_test".to_string(),
        worker_threads,
        ..WorkforceConfig::default()
    }
}

fn baseline(count: usize) -> Snapshot {
    let records = (1..=count)
        .map(|n| {
            PopulationRecord::active(
                format!("E{n:06}"),
                (n % 5) as GroupKey + 1,
                30 + (n % 20) as u32,
                (n % 12) as u32,
                60_000.0 + n as f64,
                2025 - (n % 12) as u32,
            )
        })
        .collect();
    baseline_snapshot("run_test", 2025, records).expect("unique baseline")
}

fn policy(year: u32, growth: f64, experienced: f64, new_hire: f64, seed: u64) -> PolicyParameters {
    PolicyParameters::new(year, growth, experienced, new_hire, seed).expect("valid policy")
}

fn pipeline(worker_threads: u16) -> YearTransitionPipeline {
    YearTransitionPipeline::new(&config(worker_threads)).expect("pipeline")
}

#[test]
fn year_reconciles_to_the_solved_plan() {
    let prior = baseline(1_000);
    let policy = policy(2026, 0.03, 0.25, 0.40, 42);
    let outcome = pipeline(1).run_year(&prior, &policy).expect("year");

    let plan = solve(1_000, 0.03, 0.25, 0.40).expect("plan");
    assert_eq!(outcome.plan, plan);
    assert_eq!(outcome.snapshot.active_count(), plan.target_ending_count);
    assert_eq!(outcome.record_counts.ending_active, plan.target_ending_count);
    assert!(outcome.record_counts.reconciles());

    let count = |event_type: EventType| {
        outcome
            .events
            .iter()
            .filter(|event| event.event_type == event_type)
            .count() as u64
    };
    assert_eq!(count(EventType::ExperiencedTermination), plan.experienced_terminations);
    assert_eq!(count(EventType::Hire), plan.hires);
    assert_eq!(count(EventType::NewHireTermination), plan.new_hire_terminations);
    assert_eq!(count(EventType::Promotion), 0);

    let quota_sum = |quotas: &[GroupQuota]| quotas.iter().map(|q| q.quota).sum::<u64>();
    assert_eq!(quota_sum(&outcome.quotas.experienced_terminations), plan.experienced_terminations);
    assert_eq!(quota_sum(&outcome.quotas.hires), plan.hires);
    assert_eq!(quota_sum(&outcome.quotas.new_hire_terminations), plan.new_hire_terminations);
}

#[test]
fn events_follow_canonical_order_and_numbering() {
    let prior = baseline(300);
    let policy = policy(2026, 0.05, 0.2, 0.3, 7)
        .with_promotion_rate(1, 0.2)
        .expect("rate");
    let outcome = pipeline(1).run_year(&prior, &policy).expect("year");

    assert!(outcome
        .events
        .windows(2)
        .all(|pair| pair[0].event_type <= pair[1].event_type));
    for (index, event) in outcome.events.iter().enumerate() {
        let sequence = index as u64 + 1;
        assert_eq!(event.sequence_in_year, sequence);
        assert_eq!(event.event_id, format!("evt_2026_{sequence:07}"));
        assert_eq!(event.year, 2026);
        assert_eq!(event.run_id, "run_test");
    }
    assert_eq!(outcome.events[0].event_id, "evt_2026_0000001");
    assert_eq!(outcome.record_counts.events, outcome.events.len() as u64);
}

#[test]
fn identical_inputs_produce_identical_outcomes() {
    let prior = baseline(800);
    let policy = policy(2026, 0.04, 0.15, 0.25, 99)
        .with_promotion_rate(2, 0.1)
        .expect("rate");
    let first = pipeline(1).run_year(&prior, &policy).expect("first");
    let second = pipeline(1).run_year(&prior, &policy).expect("second");
    assert_eq!(first, second);
    assert!(is_hash_hex(&first.snapshot.snapshot_hash));
}

#[test]
fn worker_pool_does_not_change_results() {
    let prior = baseline(1_200);
    let policy = policy(2026, 0.06, 0.18, 0.35, 2024)
        .with_promotion_rate(1, 0.15)
        .and_then(|policy| policy.with_promotion_rate(3, 0.05))
        .expect("rates");
    let sequential = pipeline(1).run_year(&prior, &policy).expect("sequential");
    let parallel = pipeline(4).run_year(&prior, &policy).expect("parallel");
    assert_eq!(sequential.events, parallel.events);
    assert_eq!(sequential.snapshot, parallel.snapshot);
}

#[test]
fn seed_changes_selection_but_not_counts() {
    let prior = baseline(500);
    let a = pipeline(1)
        .run_year(&prior, &policy(2026, 0.02, 0.2, 0.3, 1))
        .expect("a");
    let b = pipeline(1)
        .run_year(&prior, &policy(2026, 0.02, 0.2, 0.3, 2))
        .expect("b");
    assert_eq!(a.record_counts, b.record_counts);
    assert_ne!(a.snapshot.snapshot_hash, b.snapshot.snapshot_hash);
}

#[test]
fn survivors_age_and_leavers_keep_their_termination_year() {
    let prior = baseline(200);
    let outcome = pipeline(1)
        .run_year(&prior, &policy(2026, 0.0, 0.1, 0.2, 5))
        .expect("year");
    let before = prior
        .records
        .iter()
        .map(|record| (record.record_id.as_str(), record))
        .collect::<BTreeMap<_, _>>();

    for record in &outcome.snapshot.records {
        match (record.status, before.get(record.record_id.as_str())) {
            (RecordStatus::Active, Some(previous)) => {
                assert_eq!(record.age, previous.age + 1);
                assert_eq!(record.tenure_years, previous.tenure_years + 1);
                assert_eq!(record.termination_year, None);
            }
            (RecordStatus::Terminated, _) => assert_eq!(record.termination_year, Some(2026)),
            (RecordStatus::Active, None) => {
                assert!(record.record_id.starts_with("NH_2026_"));
                assert_eq!(record.tenure_years, 0);
            }
        }
    }
    assert!(outcome
        .snapshot
        .records
        .windows(2)
        .all(|pair| pair[0].record_id < pair[1].record_id));
}

#[test]
fn promotions_move_survivors_up_one_level() {
    let prior = baseline(500);
    let policy = policy(2026, 0.0, 0.1, 0.2, 11)
        .with_promotion_rate(1, 0.5)
        .and_then(|policy| policy.with_promotion_rate(5, 0.5))
        .expect("rates");
    let outcome = pipeline(1).run_year(&prior, &policy).expect("year");

    let promotions = outcome
        .events
        .iter()
        .filter(|event| event.event_type == EventType::Promotion)
        .collect::<Vec<_>>();
    let level_one_start = prior.active_counts_by_group()[&1];
    let level_one_terms = outcome
        .quotas
        .experienced_terminations
        .iter()
        .find(|quota| quota.group_key == 1)
        .map(|quota| quota.quota)
        .unwrap_or(0);
    assert_eq!(
        promotions.len() as u64,
        (level_one_start - level_one_terms) / 2,
        "level 5 has no next level, so only level 1 promotes"
    );

    let floor = config(1).group_profiles[&2].compensation_min;
    for event in promotions {
        assert_eq!(event.group_key, 2);
        assert!(event.compensation >= floor);
        let record = outcome
            .snapshot
            .records
            .iter()
            .find(|record| record.record_id == event.record_id)
            .expect("promoted record present");
        assert!(record.is_active());
        assert_eq!(record.group_key, 2);
    }
    assert_eq!(outcome.record_counts.promotions, (level_one_start - level_one_terms) / 2);
}

#[test]
fn contraction_only_terminates() {
    let prior = baseline(400);
    let outcome = pipeline(1)
        .run_year(&prior, &policy(2026, -0.25, 0.1, 0.3, 3))
        .expect("year");
    assert_eq!(outcome.record_counts.hires, 0);
    assert_eq!(outcome.record_counts.new_hire_terminations, 0);
    assert_eq!(outcome.record_counts.experienced_terminations, 100);
    assert_eq!(outcome.snapshot.active_count(), 300);
}

#[test]
fn empty_population_is_a_valid_year() {
    let prior = baseline(0);
    let outcome = pipeline(1)
        .run_year(&prior, &policy(2026, 0.1, 0.1, 0.1, 1))
        .expect("year");
    assert!(outcome.events.is_empty());
    assert!(outcome.snapshot.records.is_empty());
    assert_eq!(outcome.record_counts, RecordCounts::default());
}

#[test]
fn failures_report_the_stage_being_attempted() {
    let prior = baseline(100);

    let wrong_year = pipeline(1)
        .run_year(&prior, &policy(2030, 0.0, 0.1, 0.1, 1))
        .expect_err("year gap");
    assert_eq!(wrong_year.stage, YearStage::Solved);
    assert!(matches!(wrong_year.source, EngineError::InfeasiblePolicy(_)));

    let mut no_mix = config(1);
    no_mix.hiring_mix.clear();
    let failure = YearTransitionPipeline::new(&no_mix)
        .expect("pipeline")
        .run_year(&prior, &policy(2026, 0.1, 0.1, 0.1, 1))
        .expect_err("nowhere to hire");
    assert_eq!(failure.stage, YearStage::Apportioned);
    assert!(matches!(failure.source, EngineError::EmptyGroupSet { .. }));

    let mut capped = config(1);
    if let Some(profile) = capped.group_profiles.get_mut(&1) {
        profile.max_cohort_size = Some(1);
    }
    let failure = YearTransitionPipeline::new(&capped)
        .expect("pipeline")
        .run_year(&prior, &policy(2026, 0.2, 0.1, 0.1, 1))
        .expect_err("capped profile");
    assert_eq!(failure.stage, YearStage::Generated);
    assert!(matches!(
        failure.source,
        EngineError::ProfileExhausted { group: 1, .. }
    ));
}

#[test]
fn stage_trace_walks_every_stage() {
    let outcome = pipeline(1)
        .run_year(&baseline(50), &policy(2026, 0.0, 0.1, 0.1, 1))
        .expect("year");
    assert_eq!(outcome.stage_trace, STAGE_ORDER.to_vec());
    assert_eq!(YearStage::Committed.next(), None);
    assert_eq!(YearStage::Failed.next(), None);
}

#[test]
fn input_hash_tracks_policy_config_and_prior_state() {
    let prior = baseline(100);
    let base = policy(2026, 0.03, 0.1, 0.2, 1);
    let engine = pipeline(1);
    let hash = engine.input_hash(&prior, &base);
    assert!(is_hash_hex(&hash));
    assert_eq!(hash, engine.input_hash(&prior, &base));

    assert_ne!(hash, engine.input_hash(&prior, &policy(2026, 0.04, 0.1, 0.2, 1)));
    assert_ne!(hash, engine.input_hash(&prior, &policy(2026, 0.03, 0.1, 0.2, 2)));

    let mut other_prior = prior.clone();
    other_prior.snapshot_hash = "0000000000000000".to_string();
    assert_ne!(hash, engine.input_hash(&other_prior, &base));

    let mut other_config = config(1);
    other_config.hiring_mix.insert(1, 0.5);
    let other_engine = YearTransitionPipeline::new(&other_config).expect("pipeline");
    assert_ne!(hash, other_engine.input_hash(&prior, &base));

    assert_eq!(hash, pipeline(8).input_hash(&prior, &base));
}

#[test]
fn outcome_checkpoint_is_structurally_valid() {
    let outcome = pipeline(1)
        .run_year(&baseline(250), &policy(2026, 0.03, 0.2, 0.3, 17))
        .expect("year");
    let checkpoint = outcome.checkpoint();
    validate_checkpoint(2026, &checkpoint).expect("valid checkpoint");
    assert_eq!(checkpoint.snapshot_hash.as_deref(), Some(outcome.snapshot.snapshot_hash.as_str()));
    assert_eq!(checkpoint.input_hash, outcome.input_hash);
}

#[test]
fn baseline_rejects_duplicate_ids() {
    let record = PopulationRecord::active("E1", 1, 30, 1, 50_000.0, 2024);
    assert_eq!(
        baseline_snapshot("run_test", 2025, vec![record.clone(), record]),
        Err(EngineError::DuplicateRecordId("E1".to_string()))
    );
}

fn untouched_transition(prior: &Snapshot, events: u64) -> Transition {
    Transition {
        records: prior.records.clone(),
        counts: RecordCounts {
            starting_active: prior.active_count(),
            ending_active: prior.active_count(),
            events,
            ..RecordCounts::default()
        },
    }
}

fn termination_selection(ids: &[&str]) -> GroupSelection {
    GroupSelection {
        group_key: 1,
        terminated: ids.iter().map(|id| id.to_string()).collect(),
        promoted: Vec::new(),
        promotion_quota: 0,
        promotion_target: None,
    }
}

fn empty_cohort() -> CohortSelection {
    CohortSelection {
        cohort: Vec::new(),
        hires_by_group: BTreeMap::new(),
        new_hire_quotas: Vec::new(),
        terminated_by_group: Vec::new(),
    }
}

#[test]
fn commit_rejects_selections_missing_from_the_population() {
    let prior = baseline(3);
    let result = pipeline(1).commit_stage(
        &prior,
        2026,
        &[termination_selection(&["E999999"])],
        &empty_cohort(),
        untouched_transition(&prior, 1),
    );
    assert!(matches!(result, Err(EngineError::ReconciliationFailure(_))));
}

#[test]
fn commit_rejects_event_count_drift() {
    let prior = baseline(3);
    let result = pipeline(1).commit_stage(
        &prior,
        2026,
        &[termination_selection(&["E000001"])],
        &empty_cohort(),
        untouched_transition(&prior, 2),
    );
    match result {
        Err(EngineError::ReconciliationFailure(message)) => {
            assert!(message.contains("emitted 1 events, validated 2"));
        }
        other => panic!("unexpected commit result: {other:?}"),
    }

    let (events, _, counts) = pipeline(1)
        .commit_stage(
            &prior,
            2026,
            &[termination_selection(&["E000001"])],
            &empty_cohort(),
            untouched_transition(&prior, 1),
        )
        .expect("consistent commit");
    assert_eq!(events.len(), 1);
    assert_eq!(counts.events, 1);
}
