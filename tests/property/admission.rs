// tests/property/admission.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use matdag::coordinator::{
    ConcurrencyLimits, CoordinatorSettings, RunCoordinator, RunId, RunStatus, SubmitOutcome,
    TagConcurrencyLimit,
};
use matdag::types::CoordinatorPolicy;
use matdag_test_utils::builders::{flat_registry, request_for};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Submit a run carrying the given (database, tenant) tag choices.
    Submit(Option<usize>, Option<usize>),
    Admit,
    /// Finish the n-th started run (modulo the number started).
    Finish(usize, bool),
    /// Cancel the n-th known run.
    Cancel(usize),
}

const DATABASES: [&str; 2] = ["redshift", "postgres"];
const TENANTS: [&str; 3] = ["acme", "globex", "initech"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (proptest::option::of(0..2usize), proptest::option::of(0..3usize))
            .prop_map(|(db, tenant)| Op::Submit(db, tenant)),
        3 => Just(Op::Admit),
        3 => (any::<usize>(), any::<bool>()).prop_map(|(i, ok)| Op::Finish(i, ok)),
        1 => any::<usize>().prop_map(Op::Cancel),
    ]
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn started_counts(coord: &RunCoordinator) -> (usize, BTreeMap<(String, String), usize>) {
    let mut per_tag = BTreeMap::new();
    let mut total = 0;
    for run in coord.runs() {
        if run.status != RunStatus::Started {
            continue;
        }
        total += 1;
        for (k, v) in &run.tags {
            *per_tag.entry((k.clone(), v.clone())).or_insert(0) += 1;
        }
    }
    (total, per_tag)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn started_runs_never_exceed_any_limit(
        max in proptest::option::of(0..4usize),
        redshift_limit in 0..3usize,
        tenant_limit in 1..3usize,
        ops in proptest::collection::vec(op_strategy(), 1..60),
    ) {
        let limits = ConcurrencyLimits::new(
            max,
            vec![
                TagConcurrencyLimit::exact("database", "redshift", redshift_limit),
                TagConcurrencyLimit::per_unique_value("tenant", tenant_limit),
            ],
        );
        let settings = CoordinatorSettings {
            policy: CoordinatorPolicy::Queued,
            limits: limits.clone(),
            ..CoordinatorSettings::default()
        };
        let mut coord = RunCoordinator::new(Arc::new(flat_registry(&["a"])), settings);
        let mut known: Vec<RunId> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            let now = t(step as i64);
            match op {
                Op::Submit(db, tenant) => {
                    let mut request = request_for("a");
                    if let Some(db) = db {
                        request = request.with_tag("database", DATABASES[db]);
                    }
                    if let Some(tenant) = tenant {
                        request = request.with_tag("tenant", TENANTS[tenant]);
                    }
                    match coord.submit(request, now) {
                        SubmitOutcome::Queued(id) => known.push(id),
                        other => prop_assert!(false, "unexpected outcome {:?}", other),
                    }
                }
                Op::Admit => {
                    coord.admission_pass(now);

                    // Whatever is still queued must be blocked by some limit.
                    for id in coord.queued_ids() {
                        let candidate = coord.run(id).unwrap();
                        let started = coord.runs().into_iter().filter(|r| r.status == RunStatus::Started);
                        prop_assert!(limits.check(candidate, started).is_err());
                    }
                }
                Op::Finish(i, ok) => {
                    let started: Vec<RunId> = coord
                        .runs()
                        .into_iter()
                        .filter(|r| r.status == RunStatus::Started)
                        .map(|r| r.id)
                        .collect();
                    if !started.is_empty() {
                        let id = started[i % started.len()];
                        let run = coord.on_run_finished(id, ok, None, now).unwrap();
                        prop_assert!(run.is_terminal());
                    }
                }
                Op::Cancel(i) => {
                    if !known.is_empty() {
                        let id = known[i % known.len()];
                        coord.cancel(id, now).unwrap();
                    }
                }
            }

            let (total, per_tag) = started_counts(&coord);
            if let Some(max) = max {
                prop_assert!(total <= max, "{} started with max {}", total, max);
            }
            let redshift = per_tag
                .get(&("database".to_string(), "redshift".to_string()))
                .copied()
                .unwrap_or(0);
            prop_assert!(redshift <= redshift_limit);
            for tenant in TENANTS {
                let count = per_tag
                    .get(&("tenant".to_string(), tenant.to_string()))
                    .copied()
                    .unwrap_or(0);
                prop_assert!(count <= tenant_limit, "tenant {} has {} started", tenant, count);
            }
        }
    }

    #[test]
    fn queue_preserves_creation_order(offsets in proptest::collection::vec(0..1000i64, 1..30)) {
        let settings = CoordinatorSettings {
            policy: CoordinatorPolicy::Queued,
            limits: ConcurrencyLimits::new(Some(0), vec![]),
            ..CoordinatorSettings::default()
        };
        let mut coord = RunCoordinator::new(Arc::new(flat_registry(&["a"])), settings);
        for offset in &offsets {
            coord.submit(request_for("a"), t(*offset));
        }

        let order: Vec<(DateTime<Utc>, u64)> = coord
            .queued_ids()
            .into_iter()
            .map(|id| {
                let run = coord.run(id).unwrap();
                (run.created_at, run.seq)
            })
            .collect();
        let mut sorted = order.clone();
        sorted.sort();
        prop_assert_eq!(order, sorted);
    }
}
