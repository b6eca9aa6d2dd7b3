//! Query-time orchestrator: resolves parallel workers to a queryid,
//! merges their plans, picks plan-row replacement or the rule engine
//! depending on stored regression state, runs the progress calculator, and
//! returns a `(queryid, progress)` pair per distinct query.

use std::collections::HashMap;

use crate::plan::merge::{extrapolate_rows, merge_rows};
use crate::plan::normalize::prepare_merge;
use crate::plan::tree::PlanNode;
use crate::progress::calc::{aggregate_progress, compute_points, prepare, strip_modify_table};
use crate::progress::replace::replace_plan_rows;
use crate::progress::rules::apply_rules;
use crate::regression::fit::RegressionParamNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Leader,
    Worker,
}

/// One backend's row from `pg_query_plan(pid)`: a leader or a parallel
/// worker reporting its own in-flight plan.
#[derive(Debug, Clone)]
pub struct WorkerSample {
    pub kind: WorkerKind,
    pub queryid: i64,
    pub planid: i64,
    pub plan_json: serde_json::Value,
    pub query_hash: i64,
}

/// Source of stored regression state for a queryid. Implemented by the
/// (out-of-scope) repository; a query with parameters but a heuristic
/// override ("formatted param" sentinel present) still runs the rule engine.
pub trait RegressionSource {
    fn params_for(&self, queryid: i64) -> Option<RegressionParamNode>;
    fn force_heuristic(&self, queryid: i64) -> bool;
}

/// Resolve queryid=0 records (parallel workers that haven't learned their
/// queryid yet) via `query_hash -> queryid` taken from leader records.
fn resolve_queryids(samples: &[WorkerSample]) -> HashMap<i64, i64> {
    let mut hash_to_queryid = HashMap::new();
    for s in samples {
        if s.kind == WorkerKind::Leader && s.queryid != 0 {
            hash_to_queryid.insert(s.query_hash, s.queryid);
        }
    }
    hash_to_queryid
}

/// Compute progress for every distinct queryid present in `samples`.
pub fn compute_progress(
    samples: &[WorkerSample],
    source: &dyn RegressionSource,
) -> crate::error::Result<Vec<(i64, f64)>> {
    let hash_to_queryid = resolve_queryids(samples);

    let mut by_queryid: HashMap<i64, Vec<&WorkerSample>> = HashMap::new();
    for s in samples {
        let queryid = if s.queryid == 0 {
            hash_to_queryid.get(&s.query_hash).copied().unwrap_or(0)
        } else {
            s.queryid
        };
        by_queryid.entry(queryid).or_default().push(s);
    }

    let mut results = Vec::new();
    for (queryid, group) in by_queryid {
        let leader = group.iter().find(|s| s.kind == WorkerKind::Leader);
        let Some(leader) = leader else { continue };

        let mut leader_plan = PlanNode::parse_document(&leader.plan_json)?;
        let counts = prepare_merge(&mut leader_plan);

        let mut worker_plans = Vec::new();
        for s in &group {
            if s.kind == WorkerKind::Worker {
                let mut p = PlanNode::parse_document(&s.plan_json)?;
                prepare_merge(&mut p);
                worker_plans.push(p);
            }
        }
        merge_rows(&mut leader_plan, &worker_plans);
        extrapolate_rows(&mut leader_plan, worker_plans.len(), counts.num_workers);

        let mut plan = strip_modify_table(leader_plan);

        let params = source.params_for(queryid).filter(|_| !source.force_heuristic(queryid));

        if let Some(params) = params {
            replace_plan_rows(&mut plan, &params);
            prepare(&mut plan, true);
            compute_points(&mut plan, true);
        } else {
            prepare(&mut plan, false);
            apply_rules(&mut plan);
            compute_points(&mut plan, false);
        }

        let progress = aggregate_progress(&plan);
        results.push((queryid, progress));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::NodeType;

    struct NoRegression;
    impl RegressionSource for NoRegression {
        fn params_for(&self, _queryid: i64) -> Option<RegressionParamNode> {
            None
        }
        fn force_heuristic(&self, _queryid: i64) -> bool {
            false
        }
    }

    fn sample(kind: WorkerKind, queryid: i64, node_type: &str, plan_rows: f64, actual_rows: f64) -> WorkerSample {
        let plan_json = serde_json::json!([{
            "Plan": {
                "Node Type": node_type,
                "Plan Rows": plan_rows,
                "Actual Rows": actual_rows,
                "Actual Loops": 1,
            }
        }]);
        WorkerSample {
            kind,
            queryid,
            planid: 1,
            plan_json,
            query_hash: 42,
        }
    }

    #[test]
    fn single_leader_no_params_runs_heuristic() {
        let samples = vec![sample(WorkerKind::Leader, 7, "Seq Scan", 10.0, 10.0)];
        let results = compute_progress(&samples, &NoRegression).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 7);
        assert_eq!(results[0].1, 1.0);
    }

    #[test]
    fn zero_queryid_worker_resolves_via_query_hash() {
        let leader = sample(WorkerKind::Leader, 7, "Seq Scan", 10.0, 5.0);
        let mut worker = sample(WorkerKind::Worker, 0, "Seq Scan", 10.0, 5.0);
        worker.query_hash = leader.query_hash;
        let samples = vec![leader, worker];
        let results = compute_progress(&samples, &NoRegression).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 7);
    }

    /// `Plan Rows` for a mergeable node must be scaled by `NormalizePlanParam`
    /// exactly once across the whole query-time path (`prepare_merge` ->
    /// `merge_rows`), not twice — there is no `add_rows` call in
    /// `compute_progress` (that fold belongs to offline ingest), so this
    /// would previously double the scale when a worker plan was present.
    #[test]
    fn parallel_merge_scales_plan_rows_exactly_once() {
        fn gather_plan(plan_rows: f64, actual_rows: f64) -> serde_json::Value {
            serde_json::json!([{
                "Plan": {
                    "Node Type": "Gather",
                    "Plan Rows": 1,
                    "Actual Rows": 0,
                    "Actual Loops": 1,
                    "Workers Planned": 1,
                    "Workers Launched": 1,
                    "Plans": [{
                        "Node Type": "Seq Scan",
                        "Parent Relationship": "Outer",
                        "Plan Rows": plan_rows,
                        "Actual Rows": actual_rows,
                        "Actual Loops": 1
                    }]
                }
            }])
        }

        let leader = WorkerSample {
            kind: WorkerKind::Leader,
            queryid: 11,
            planid: 1,
            plan_json: gather_plan(500.0, 300.0),
            query_hash: 1,
        };
        let worker = WorkerSample {
            kind: WorkerKind::Worker,
            queryid: 11,
            planid: 1,
            plan_json: gather_plan(500.0, 300.0),
            query_hash: 1,
        };

        let mut leader_plan = PlanNode::parse_document(&leader.plan_json).unwrap();
        prepare_merge(&mut leader_plan);
        let mut worker_plan = PlanNode::parse_document(&worker.plan_json).unwrap();
        prepare_merge(&mut worker_plan);
        merge_rows(&mut leader_plan, &[worker_plan]);

        // NormalizePlanParam = 1 (base) + 1 (Workers Planned) = 2; applied once.
        assert_eq!(leader_plan.plans[0].plan_rows, 1000.0);
        assert_eq!(leader_plan.plans[0].actual_rows, Some(600.0));

        let samples = vec![leader, worker];
        let results = compute_progress(&samples, &NoRegression).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 11);
    }

    #[test]
    fn modify_table_root_does_not_crash_orchestrator() {
        let plan_json = serde_json::json!([{
            "Plan": {
                "Node Type": "ModifyTable",
                "Plan Rows": 1,
                "Actual Rows": 1,
                "Actual Loops": 1,
                "Plans": [{
                    "Node Type": "Seq Scan",
                    "Plan Rows": 1,
                    "Actual Rows": 1,
                    "Actual Loops": 1
                }]
            }
        }]);
        let samples = vec![WorkerSample {
            kind: WorkerKind::Leader,
            queryid: 9,
            planid: 1,
            plan_json,
            query_hash: 1,
        }];
        let results = compute_progress(&samples, &NoRegression).unwrap();
        assert_eq!(results[0].1, 1.0);
        let _ = NodeType::ModifyTable;
    }
}
