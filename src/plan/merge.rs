//! Row-merging: folding worker row counts into a leader plan, both at
//! ingest time (`add_rows`) and at query time across concurrently sampled
//! worker plans (`merge_rows`), plus extrapolation for workers that have
//! already terminated.

use super::tree::PlanNode;

/// Ingestion-time fold: for every node carrying a `Workers` sub-list, fold the
/// per-worker counters into the node's own counters in place, and scale
/// `Plan Rows` by `NormalizePlanParam` on mergeable nodes. The scale only
/// applies where a `Workers` sub-list is actually present, matching nodes
/// that never ran in parallel in this particular execution even if their
/// position in the plan is generally mergeable. Call after
/// [`super::normalize::prepare_merge`] has annotated the tree.
pub fn add_rows(node: &mut PlanNode) {
    if !node.workers.is_empty() {
        if node.merge_flag == Some(true) {
            node.plan_rows *= node.normalize_plan_param.unwrap_or(1.0);
        }
        let extra_rows: f64 = node.workers.iter().map(|w| w.actual_rows).sum();
        let extra_loops: f64 = node.workers.iter().map(|w| w.actual_loops).sum();
        node.actual_rows = Some(node.actual_rows.unwrap_or(0.0) + extra_rows);
        node.actual_loops = Some(node.actual_loops.unwrap_or(0.0) + extra_loops);
    }
    for child in &mut node.plans {
        add_rows(child);
    }
}

/// Query-time merge: fold the `Actual Rows` of a list of concurrently sampled
/// worker plans (identical tree shape, per node position) into the leader,
/// scaling `Plan Rows` by `NormalizePlanParam` on mergeable nodes.
///
/// Traversal is synchronized across trees (rather than re-deriving a depth
/// index into each tree independently): since worker plans share the
/// leader's tree shape, walking all trees together in lock-step pre-order
/// reaches the same node at the same step in every tree, without the
/// fragility of three separate index lookups per node.
pub fn merge_rows(leader: &mut PlanNode, worker_plans: &[PlanNode]) {
    fn visit(leader: &mut PlanNode, workers: &[&PlanNode]) {
        if leader.merge_flag == Some(true) {
            let sum: f64 = workers.iter().filter_map(|w| w.actual_rows).sum();
            leader.plan_rows *= leader.normalize_plan_param.unwrap_or(1.0);
            leader.actual_rows = Some(leader.actual_rows.unwrap_or(0.0) + sum);
        }
        for (i, child) in leader.plans.iter_mut().enumerate() {
            let worker_children: Vec<&PlanNode> =
                workers.iter().filter_map(|w| w.plans.get(i)).collect();
            visit(child, &worker_children);
        }
    }
    let workers: Vec<&PlanNode> = worker_plans.iter().collect();
    visit(leader, &workers);
}

/// Extrapolate for workers that have already terminated and stopped
/// reporting: when fewer worker plans were supplied than `num_workers`
/// implies should still be running, scale every mergeable node's
/// `Actual Rows` by `num_workers / (observed_workers + 1)`.
///
/// The source's `extrapolate_rows` descends asymmetrically (`Plans` in one
/// branch, `Plan` in another) with an early return after the first list
/// element, which reads as a bug rather than an intentional "only the first
/// sibling" rule (see open question in the design notes). This applies the
/// scale factor uniformly to every mergeable node in the tree, which is the
/// only reading consistent with `MergeFlag` meaning "this node's counts must
/// be combined across workers" tree-wide rather than positionally.
pub fn extrapolate_rows(leader: &mut PlanNode, observed_workers: usize, num_workers: f64) {
    if (observed_workers as f64 + 1.0) >= num_workers {
        return;
    }
    let factor = num_workers / (observed_workers as f64 + 1.0);
    fn visit(node: &mut PlanNode, factor: f64) {
        if node.merge_flag == Some(true) {
            if let Some(actual) = node.actual_rows {
                node.actual_rows = Some(actual * factor);
            }
        }
        for child in &mut node.plans {
            visit(child, factor);
        }
    }
    visit(leader, factor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::normalize::prepare_merge;
    use crate::plan::tree::{NodeType, ParentRelationship};

    fn gather_with_scan(plan_rows: f64, actual_rows: f64) -> PlanNode {
        let mut gather = PlanNode::new(NodeType::Gather);
        gather.workers_planned = Some(2.0);
        gather.workers_launched = Some(2.0);
        let mut scan = PlanNode::new(NodeType::SeqScan);
        scan.parent_relationship = Some(ParentRelationship::Outer);
        scan.plan_rows = plan_rows;
        scan.actual_rows = Some(actual_rows);
        gather.plans.push(scan);
        gather
    }

    #[test]
    fn merge_rows_scales_and_sums_worker_counts() {
        let mut leader = gather_with_scan(1000.0, 300.0);
        prepare_merge(&mut leader);
        assert_eq!(leader.plans[0].normalize_plan_param, Some(3.0));

        let w1 = { let mut g = gather_with_scan(0.0, 300.0); prepare_merge(&mut g); g };
        let w2 = { let mut g = gather_with_scan(0.0, 300.0); prepare_merge(&mut g); g };

        merge_rows(&mut leader, &[w1, w2]);
        let scan = &leader.plans[0];
        assert_eq!(scan.actual_rows, Some(900.0));
        assert_eq!(scan.plan_rows, 3000.0);
    }

    #[test]
    fn extrapolation_scales_for_unreported_workers() {
        let mut leader = gather_with_scan(1000.0, 300.0);
        prepare_merge(&mut leader);
        let w1 = { let mut g = gather_with_scan(0.0, 300.0); prepare_merge(&mut g); g };

        merge_rows(&mut leader, &[w1]);
        assert_eq!(leader.plans[0].actual_rows, Some(600.0));

        extrapolate_rows(&mut leader, 1, 3.0);
        assert_eq!(leader.plans[0].actual_rows, Some(900.0));
    }

    #[test]
    fn extrapolation_noop_when_all_workers_present() {
        let mut leader = gather_with_scan(1000.0, 300.0);
        prepare_merge(&mut leader);
        extrapolate_rows(&mut leader, 2, 3.0);
        assert_eq!(leader.plans[0].actual_rows, Some(300.0));
    }

    #[test]
    fn merge_with_no_workers_leaves_actual_rows_unchanged() {
        let mut leader = gather_with_scan(1000.0, 300.0);
        prepare_merge(&mut leader);
        merge_rows(&mut leader, &[]);
        assert_eq!(leader.plans[0].actual_rows, Some(300.0));
        assert_eq!(leader.plans[0].plan_rows, 3000.0);
    }

    #[test]
    fn add_rows_only_scales_plan_rows_when_workers_list_present() {
        let mut leader = gather_with_scan(1000.0, 300.0);
        prepare_merge(&mut leader);
        add_rows(&mut leader);
        // Mergeable, but no `Workers` sub-list on this particular execution:
        // Plan Rows must stay untouched.
        assert_eq!(leader.plans[0].plan_rows, 1000.0);
        assert_eq!(leader.plans[0].actual_rows, Some(300.0));
    }

    #[test]
    fn add_rows_scales_and_folds_when_workers_list_present() {
        let mut leader = gather_with_scan(1000.0, 300.0);
        prepare_merge(&mut leader);
        leader.plans[0].workers.push(crate::plan::tree::WorkerStats {
            actual_rows: 150.0,
            actual_loops: 1.0,
        });
        leader.plans[0].workers.push(crate::plan::tree::WorkerStats {
            actual_rows: 150.0,
            actual_loops: 1.0,
        });
        add_rows(&mut leader);
        assert_eq!(leader.plans[0].plan_rows, 3000.0);
        assert_eq!(leader.plans[0].actual_rows, Some(600.0));
    }
}
