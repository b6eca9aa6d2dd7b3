//! Parallel normalization: `PrepareMerge`.
//!
//! A single pre-order pass that tags every node touched by `Actual Rows` with
//! `MergeFlag`, `NormalizeParam` and `NormalizePlanParam`, tracking whether the
//! current position is still reachable from a parallel ancestor by following
//! only outer edges.

use super::tree::{NodeType, PlanNode};

/// Result of a normalization pass: counts needed by extrapolation later.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerCounts {
    pub num_plan_workers: f64,
    pub num_workers: f64,
}

/// Annotate `root` in place. Returns the accumulated worker counts.
pub fn prepare_merge(root: &mut PlanNode) -> WorkerCounts {
    let mut w_launched = 1.0;
    let mut w_planned = 1.0;
    visit(root, false, &mut w_launched, &mut w_planned);
    WorkerCounts {
        num_plan_workers: w_planned,
        num_workers: w_launched,
    }
}

fn visit(node: &mut PlanNode, parent_mergeable_outer: bool, w_launched: &mut f64, w_planned: &mut f64) {
    if let Some(planned) = node.workers_planned {
        *w_planned += planned;
        *w_launched += node.workers_launched.unwrap_or(0.0);
    }

    let is_root_parallel_source = node.workers_planned.is_some();
    let reachable = parent_mergeable_outer || is_root_parallel_source;
    let mergeable = reachable && node.node_type != NodeType::Aggregate;

    if node.actual_rows.is_some() {
        if mergeable {
            node.merge_flag = Some(true);
            node.normalize_param = Some(*w_launched);
            node.normalize_plan_param = Some(*w_planned);
        } else {
            node.merge_flag = Some(false);
            node.normalize_param = Some(1.0);
            node.normalize_plan_param = Some(1.0);
        }
    }

    for (i, child) in node.plans.iter_mut().enumerate() {
        // Only the outer (first) edge preserves mergeability into descendants;
        // inner edges and subplans never do.
        let child_outer_path = mergeable && i == 0;
        visit(child, child_outer_path, w_launched, w_planned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::ParentRelationship;

    fn leaf(nt: NodeType) -> PlanNode {
        let mut n = PlanNode::new(nt);
        n.actual_rows = Some(1.0);
        n
    }

    #[test]
    fn sequential_plan_gets_identity_normalizers() {
        let mut root = leaf(NodeType::SeqScan);
        prepare_merge(&mut root);
        assert_eq!(root.merge_flag, Some(false));
        assert_eq!(root.normalize_param, Some(1.0));
        assert_eq!(root.normalize_plan_param, Some(1.0));
    }

    #[test]
    fn gather_subtree_along_outer_edge_is_mergeable() {
        let mut gather = PlanNode::new(NodeType::Gather);
        gather.workers_planned = Some(3.0);
        gather.workers_launched = Some(3.0);
        let mut scan = leaf(NodeType::SeqScan);
        scan.parent_relationship = Some(ParentRelationship::Outer);
        gather.plans.push(scan);

        let counts = prepare_merge(&mut gather);
        assert_eq!(counts.num_workers, 4.0);
        assert_eq!(counts.num_plan_workers, 4.0);

        let child = &gather.plans[0];
        assert_eq!(child.merge_flag, Some(true));
        assert_eq!(child.normalize_param, Some(4.0));
        assert_eq!(child.normalize_plan_param, Some(4.0));
    }

    #[test]
    fn inner_edge_breaks_mergeability() {
        let mut gather = PlanNode::new(NodeType::Gather);
        gather.workers_planned = Some(2.0);
        gather.workers_launched = Some(2.0);
        let mut join = PlanNode::new(NodeType::HashJoin);
        join.parent_relationship = Some(ParentRelationship::Outer);
        join.actual_rows = Some(5.0);
        let mut outer = leaf(NodeType::SeqScan);
        outer.parent_relationship = Some(ParentRelationship::Outer);
        let mut inner = leaf(NodeType::SeqScan);
        inner.parent_relationship = Some(ParentRelationship::Inner);
        join.plans.push(outer);
        join.plans.push(inner);
        gather.plans.push(join);

        prepare_merge(&mut gather);
        let join_ref = &gather.plans[0];
        assert_eq!(join_ref.merge_flag, Some(true));
        assert_eq!(join_ref.plans[0].merge_flag, Some(true));
        assert_eq!(join_ref.plans[1].merge_flag, Some(false));
    }

    #[test]
    fn aggregate_terminates_mergeability() {
        let mut gather = PlanNode::new(NodeType::Gather);
        gather.workers_planned = Some(2.0);
        gather.workers_launched = Some(2.0);
        let mut agg = leaf(NodeType::Aggregate);
        agg.parent_relationship = Some(ParentRelationship::Outer);
        let mut below = leaf(NodeType::SeqScan);
        below.parent_relationship = Some(ParentRelationship::Outer);
        agg.plans.push(below);
        gather.plans.push(agg);

        prepare_merge(&mut gather);
        assert_eq!(gather.plans[0].merge_flag, Some(false));
        assert_eq!(gather.plans[0].plans[0].merge_flag, Some(false));
    }
}
