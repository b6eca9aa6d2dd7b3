//! Rule engine: heuristic state adjustments applied only when no
//! regression parameters exist for a query. Runs after the progress
//! calculator's preparation pass has assigned initial `CurrentState`, and
//! before the bottom-up points calculation.

use crate::plan::tree::{NodeState, NodeType, PlanNode};

/// Apply R1-R6 recursively over the tree. Order matters: R1 first (it
/// reaches into children), then R2-R6 per node, top-down, then recurse.
pub fn apply_rules(node: &mut PlanNode) {
    apply_r1(node);
    apply_self_rules(node);
    for child in &mut node.plans {
        apply_rules(child);
    }
}

fn running(node: &PlanNode) -> bool {
    node.current_state == Some(NodeState::Running)
}

/// R1. Hash Join with Join Filter and Plan Rows <= Actual Rows => mark both
/// children Finished.
fn apply_r1(node: &mut PlanNode) {
    if node.node_type == NodeType::HashJoin
        && running(node)
        && node.join_filter.is_some()
        && node.plan_rows <= node.actual_rows.unwrap_or(0.0)
    {
        for child in &mut node.plans {
            child.current_state = Some(NodeState::Finished);
        }
    }
}

/// R2-R6, each guarded by `CurrentState == Running` on `node` itself.
fn apply_self_rules(node: &mut PlanNode) {
    if !running(node) {
        return;
    }

    let actual_rows = node.actual_rows.unwrap_or(0.0);
    let actual_loops = node.actual_loops.unwrap_or(0.0);

    // R2: (Materialize OR Hash) AND (Actual Loops>0 OR Actual Rows>0 OR MergeFlag=true)
    if matches!(node.node_type, NodeType::Materialize | NodeType::Hash)
        && (actual_loops > 0.0 || actual_rows > 0.0 || node.merge_flag == Some(true))
    {
        node.current_state = Some(NodeState::Finished);
        return;
    }

    // R3: scan-class, Inner, Actual Loops > 0
    if node.is_scan() && node.is_inner() && actual_loops > 0.0 {
        node.current_state = Some(NodeState::Finished);
        return;
    }

    // R4: scan-class, Outer, Plan Rows <= Actual Rows
    if node.is_scan() && node.is_outer() && node.plan_rows <= actual_rows {
        node.current_state = Some(NodeState::Finished);
        return;
    }

    // R5: scan-class, neither Outer nor Inner
    if node.is_scan() && !node.is_outer() && !node.is_inner() {
        node.current_state = Some(NodeState::Finished);
        return;
    }

    // R6: Hash Join or Merge Join without Join Filter: corrective rewrite,
    // not a state transition.
    if matches!(node.node_type, NodeType::HashJoin | NodeType::MergeJoin)
        && node.join_filter.is_none()
        && node.plan_rows * 5.0 < actual_rows
    {
        if let Some(outer) = node.plans.first() {
            node.plan_rows = outer.plan_rows;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::ParentRelationship;
    use rstest::rstest;

    fn running_scan(plan_rows: f64, actual_rows: f64, rel: ParentRelationship) -> PlanNode {
        let mut n = PlanNode::new(NodeType::SeqScan);
        n.plan_rows = plan_rows;
        n.actual_rows = Some(actual_rows);
        n.actual_loops = Some(0.0);
        n.parent_relationship = Some(rel);
        n.current_state = Some(NodeState::Running);
        n
    }

    fn running_node_of(node_type: NodeType, rel: ParentRelationship) -> PlanNode {
        let mut n = PlanNode::new(node_type);
        n.plan_rows = 10.0;
        n.actual_rows = Some(0.0);
        n.actual_loops = Some(0.0);
        n.parent_relationship = Some(rel);
        n.current_state = Some(NodeState::Running);
        n
    }

    /// R5 applies uniformly across every scan-class NodeType when the node
    /// is neither Outer nor Inner — check several representative members of
    /// the closed set, not just Seq Scan.
    #[rstest]
    #[case(NodeType::SeqScan)]
    #[case(NodeType::IndexOnlyScan)]
    #[case(NodeType::BitmapHeapScan)]
    #[case(NodeType::FunctionScan)]
    #[case(NodeType::CteScan)]
    fn r5_finishes_scan_class_nodes_without_outer_or_inner(#[case] node_type: NodeType) {
        let mut node = running_node_of(node_type, ParentRelationship::Subquery);
        apply_self_rules(&mut node);
        assert_eq!(node.current_state, Some(NodeState::Finished));
    }

    #[test]
    fn r3_finishes_inner_scan_with_loops() {
        let mut inner = running_scan(10.0, 10.0, ParentRelationship::Inner);
        inner.actual_loops = Some(1.0);
        let mut outer = running_scan(100.0, 50.0, ParentRelationship::Outer);

        let mut join = PlanNode::new(NodeType::HashJoin);
        join.plan_rows = 1.0;
        join.actual_rows = Some(0.0);
        join.current_state = Some(NodeState::Running);
        join.plans.push(outer.clone());
        join.plans.push(inner.clone());

        apply_rules(&mut join);
        assert_eq!(join.plans[1].current_state, Some(NodeState::Finished));
        assert_eq!(join.plans[0].current_state, Some(NodeState::Running));
        assert_eq!(join.current_state, Some(NodeState::Running));
        let _ = &mut outer;
    }

    #[test]
    fn r4_finishes_outer_scan_when_caught_up() {
        let mut outer = running_scan(50.0, 50.0, ParentRelationship::Outer);
        apply_self_rules(&mut outer);
        assert_eq!(outer.current_state, Some(NodeState::Finished));
    }

    #[test]
    fn r6_rewrites_plan_rows_without_changing_state() {
        let mut outer = running_scan(100.0, 100.0, ParentRelationship::Outer);
        let inner = running_scan(10.0, 10.0, ParentRelationship::Inner);
        let mut join = PlanNode::new(NodeType::HashJoin);
        join.plan_rows = 1.0;
        join.actual_rows = Some(10.0);
        join.current_state = Some(NodeState::Running);
        join.plans.push(outer.clone());
        join.plans.push(inner);

        apply_self_rules(&mut join);
        assert_eq!(join.plan_rows, 100.0);
        assert_eq!(join.current_state, Some(NodeState::Running));
        let _ = &mut outer;
    }
}
