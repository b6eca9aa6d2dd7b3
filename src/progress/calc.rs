//! Progress calculator: preparation pass (state assignment) and
//! bottom-up `PlanPoints`/`ActualPoints` accumulation, aggregated into a
//! single progress scalar clamped to [0,1].

use crate::plan::tree::{NodeState, NodeType, PlanNode};

/// If the root is `ModifyTable`, strip it and descend into its sole child,
/// as progress estimation never applies to the write node itself.
pub fn strip_modify_table(root: PlanNode) -> PlanNode {
    if root.node_type == NodeType::ModifyTable {
        root.plans.into_iter().next().unwrap_or_else(|| PlanNode::new(NodeType::Result))
    } else {
        root
    }
}

fn cost(node_type: &NodeType, x: f64) -> f64 {
    match node_type {
        NodeType::Sort | NodeType::IncrementalSort => {
            if x <= 0.0 {
                0.0
            } else {
                x * x.log2()
            }
        }
        _ => x,
    }
}

/// Preparation pass: assign `ExpectedRows`/`ActualPoints`/`PlanPoints` = 0 and
/// an initial `CurrentState` to every node carrying `Actual Rows`.
/// `regression_mode` nodes are all pre-finished; heuristic-mode nodes run the
/// Waiting/Running/Finished state machine threaded across siblings.
pub fn prepare(root: &mut PlanNode, regression_mode: bool) {
    visit(root, regression_mode, false);

    fn visit(node: &mut PlanNode, regression_mode: bool, prior_sibling_running: bool) -> bool {
        if node.actual_rows.is_some() {
            node.expected_rows = Some(0.0);
            node.actual_points = Some(0.0);
            node.plan_points = Some(0.0);

            let state = if regression_mode {
                NodeState::Finished
            } else {
                let activity = node.actual_rows.unwrap_or(0.0) > 0.0
                    || node.actual_loops.unwrap_or(0.0) > 0.0
                    || node.count_removed_rows() > 0.0;
                if !activity {
                    NodeState::Waiting
                } else if prior_sibling_running && node.is_scan() {
                    NodeState::Finished
                } else {
                    NodeState::Running
                }
            };
            node.current_state = Some(state);
        }

        let mut prior_running = false;
        for child in &mut node.plans {
            visit(child, regression_mode, prior_running);
            prior_running = matches!(
                child.current_state,
                Some(NodeState::Running) | Some(NodeState::Finished)
            );
        }

        matches!(node.current_state, Some(NodeState::Running))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinCombine {
    Sum,
    Product,
    OuterOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinEstimate {
    Max,
    MaxPlanActual,
}

/// Heuristic-mode shape only: which `comb`/`est` §4.8 assigns to each
/// join-class operator. Regression mode uses a separate, simpler rule (see
/// [`compute_join_points`]) since the original only special-cases Hash/Merge
/// Join there and always multiplies for every other two-input operator.
fn join_shape(node_type: &NodeType) -> Option<(JoinCombine, JoinEstimate)> {
    use JoinCombine::*;
    use JoinEstimate::*;
    match node_type {
        NodeType::Append | NodeType::MergeAppend | NodeType::BitmapAnd | NodeType::BitmapOr => {
            Some((Sum, Max))
        }
        NodeType::RecursiveUnion | NodeType::NestedLoop => Some((Product, Max)),
        NodeType::MergeJoin => Some((OuterOnly, MaxPlanActual)),
        NodeType::HashJoin => Some((Sum, MaxPlanActual)),
        _ => None,
    }
}

/// Bottom-up points calculation over the whole tree. Must run after
/// [`prepare`] (and, in heuristic mode, after rule-engine adjustments).
pub fn compute_points(node: &mut PlanNode, regression_mode: bool) {
    for child in &mut node.plans {
        compute_points(child, regression_mode);
    }

    if node.actual_rows.is_none() {
        return;
    }

    if let Some((combine, estimate)) = join_shape(&node.node_type) {
        compute_join_points(node, regression_mode, combine, estimate);
    } else {
        compute_single_input_points(node, regression_mode);
    }
}

fn compute_single_input_points(node: &mut PlanNode, regression_mode: bool) {
    let r = node.count_removed_rows();
    let plan_rows = node.plan_rows;
    let actual_rows = node.actual_rows.unwrap_or(0.0);
    let node_type = node.node_type.clone();
    let f = |x: f64| cost(&node_type, x);

    if regression_mode {
        node.plan_points = Some(f(plan_rows.max(actual_rows)));
        node.actual_points = Some(f(actual_rows));
        node.expected_rows = Some(plan_rows.max(actual_rows));
        return;
    }

    if node.current_state == Some(NodeState::Finished) {
        node.expected_rows = Some(actual_rows);
        let points = f(actual_rows + r);
        node.plan_points = Some(points);
        node.actual_points = Some(points);
    } else {
        let expected = plan_rows.max(actual_rows);
        node.expected_rows = Some(expected);
        node.plan_points = Some(f(expected + r));
        node.actual_points = Some(f(actual_rows + r));
    }
}

fn compute_join_points(node: &mut PlanNode, regression_mode: bool, combine: JoinCombine, estimate: JoinEstimate) {
    let r = node.count_removed_rows();
    let (outer_expected, outer_plan, outer_actual) = child_summary(node.plans.first());
    let (inner_expected, inner_plan, inner_actual) = child_summary(node.plans.get(1));

    if regression_mode {
        // The original regression-mode join calculator special-cases only
        // Hash Join and Merge Join, gating on Coefficient2 > 0; every other
        // two-input operator (Append/Merge Append/Recursive Union/Nested
        // Loop/BitmapAnd/BitmapOr) always multiplies.
        let multiplicative = if node.node_type.is_hash_or_merge_join() {
            node.coefficient2
                .as_ref()
                .and_then(|c| c.first())
                .map(|c| *c > 0.0)
                .unwrap_or(false)
        } else {
            true
        };
        if multiplicative {
            node.plan_points = Some(outer_plan * inner_plan);
            node.actual_points = Some(outer_actual * inner_actual + r);
        } else {
            node.plan_points = Some(outer_plan + inner_plan);
            node.actual_points = Some(outer_actual + inner_actual + r);
        }
        node.expected_rows = Some(node.plan_points.unwrap_or(0.0));
        return;
    }

    let estimated = match combine {
        JoinCombine::Sum => outer_expected + inner_expected,
        JoinCombine::Product => outer_expected * inner_expected,
        JoinCombine::OuterOnly => outer_expected,
    };
    node.plan_points = Some(estimated);

    let actual_rows = node.actual_rows.unwrap_or(0.0);
    if node.current_state == Some(NodeState::Finished) {
        node.expected_rows = Some(estimated);
        node.actual_points = Some(actual_rows);
    } else if (estimated - r - actual_rows).abs() < f64::EPSILON {
        node.expected_rows = Some(actual_rows);
        node.actual_points = Some(estimated);
    } else {
        let est = match estimate {
            JoinEstimate::Max => node.plan_rows.max(estimated).max(actual_rows),
            JoinEstimate::MaxPlanActual => node.plan_rows.max(actual_rows),
        };
        node.expected_rows = Some(est);
        node.actual_points = Some(actual_rows + r);
    }
}

fn child_summary(child: Option<&PlanNode>) -> (f64, f64, f64) {
    match child {
        None => (0.0, 0.0, 0.0),
        Some(c) => (
            c.expected_rows.unwrap_or(c.plan_rows),
            c.expected_rows.unwrap_or(c.plan_rows),
            c.actual_rows.unwrap_or(0.0),
        ),
    }
}

/// Sum `PlanPoints`/`ActualPoints` across the whole tree and return the
/// clamped, rounded progress ratio.
pub fn aggregate_progress(root: &PlanNode) -> f64 {
    let (plan_sum, actual_sum) = sum_points(root);
    if plan_sum == 0.0 {
        return 0.0;
    }
    let ratio = (actual_sum / plan_sum).min(1.0).max(0.0);
    (ratio * 1e6).round() / 1e6
}

fn sum_points(node: &PlanNode) -> (f64, f64) {
    let mut plan_sum = node.plan_points.unwrap_or(0.0);
    let mut actual_sum = node.actual_points.unwrap_or(0.0);
    for child in &node.plans {
        let (p, a) = sum_points(child);
        plan_sum += p;
        actual_sum += a;
    }
    (plan_sum, actual_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::ParentRelationship;
    use crate::progress::rules::apply_rules;

    #[test]
    fn modify_table_is_stripped() {
        let mut root = PlanNode::new(NodeType::ModifyTable);
        let mut scan = PlanNode::new(NodeType::SeqScan);
        scan.plan_rows = 10.0;
        scan.actual_rows = Some(10.0);
        root.plans.push(scan);
        let stripped = strip_modify_table(root);
        assert_eq!(stripped.node_type, NodeType::SeqScan);
    }

    #[test]
    fn progress_is_one_when_actual_equals_plan() {
        let mut node = PlanNode::new(NodeType::SeqScan);
        node.plan_rows = 10.0;
        node.actual_rows = Some(10.0);
        prepare(&mut node, true);
        compute_points(&mut node, true);
        assert_eq!(aggregate_progress(&node), 1.0);
    }

    #[test]
    fn heuristic_rules_finish_inner_scan_with_loops() {
        let mut outer = PlanNode::new(NodeType::SeqScan);
        outer.plan_rows = 100.0;
        outer.actual_rows = Some(50.0);
        outer.actual_loops = Some(1.0);
        outer.parent_relationship = Some(ParentRelationship::Outer);

        let mut inner = PlanNode::new(NodeType::SeqScan);
        inner.plan_rows = 10.0;
        inner.actual_rows = Some(10.0);
        inner.actual_loops = Some(1.0);
        inner.parent_relationship = Some(ParentRelationship::Inner);

        let mut join = PlanNode::new(NodeType::HashJoin);
        join.plan_rows = 1.0;
        join.actual_rows = Some(0.0);
        join.actual_loops = Some(1.0);
        join.plans.push(outer);
        join.plans.push(inner);

        prepare(&mut join, false);
        apply_rules(&mut join);
        compute_points(&mut join, false);

        assert_eq!(join.plans[1].current_state, Some(NodeState::Finished));
        assert_eq!(join.plans[0].current_state, Some(NodeState::Running));

        let progress = aggregate_progress(&join);
        assert!(progress > 0.0 && progress < 1.0);
    }

    #[test]
    fn zero_plan_points_yields_zero_progress() {
        let mut node = PlanNode::new(NodeType::SeqScan);
        node.plan_rows = 0.0;
        node.actual_rows = Some(0.0);
        prepare(&mut node, false);
        compute_points(&mut node, false);
        assert_eq!(aggregate_progress(&node), 0.0);
    }
}
