//! Regression fitter: one least-squares model per node, selected by
//! `NodeType` family, producing a parameter skeleton tree.

use crate::plan::tree::{ArityClass, NodeType, ParentRelationship};
use crate::regression::grouping::GroupedPlanNode;

/// Structurally parallel to [`GroupedPlanNode`]/`PlanNode`, but retains only
/// what query-time replacement and rule evaluation need: identity, shape,
/// and the learned coefficients.
#[derive(Debug, Clone)]
pub struct RegressionParamNode {
    pub node_type: NodeType,
    pub parent_relationship: Option<ParentRelationship>,
    pub relation_name: Option<String>,
    pub schema: Option<String>,
    pub alias: Option<String>,
    pub merge_flag: Option<bool>,
    pub coefficient: Vec<f64>,
    pub coefficient2: Vec<f64>,
    pub intercept: Vec<f64>,
    pub plans: Vec<RegressionParamNode>,
    /// Present only at the tree root, when any sampled node recorded disk
    /// sort spill.
    pub sort_space_used: Option<f64>,
}

impl RegressionParamNode {
    fn shell(node_type: NodeType) -> Self {
        RegressionParamNode {
            node_type,
            parent_relationship: None,
            relation_name: None,
            schema: None,
            alias: None,
            merge_flag: None,
            coefficient: Vec::new(),
            coefficient2: Vec::new(),
            intercept: Vec::new(),
            plans: Vec::new(),
            sort_space_used: None,
        }
    }
}

fn round5(x: f64) -> f64 {
    (x * 1e5).round() / 1e5
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// y = a*x, no intercept, with the "looks constant" fallback.
fn fit_scan(x: &[f64], y: &[f64]) -> (f64, f64) {
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    if 250.0 * sum_y < sum_x {
        return (0.0, round5(mean(y)));
    }
    if sum_x == 0.0 {
        return (0.0, mean(y));
    }
    (sum_y / sum_x, 0.0)
}

/// Same as scan but without the "looks constant" branch.
fn fit_gather(x: &[f64], y: &[f64]) -> (f64, f64) {
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    if sum_x == 0.0 {
        return (0.0, mean(y));
    }
    (sum_y / sum_x, 0.0)
}

/// Single-coefficient product model: y ~= c * (xo * xi).
fn fit_nested_loop(xo: &[f64], xi: &[f64], y: &[f64]) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for ((a, b), c) in xo.iter().zip(xi.iter()).zip(y.iter()) {
        let p = a * b;
        num += p * c;
        den += p * p;
    }
    if den == 0.0 {
        1.0
    } else {
        num / den
    }
}

fn rmse(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() {
        return f64::INFINITY;
    }
    let sse: f64 = predicted
        .iter()
        .zip(actual.iter())
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    (sse / predicted.len() as f64).sqrt()
}

/// Ordinary least squares for y = a*xo + b*xi + c, via the normal equations
/// for a 3x3 system. An optional synthetic (0,0,0) point is appended before
/// solving to pull the intercept toward 0.
fn fit_multilinear(xo: &[f64], xi: &[f64], y: &[f64], with_zero_point: bool) -> Option<(f64, f64, f64)> {
    let mut xo = xo.to_vec();
    let mut xi = xi.to_vec();
    let mut y = y.to_vec();
    if with_zero_point {
        xo.push(0.0);
        xi.push(0.0);
        y.push(0.0);
    }
    let n = xo.len() as f64;
    if n < 3.0 {
        return None;
    }
    let sxo: f64 = xo.iter().sum();
    let sxi: f64 = xi.iter().sum();
    let sy: f64 = y.iter().sum();
    let sxoxo: f64 = xo.iter().map(|v| v * v).sum();
    let sxixi: f64 = xi.iter().map(|v| v * v).sum();
    let sxoxi: f64 = xo.iter().zip(xi.iter()).map(|(a, b)| a * b).sum();
    let sxoy: f64 = xo.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
    let sxiy: f64 = xi.iter().zip(y.iter()).map(|(a, b)| a * b).sum();

    // Normal equations:
    // [sxoxo sxoxi sxo] [a]   [sxoy]
    // [sxoxi sxixi sxi] [b] = [sxiy]
    // [sxo   sxi   n  ] [c]   [sy  ]
    solve_3x3(
        [[sxoxo, sxoxi, sxo], [sxoxi, sxixi, sxi], [sxo, sxi, n]],
        [sxoy, sxiy, sy],
    )
}

fn solve_3x3(mut m: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<(f64, f64, f64)> {
    for col in 0..3 {
        let mut pivot_row = col;
        let mut best = m[col][col].abs();
        for row in (col + 1)..3 {
            if m[row][col].abs() > best {
                best = m[row][col].abs();
                pivot_row = row;
            }
        }
        if best < 1e-12 {
            return None;
        }
        m.swap(col, pivot_row);
        b.swap(col, pivot_row);
        let pivot = m[col][col];
        for k in 0..3 {
            m[col][k] /= pivot;
        }
        b[col] /= pivot;
        for row in 0..3 {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            for k in 0..3 {
                m[row][k] -= factor * m[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some((b[0], b[1], b[2]))
}

/// Single-variable y = a*x + c, with the same zero-constraint fallback.
fn fit_single_var(x: &[f64], y: &[f64], with_zero_point: bool) -> Option<(f64, f64)> {
    let mut x = x.to_vec();
    let mut y = y.to_vec();
    if with_zero_point {
        x.push(0.0);
        y.push(0.0);
    }
    let n = x.len() as f64;
    if n < 2.0 {
        return None;
    }
    let sx: f64 = x.iter().sum();
    let sy: f64 = y.iter().sum();
    let sxx: f64 = x.iter().map(|v| v * v).sum();
    let sxy: f64 = x.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
    let denom = n * sxx - sx * sx;
    if denom.abs() < 1e-12 {
        return None;
    }
    let a = (n * sxy - sx * sy) / denom;
    let c = (sy - a * sx) / n;
    Some((a, c))
}

#[derive(Debug, Clone, Copy)]
enum JoinModel {
    /// (a_outer, a_inner, c)
    Multi(f64, f64, f64),
    /// outer-only: (a, c)
    Outer(f64, f64),
    /// inner-only: (a, c)
    Inner(f64, f64),
}

fn predict_join(model: JoinModel, xo: f64, xi: f64) -> f64 {
    match model {
        JoinModel::Multi(a, b, c) => a * xo + b * xi + c,
        JoinModel::Outer(a, c) => a * xo + c,
        JoinModel::Inner(a, c) => a * xi + c,
    }
}

/// Best-of-3-by-RMSE fit for Hash/Merge Join: multi-linear, outer-only,
/// inner-only, each refit without the zero-constraint point if any
/// coefficient comes back negative.
fn fit_hash_or_merge_join(xo: &[f64], xi: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut candidates: Vec<JoinModel> = Vec::new();

    if let Some((a, b, c)) = fit_multilinear(xo, xi, y, true) {
        if a < 0.0 || b < 0.0 {
            if let Some(refit) = fit_multilinear(xo, xi, y, false) {
                candidates.push(JoinModel::Multi(refit.0, refit.1, refit.2));
            }
        } else {
            candidates.push(JoinModel::Multi(a, b, c));
        }
    }
    if let Some((a, c)) = fit_single_var(xo, y, true) {
        if a < 0.0 {
            if let Some(refit) = fit_single_var(xo, y, false) {
                candidates.push(JoinModel::Outer(refit.0, refit.1));
            }
        } else {
            candidates.push(JoinModel::Outer(a, c));
        }
    }
    if let Some((a, c)) = fit_single_var(xi, y, true) {
        if a < 0.0 {
            if let Some(refit) = fit_single_var(xi, y, false) {
                candidates.push(JoinModel::Inner(refit.0, refit.1));
            }
        } else {
            candidates.push(JoinModel::Inner(a, c));
        }
    }

    if candidates.is_empty() {
        return (vec![0.0, 0.0], vec![0.0], vec![0.0]);
    }

    let best = candidates
        .into_iter()
        .min_by(|m1, m2| {
            let p1: Vec<f64> = xo.iter().zip(xi.iter()).map(|(a, b)| predict_join(*m1, *a, *b)).collect();
            let p2: Vec<f64> = xo.iter().zip(xi.iter()).map(|(a, b)| predict_join(*m2, *a, *b)).collect();
            rmse(&p1, y).partial_cmp(&rmse(&p2, y)).unwrap()
        })
        .unwrap();

    match best {
        JoinModel::Multi(a, b, c) => (vec![a, b], vec![0.0], vec![c]),
        JoinModel::Outer(a, c) => (vec![a, 0.0], vec![0.0], vec![c]),
        JoinModel::Inner(a, c) => (vec![0.0, a], vec![0.0], vec![c]),
    }
}

/// Fit the whole tree, returning a parameter skeleton. `grouped` must already
/// have relation identity propagated (see [`propagate_relation_names`]).
pub fn fit_tree(grouped: &GroupedPlanNode) -> RegressionParamNode {
    let mut param = fit_node(grouped);
    attach_sort_space_used(grouped, &mut param);
    param
}

fn fit_node(grouped: &GroupedPlanNode) -> RegressionParamNode {
    let mut param = RegressionParamNode::shell(grouped.node_type.clone());
    param.parent_relationship = grouped.parent_relationship;
    param.relation_name = grouped.relation_name.clone();
    param.schema = grouped.schema.clone();
    param.alias = grouped.alias.clone();

    match grouped.node_type.arity_class() {
        ArityClass::Scan => {
            let (a, c) = fit_scan(&grouped.plan_rows, &grouped.actual_rows);
            param.coefficient = vec![a];
            param.intercept = vec![c];
        }
        ArityClass::Pipeline if grouped.node_type == NodeType::Gather || grouped.node_type == NodeType::GatherMerge => {
            let (a, c) = fit_gather(&grouped.plan_rows, &grouped.actual_rows);
            param.coefficient = vec![a];
            param.intercept = vec![c];
        }
        ArityClass::Pipeline => {
            let (a, c) = fit_scan(&grouped.plan_rows, &grouped.actual_rows);
            param.coefficient = vec![a];
            param.intercept = vec![c];
        }
        ArityClass::Join if grouped.node_type.is_nested_loop_class() => {
            let (xo, xi) = grouped_children_rows(grouped);
            let c = fit_nested_loop(&xo, &xi, &grouped.actual_rows);
            param.coefficient = vec![c];
        }
        ArityClass::Join if grouped.node_type.is_hash_or_merge_join() => {
            let (xo, xi) = grouped_children_rows(grouped);
            let (coef, coef2, intercept) = fit_hash_or_merge_join(&xo, &xi, &grouped.actual_rows);
            param.coefficient = coef;
            param.coefficient2 = coef2;
            param.intercept = intercept;
        }
        ArityClass::Join => {
            let (a, c) = fit_scan(&grouped.plan_rows, &grouped.actual_rows);
            param.coefficient = vec![a];
            param.intercept = vec![c];
        }
        ArityClass::Special => {}
    }

    param.plans = grouped.plans.iter().map(fit_node).collect();
    param
}

/// For join-class nodes, `Plan Rows` of the outer/inner children, aligned by
/// sample (used as x_o/x_i against this node's own `Actual Rows` list).
fn grouped_children_rows(grouped: &GroupedPlanNode) -> (Vec<f64>, Vec<f64>) {
    let outer = grouped.plans.first().map(|c| c.plan_rows.clone()).unwrap_or_default();
    let inner = grouped.plans.get(1).map(|c| c.plan_rows.clone()).unwrap_or_default();
    (outer, inner)
}

/// Bottom-up: for any node missing Relation Name/Schema/Alias, inherit from
/// its Outer child (or the pair, for join-class nodes, preferring Outer).
pub fn propagate_relation_names(node: &mut GroupedPlanNode) {
    for child in &mut node.plans {
        propagate_relation_names(child);
    }
    if node.relation_name.is_none() && node.schema.is_none() && node.alias.is_none() {
        if let Some(outer) = node.plans.first() {
            node.relation_name = outer.relation_name.clone();
            node.schema = outer.schema.clone();
            node.alias = outer.alias.clone();
        }
        if node.node_type.arity_class() == ArityClass::Join {
            if let Some(inner) = node.plans.get(1) {
                if node.relation_name.is_none() {
                    node.relation_name = inner.relation_name.clone();
                }
                if node.schema.is_none() {
                    node.schema = inner.schema.clone();
                }
                if node.alias.is_none() {
                    node.alias = inner.alias.clone();
                }
            }
        }
    }
}

/// Attach the max disk sort-space usage across the whole tree to the
/// parameter tree's root, if any sample anywhere spilled to disk.
fn attach_sort_space_used(grouped: &GroupedPlanNode, root_param: &mut RegressionParamNode) {
    fn collect_max(node: &GroupedPlanNode, best: &mut Option<f64>) {
        let disk_max = node
            .sort_space_type
            .iter()
            .zip(node.sort_space_used.iter())
            .filter(|(t, _)| t.as_str() == "Disk")
            .map(|(_, u)| *u)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        if let Some(v) = disk_max {
            *best = Some(best.map_or(v, |a| a.max(v)));
        }
        for child in &node.plans {
            collect_max(child, best);
        }
    }
    let mut best = None;
    collect_max(grouped, &mut best);
    root_param.sort_space_used = best;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::NodeType;

    fn grouped_leaf(nt: NodeType, plan_rows: Vec<f64>, actual_rows: Vec<f64>) -> GroupedPlanNode {
        GroupedPlanNode {
            node_type: nt,
            parent_relationship: None,
            relation_name: None,
            schema: None,
            alias: None,
            plans: Vec::new(),
            plan_rows,
            actual_rows,
            sort_space_type: Vec::new(),
            sort_space_used: Vec::new(),
            extra_lists: Default::default(),
        }
    }

    #[test]
    fn scan_regression_fits_linear_model() {
        let grouped = grouped_leaf(NodeType::SeqScan, vec![10.0, 20.0], vec![20.0, 40.0]);
        let param = fit_tree(&grouped);
        assert_eq!(param.coefficient, vec![2.0]);
        assert_eq!(param.intercept, vec![0.0]);
    }

    #[test]
    fn scan_regression_falls_back_to_constant() {
        let grouped = grouped_leaf(
            NodeType::SeqScan,
            vec![1000.0, 1000.0, 1000.0],
            vec![3.0, 3.0, 3.0],
        );
        let param = fit_tree(&grouped);
        assert_eq!(param.coefficient, vec![0.0]);
        assert_eq!(param.intercept, vec![3.0]);
    }

    #[test]
    fn nested_loop_fit_uses_product_model() {
        let outer = grouped_leaf(NodeType::SeqScan, vec![2.0, 4.0], vec![2.0, 4.0]);
        let inner = grouped_leaf(NodeType::SeqScan, vec![3.0, 3.0], vec![3.0, 3.0]);
        let mut join = grouped_leaf(NodeType::NestedLoop, vec![1.0, 1.0], vec![6.0, 12.0]);
        join.plans.push(outer);
        join.plans.push(inner);
        let param = fit_tree(&join);
        assert!((param.coefficient[0] - 1.8).abs() < 1e-9);
    }

    #[test]
    fn relation_name_propagates_from_outer_child() {
        let mut outer = grouped_leaf(NodeType::SeqScan, vec![1.0], vec![1.0]);
        outer.relation_name = Some("orders".into());
        let inner = grouped_leaf(NodeType::SeqScan, vec![1.0], vec![1.0]);
        let mut join = grouped_leaf(NodeType::HashJoin, vec![1.0], vec![1.0]);
        join.plans.push(outer);
        join.plans.push(inner);
        propagate_relation_names(&mut join);
        assert_eq!(join.relation_name.as_deref(), Some("orders"));
    }
}
