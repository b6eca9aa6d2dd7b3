//! Plan-row replacement: bottom-up rewrite of `Plan Rows` in a live plan
//! using a matching regression parameter tree.

use crate::plan::tree::{ArityClass, PlanNode};
use crate::regression::fit::RegressionParamNode;

/// Rewrite `node`'s (and its subtree's) `Plan Rows` bottom-up using `param`,
/// storing the applied coefficients on each node as it goes. `node` and
/// `param` must share the same shape.
pub fn replace_plan_rows(node: &mut PlanNode, param: &RegressionParamNode) {
    for (child, child_param) in node.plans.iter_mut().zip(param.plans.iter()) {
        replace_plan_rows(child, child_param);
    }

    node.coefficient = Some(param.coefficient.clone());
    if !param.coefficient2.is_empty() {
        node.coefficient2 = Some(param.coefficient2.clone());
    }
    if !param.intercept.is_empty() {
        node.intercept = Some(param.intercept.clone());
    }

    match node.node_type.arity_class() {
        ArityClass::Join if node.node_type.is_nested_loop_class() => {
            let xo = node.plans.first().map(|c| c.plan_rows).unwrap_or(0.0);
            let xi = node.plans.get(1).map(|c| c.plan_rows).unwrap_or(0.0);
            let c = param.coefficient.first().copied().unwrap_or(1.0);
            node.plan_rows = (c * xo * xi).round();
        }
        ArityClass::Join if node.node_type.is_hash_or_merge_join() => {
            let xo = node.plans.first().map(|c| c.plan_rows).unwrap_or(0.0);
            let xi = node.plans.get(1).map(|c| c.plan_rows).unwrap_or(0.0);
            let coef = &param.coefficient;
            let intercept = param.intercept.first().copied().unwrap_or(0.0);
            let new_rows = if coef.len() >= 2 && coef[0] == 0.0 && coef[1] == 0.0 {
                let c2 = param.coefficient2.first().copied().unwrap_or(0.0);
                c2 * xo * xi + intercept
            } else {
                let a = coef.first().copied().unwrap_or(0.0);
                let b = coef.get(1).copied().unwrap_or(0.0);
                a * xo + b * xi + intercept
            };
            node.plan_rows = new_rows.round();
        }
        _ => {
            let a = param.coefficient.first().copied().unwrap_or(1.0);
            let c = param.intercept.first().copied().unwrap_or(0.0);
            let normalize_plan_param = node.normalize_plan_param.unwrap_or(1.0);
            let normalize_param = node.normalize_param.unwrap_or(1.0).max(f64::MIN_POSITIVE);
            node.plan_rows = ((a * node.plan_rows + c) * normalize_plan_param / normalize_param).round();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::NodeType;
    use crate::regression::fit::RegressionParamNode;

    fn identity_param(nt: NodeType) -> RegressionParamNode {
        RegressionParamNode {
            node_type: nt,
            parent_relationship: None,
            relation_name: None,
            schema: None,
            alias: None,
            merge_flag: None,
            coefficient: vec![1.0],
            coefficient2: vec![],
            intercept: vec![0.0],
            plans: vec![],
            sort_space_used: None,
        }
    }

    #[test]
    fn identity_params_preserve_plan_rows() {
        let mut node = PlanNode::new(NodeType::SeqScan);
        node.plan_rows = 42.0;
        node.normalize_param = Some(1.0);
        node.normalize_plan_param = Some(1.0);
        let param = identity_param(NodeType::SeqScan);
        replace_plan_rows(&mut node, &param);
        assert_eq!(node.plan_rows, 42.0);
    }

    #[test]
    fn nested_loop_replacement_multiplies_children() {
        let mut outer = PlanNode::new(NodeType::SeqScan);
        outer.plan_rows = 10.0;
        outer.normalize_param = Some(1.0);
        outer.normalize_plan_param = Some(1.0);
        let mut inner = PlanNode::new(NodeType::SeqScan);
        inner.plan_rows = 4.0;
        inner.normalize_param = Some(1.0);
        inner.normalize_plan_param = Some(1.0);
        let mut join = PlanNode::new(NodeType::NestedLoop);
        join.plans.push(outer);
        join.plans.push(inner);

        let outer_param = identity_param(NodeType::SeqScan);
        let inner_param = identity_param(NodeType::SeqScan);
        let mut join_param = RegressionParamNode {
            node_type: NodeType::NestedLoop,
            parent_relationship: None,
            relation_name: None,
            schema: None,
            alias: None,
            merge_flag: None,
            coefficient: vec![1.8],
            coefficient2: vec![],
            intercept: vec![],
            plans: vec![],
            sort_space_used: None,
        };
        join_param.plans.push(outer_param);
        join_param.plans.push(inner_param);

        replace_plan_rows(&mut join, &join_param);
        assert_eq!(join.plan_rows, (1.8 * 10.0 * 4.0).round());
    }
}
