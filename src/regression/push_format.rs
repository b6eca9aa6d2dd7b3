//! Parameter push format: serializes a [`RegressionParamNode`] tree into
//! the `;`-joined record format written into the target database's
//! `query_plan.reg` table by the (out-of-scope) push driver.
//!
//! Pushing the serialized string anywhere is out of scope here; only the
//! format itself is specified and implemented.

use crate::plan::tree::ArityClass;
use crate::regression::fit::RegressionParamNode;

fn format_list(xs: &[f64]) -> String {
    xs.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn relation_tuple(node: &RegressionParamNode) -> String {
    format!(
        "{}.{}.{}",
        node.schema.as_deref().unwrap_or(""),
        node.relation_name.as_deref().unwrap_or(""),
        node.alias.as_deref().unwrap_or(""),
    )
}

fn is_true_leaf(node: &RegressionParamNode) -> bool {
    node.plans.is_empty()
}

/// One `;`-joined record per join-class node and true leaf:
/// `{NodeType:(rtables):(outer_rtables):(inner_rtables):Coefficient:Coefficient2:Intercept:MergeFlag}`.
pub fn format_params(root: &RegressionParamNode) -> String {
    let mut records = Vec::new();
    collect(root, &mut records);
    records.join(";")
}

fn collect(node: &RegressionParamNode, out: &mut Vec<String>) {
    let is_join = node.node_type.arity_class() == ArityClass::Join;
    if is_join || is_true_leaf(node) {
        let outer_rtables = node.plans.first().map(relation_tuple).unwrap_or_default();
        let inner_rtables = node.plans.get(1).map(relation_tuple).unwrap_or_default();
        let record = format!(
            "{{{}:({}):({}):({}):{}:{}:{}:{}}}",
            node.node_type,
            relation_tuple(node),
            outer_rtables,
            inner_rtables,
            format_list(&node.coefficient),
            format_list(&node.coefficient2),
            format_list(&node.intercept),
            node.merge_flag.unwrap_or(false),
        );
        out.push(record);
    }
    for child in &node.plans {
        collect(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::NodeType;

    #[test]
    fn leaf_record_has_expected_shape() {
        let mut leaf = RegressionParamNode {
            node_type: NodeType::SeqScan,
            parent_relationship: None,
            relation_name: Some("orders".into()),
            schema: Some("public".into()),
            alias: Some("o".into()),
            merge_flag: Some(false),
            coefficient: vec![2.0],
            coefficient2: vec![],
            intercept: vec![0.0],
            plans: vec![],
            sort_space_used: None,
        };
        leaf.coefficient2 = vec![0.0];
        let out = format_params(&leaf);
        assert!(out.starts_with("{Seq Scan:(public.orders.o):"));
        assert!(out.contains("2:"));
    }
}
