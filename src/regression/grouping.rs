//! Grouping: accumulate many historical executions of the same
//! (queryid, planid) into one tree where each sample's numeric values occupy
//! the same list index everywhere.
//!
//! The source keeps this generic over an open dict; here the fields the
//! regression fitter actually reads (`Plan Rows`, `Actual Rows`, sort-space)
//! are typed `Vec<f64>` columns, and every other "grouping object" scalar
//! rides along as an aligned `Vec<serde_json::Value>` in `extra_lists` so
//! append semantics stay generic without inventing a column for every
//! PostgreSQL counter this core never interprets.

use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::error::{PlanPulseError, Result};
use crate::plan::tree::{NodeType, ParentRelationship};

/// Fields deleted outright before grouping: timing, buffer/WAL usage,
/// triggers, JIT. None of these feed any algorithm downstream.
pub const UNNECESSARY_OBJECTS: &[&str] = &[
    "I/O Read Time",
    "I/O Write Time",
    "Planning Time",
    "Execution Time",
    "Actual Startup Time",
    "Actual Total Time",
    "Time",
    "Actual duration Time",
    "BufferUsage_Start",
    "WalUsage_Start",
    "BufferUsage",
    "WalUsage",
    "Triggers",
    "JIT",
];

/// Scalar fields promoted to single-element lists on first sight, then
/// appended to on every subsequent sample.
pub const GROUPING_OBJECTS: &[&str] = &[
    "Workers",
    "NormalizePlanParam",
    "NormalizeParam",
    "Plan Rows",
    "Actual Rows",
    "Actual Loops",
    "Rows Removed by Filter",
    "Rows Removed by Index Recheck",
    "Rows Removed by Join Filter",
    "Rows Removed by Conflict Filter",
    "Workers Planned",
    "Workers Launched",
    "Worker",
    "Worker Number",
    "Heap Fetches",
    "Conflicting Tuples",
    "Tuples Inserted",
    "Group Count",
    "Startup Cost",
    "Total Cost",
    "Plan Width",
    "Shared Hit Blocks",
    "Shared Read Blocks",
    "Shared Dirtied Blocks",
    "Shared Written Blocks",
    "Local Hit Blocks",
    "Local Read Blocks",
    "Local Dirtied Blocks",
    "Local Written Blocks",
    "Temp Read Blocks",
    "Temp Written Blocks",
    "Sort Space Used",
    "Sort Space Type",
    "Peak Memory Usage",
    "Original Hash Batches",
    "Original Hash Buckets",
    "Hash Batches",
    "Hash Buckets",
    "Sort Methods Used",
    "Sort Space Memory",
    "Average Sort Space Used",
    "Peak Sort Space Used",
    "Exact Heap Blocks",
    "Lossy Heap Blocks",
    "Function Call",
    "Calls",
    "Target Tables",
    "Conflict Resolution",
    "Conflict Arbiter Indexes",
    "Sampling Method",
    "Sampling Parameters",
    "Repeatable Seed",
    "Table Function Name",
    "Presorted Key",
    "Full-sort Groups",
    "Pre-sorted Groups",
    "Subplans Removed",
    "Index Cond",
    "Recheck Cond",
    "TID Cond",
    "Merge Cond",
    "Hash Cond",
    "Filter",
    "Join Filter",
];

/// One node of a grouped tree: the typed columns the fitter reads, plus a
/// generic bag of every other grouping-object column, aligned by index.
#[derive(Debug, Clone)]
pub struct GroupedPlanNode {
    pub node_type: NodeType,
    pub parent_relationship: Option<ParentRelationship>,
    pub relation_name: Option<String>,
    pub schema: Option<String>,
    pub alias: Option<String>,
    pub plans: Vec<GroupedPlanNode>,

    pub plan_rows: Vec<f64>,
    pub actual_rows: Vec<f64>,
    pub sort_space_type: Vec<String>,
    pub sort_space_used: Vec<f64>,

    /// Every other `GROUPING_OBJECTS` field, aligned by sample index.
    pub extra_lists: BTreeMap<String, Vec<Json>>,
}

impl GroupedPlanNode {
    fn seed_from(node: &crate::plan::tree::PlanNode) -> GroupedPlanNode {
        let mut extra_lists = BTreeMap::new();
        for key in GROUPING_OBJECTS {
            if matches!(*key, "Plan Rows" | "Actual Rows" | "Sort Space Used" | "Sort Space Type") {
                continue;
            }
            if let Some(v) = node.extras.get(*key) {
                extra_lists.insert((*key).to_string(), vec![v.clone()]);
            }
        }
        GroupedPlanNode {
            node_type: node.node_type.clone(),
            parent_relationship: node.parent_relationship,
            relation_name: node.relation_name.clone(),
            schema: node.schema.clone(),
            alias: node.alias.clone(),
            plans: node.plans.iter().map(GroupedPlanNode::seed_from).collect(),
            plan_rows: vec![node.plan_rows],
            actual_rows: vec![node.actual_rows.unwrap_or(0.0)],
            sort_space_type: node.sort_space_type.clone().into_iter().collect(),
            sort_space_used: node.sort_space_used.into_iter().collect(),
            extra_lists,
        }
    }

    fn append_from(&mut self, node: &crate::plan::tree::PlanNode) -> Result<()> {
        if self.node_type != node.node_type || self.plans.len() != node.plans.len() {
            return Err(PlanPulseError::PlanShapeMismatch(format!(
                "{} (grouped) vs {} (sample)",
                self.node_type, node.node_type
            )));
        }
        self.plan_rows.push(node.plan_rows);
        self.actual_rows.push(node.actual_rows.unwrap_or(0.0));
        if let Some(t) = &node.sort_space_type {
            self.sort_space_type.push(t.clone());
        }
        if let Some(u) = node.sort_space_used {
            self.sort_space_used.push(u);
        }
        for key in GROUPING_OBJECTS {
            if matches!(*key, "Plan Rows" | "Actual Rows" | "Sort Space Used" | "Sort Space Type") {
                continue;
            }
            if let Some(v) = node.extras.get(*key) {
                self.extra_lists
                    .entry((*key).to_string())
                    .or_default()
                    .push(v.clone());
            }
        }
        for (gc, nc) in self.plans.iter_mut().zip(node.plans.iter()) {
            gc.append_from(nc)?;
        }
        Ok(())
    }
}

/// Fold a single freshly-parsed plan sample into an existing grouped tree (or
/// seed one if `existing` is `None`). The unnecessary-objects deletion is
/// implicit: this only ever reads the typed fields and `GROUPING_OBJECTS`
/// keys, so deleted/irrelevant attributes are never consulted regardless of
/// whether the caller stripped them from the source JSON.
pub fn combine(
    existing: Option<GroupedPlanNode>,
    sample: &crate::plan::tree::PlanNode,
) -> Result<GroupedPlanNode> {
    match existing {
        None => Ok(GroupedPlanNode::seed_from(sample)),
        Some(mut tree) => {
            tree.append_from(sample)?;
            Ok(tree)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tree::PlanNode;

    fn scan(plan_rows: f64, actual_rows: f64) -> PlanNode {
        let mut n = PlanNode::new(NodeType::SeqScan);
        n.plan_rows = plan_rows;
        n.actual_rows = Some(actual_rows);
        n
    }

    #[test]
    fn seed_then_append_builds_aligned_lists() {
        let sample1 = scan(10.0, 20.0);
        let sample2 = scan(20.0, 40.0);
        let grouped = combine(None, &sample1).unwrap();
        let grouped = combine(Some(grouped), &sample2).unwrap();
        assert_eq!(grouped.plan_rows, vec![10.0, 20.0]);
        assert_eq!(grouped.actual_rows, vec![20.0, 40.0]);
    }

    #[test]
    fn shape_mismatch_is_detected() {
        let sample1 = scan(10.0, 20.0);
        let mut sample2 = PlanNode::new(NodeType::IndexScan);
        sample2.plan_rows = 5.0;
        sample2.actual_rows = Some(5.0);
        let grouped = combine(None, &sample1).unwrap();
        assert!(combine(Some(grouped), &sample2).is_err());
    }
}
