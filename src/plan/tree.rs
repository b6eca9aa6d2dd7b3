//! The plan tree data model and the uniform traversal primitives other
//! components build on.
//!
//! Plan nodes are sometimes modeled as an open dictionary with depth-indexed
//! visits tracked via instance counters (`self._count`, `self._depth`).
//! Here the tree is a typed recursive struct and every traversal is pure
//! recursion that returns its accumulator, so nothing is reentrant-unsafe and
//! nothing needs resetting between calls.

use serde_json::{Map, Value as Json};
use std::fmt;

use crate::error::{PlanPulseError, Result};

/// The closed set of operator kinds the core understands, plus an escape
/// hatch for anything EXPLAIN can emit that the algorithms don't interpret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    // Scan-class (arity 0)
    Result,
    SeqScan,
    SampleScan,
    IndexScan,
    IndexOnlyScan,
    BitmapIndexScan,
    BitmapHeapScan,
    TidScan,
    FunctionScan,
    TableFunctionScan,
    ValuesScan,
    CteScan,
    NamedTuplestoreScan,
    WorkTableScan,
    ForeignScan,
    Aggregate,
    SetOp,
    Limit,
    // Pipeline-class (arity 1)
    Hash,
    ProjectSet,
    SubqueryScan,
    CustomScan,
    Materialize,
    Sort,
    IncrementalSort,
    Gather,
    GatherMerge,
    LockRows,
    Unique,
    WindowAgg,
    // Join-class (arity 2)
    Append,
    MergeAppend,
    RecursiveUnion,
    NestedLoop,
    MergeJoin,
    HashJoin,
    BitmapAnd,
    BitmapOr,
    // Special
    ModifyTable,
    /// Anything outside the closed set above; preserved verbatim.
    Other(String),
}

/// Which traversal/point-calculation shape a node type uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArityClass {
    Scan,
    Pipeline,
    Join,
    Special,
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Result => "Result",
            NodeType::SeqScan => "Seq Scan",
            NodeType::SampleScan => "Sample Scan",
            NodeType::IndexScan => "Index Scan",
            NodeType::IndexOnlyScan => "Index Only Scan",
            NodeType::BitmapIndexScan => "Bitmap Index Scan",
            NodeType::BitmapHeapScan => "Bitmap Heap Scan",
            NodeType::TidScan => "Tid Scan",
            NodeType::FunctionScan => "Function Scan",
            NodeType::TableFunctionScan => "Table Function Scan",
            NodeType::ValuesScan => "Values Scan",
            NodeType::CteScan => "CTE Scan",
            NodeType::NamedTuplestoreScan => "Named Tuplestore Scan",
            NodeType::WorkTableScan => "WorkTable Scan",
            NodeType::ForeignScan => "Foreign Scan",
            NodeType::Aggregate => "Aggregate",
            NodeType::SetOp => "SetOp",
            NodeType::Limit => "Limit",
            NodeType::Hash => "Hash",
            NodeType::ProjectSet => "ProjectSet",
            NodeType::SubqueryScan => "Subquery Scan",
            NodeType::CustomScan => "Custom Scan",
            NodeType::Materialize => "Materialize",
            NodeType::Sort => "Sort",
            NodeType::IncrementalSort => "Incremental Sort",
            NodeType::Gather => "Gather",
            NodeType::GatherMerge => "Gather Merge",
            NodeType::LockRows => "LockRows",
            NodeType::Unique => "Unique",
            NodeType::WindowAgg => "WindowAgg",
            NodeType::Append => "Append",
            NodeType::MergeAppend => "Merge Append",
            NodeType::RecursiveUnion => "Recursive Union",
            NodeType::NestedLoop => "Nested Loop",
            NodeType::MergeJoin => "Merge Join",
            NodeType::HashJoin => "Hash Join",
            NodeType::BitmapAnd => "BitmapAnd",
            NodeType::BitmapOr => "BitmapOr",
            NodeType::ModifyTable => "ModifyTable",
            NodeType::Other(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "Result" => NodeType::Result,
            "Seq Scan" => NodeType::SeqScan,
            "Sample Scan" => NodeType::SampleScan,
            "Index Scan" => NodeType::IndexScan,
            "Index Only Scan" => NodeType::IndexOnlyScan,
            "Bitmap Index Scan" => NodeType::BitmapIndexScan,
            "Bitmap Heap Scan" => NodeType::BitmapHeapScan,
            "Tid Scan" => NodeType::TidScan,
            "Function Scan" => NodeType::FunctionScan,
            "Table Function Scan" => NodeType::TableFunctionScan,
            "Values Scan" => NodeType::ValuesScan,
            "CTE Scan" => NodeType::CteScan,
            "Named Tuplestore Scan" => NodeType::NamedTuplestoreScan,
            "WorkTable Scan" => NodeType::WorkTableScan,
            "Foreign Scan" => NodeType::ForeignScan,
            "Aggregate" => NodeType::Aggregate,
            "SetOp" => NodeType::SetOp,
            "Limit" => NodeType::Limit,
            "Hash" => NodeType::Hash,
            "ProjectSet" => NodeType::ProjectSet,
            "Subquery Scan" => NodeType::SubqueryScan,
            "Custom Scan" => NodeType::CustomScan,
            "Materialize" => NodeType::Materialize,
            "Sort" => NodeType::Sort,
            "Incremental Sort" => NodeType::IncrementalSort,
            "Gather" => NodeType::Gather,
            "Gather Merge" => NodeType::GatherMerge,
            "LockRows" => NodeType::LockRows,
            "Unique" => NodeType::Unique,
            "WindowAgg" => NodeType::WindowAgg,
            "Append" => NodeType::Append,
            "Merge Append" => NodeType::MergeAppend,
            "Recursive Union" => NodeType::RecursiveUnion,
            "Nested Loop" => NodeType::NestedLoop,
            "Merge Join" => NodeType::MergeJoin,
            "Hash Join" => NodeType::HashJoin,
            "BitmapAnd" => NodeType::BitmapAnd,
            "BitmapOr" => NodeType::BitmapOr,
            "ModifyTable" => NodeType::ModifyTable,
            other => NodeType::Other(other.to_string()),
        }
    }

    pub fn arity_class(&self) -> ArityClass {
        use NodeType::*;
        match self {
            Result | SeqScan | SampleScan | IndexScan | IndexOnlyScan | BitmapIndexScan
            | BitmapHeapScan | TidScan | FunctionScan | TableFunctionScan | ValuesScan
            | CteScan | NamedTuplestoreScan | WorkTableScan | ForeignScan | Aggregate
            | SetOp | Limit => ArityClass::Scan,
            Hash | ProjectSet | SubqueryScan | CustomScan | Materialize | Sort
            | IncrementalSort | Gather | GatherMerge | LockRows | Unique | WindowAgg => {
                ArityClass::Pipeline
            }
            Append | MergeAppend | RecursiveUnion | NestedLoop | MergeJoin | HashJoin
            | BitmapAnd | BitmapOr => ArityClass::Join,
            ModifyTable => ArityClass::Special,
            Other(_) => ArityClass::Scan,
        }
    }

    /// The "nested-loop-class" family: operators whose output size is best
    /// modeled as a single coefficient times the product of both inputs.
    pub fn is_nested_loop_class(&self) -> bool {
        matches!(
            self,
            NodeType::Append
                | NodeType::MergeAppend
                | NodeType::RecursiveUnion
                | NodeType::NestedLoop
                | NodeType::BitmapAnd
                | NodeType::BitmapOr
        )
    }

    pub fn is_hash_or_merge_join(&self) -> bool {
        matches!(self, NodeType::MergeJoin | NodeType::HashJoin)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRelationship {
    Outer,
    Inner,
    Subquery,
    InitPlan,
    SubPlan,
    Other,
}

impl ParentRelationship {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Outer" => ParentRelationship::Outer,
            "Inner" => ParentRelationship::Inner,
            "Subquery" => ParentRelationship::Subquery,
            "InitPlan" => ParentRelationship::InitPlan,
            "SubPlan" => ParentRelationship::SubPlan,
            _ => ParentRelationship::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParentRelationship::Outer => "Outer",
            ParentRelationship::Inner => "Inner",
            ParentRelationship::Subquery => "Subquery",
            ParentRelationship::InitPlan => "InitPlan",
            ParentRelationship::SubPlan => "SubPlan",
            ParentRelationship::Other => "Other",
        }
    }
}

/// Per-worker counters nested under a node's `"Workers"` array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    pub actual_rows: f64,
    pub actual_loops: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    Running,
    Finished,
}

/// A single node of a live (in-flight or just-completed) plan tree.
///
/// Fields the core interprets are typed; everything else PostgreSQL's EXPLAIN
/// JSON carries (cost estimates, index conditions, output column lists, ...)
/// rides along untouched in `extras` so an annotated tree can be written back
/// out without losing information the core doesn't need.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub node_type: NodeType,
    pub parent_relationship: Option<ParentRelationship>,
    pub plans: Vec<PlanNode>,

    pub plan_rows: f64,
    pub actual_rows: Option<f64>,
    pub actual_loops: Option<f64>,

    pub workers_planned: Option<f64>,
    pub workers_launched: Option<f64>,
    pub workers: Vec<WorkerStats>,

    pub rows_removed_by_filter: Option<f64>,
    pub rows_removed_by_index_recheck: Option<f64>,
    pub rows_removed_by_join_filter: Option<f64>,
    pub rows_removed_by_conflict_filter: Option<f64>,

    pub relation_name: Option<String>,
    pub schema: Option<String>,
    pub alias: Option<String>,

    pub join_filter: Option<String>,
    pub sort_space_type: Option<String>,
    pub sort_space_used: Option<f64>,

    // Annotations computed by the core, attached in place.
    pub merge_flag: Option<bool>,
    pub normalize_param: Option<f64>,
    pub normalize_plan_param: Option<f64>,
    pub current_state: Option<NodeState>,
    pub expected_rows: Option<f64>,
    pub plan_points: Option<f64>,
    pub actual_points: Option<f64>,
    pub coefficient: Option<Vec<f64>>,
    pub coefficient2: Option<Vec<f64>>,
    pub intercept: Option<Vec<f64>>,

    pub extras: Map<String, Json>,
}

impl PlanNode {
    pub fn new(node_type: NodeType) -> Self {
        PlanNode {
            node_type,
            parent_relationship: None,
            plans: Vec::new(),
            plan_rows: 0.0,
            actual_rows: None,
            actual_loops: None,
            workers_planned: None,
            workers_launched: None,
            workers: Vec::new(),
            rows_removed_by_filter: None,
            rows_removed_by_index_recheck: None,
            rows_removed_by_join_filter: None,
            rows_removed_by_conflict_filter: None,
            relation_name: None,
            schema: None,
            alias: None,
            join_filter: None,
            sort_space_type: None,
            sort_space_used: None,
            merge_flag: None,
            normalize_param: None,
            normalize_plan_param: None,
            current_state: None,
            expected_rows: None,
            plan_points: None,
            actual_points: None,
            coefficient: None,
            coefficient2: None,
            intercept: None,
            extras: Map::new(),
        }
    }

    /// Pre-order count of nodes in this subtree.
    pub fn count_nodes(&self) -> usize {
        1 + self.plans.iter().map(PlanNode::count_nodes).sum::<usize>()
    }

    /// Apply `f` to every node, pre-order.
    pub fn map_in_place(&mut self, f: &mut impl FnMut(&mut PlanNode)) {
        f(self);
        for child in &mut self.plans {
            child.map_in_place(f);
        }
    }

    /// Find the k-th pre-order node (k in [1, N]) and return a mutable
    /// reference to it. Implemented as pure recursion over an accumulator
    /// rather than an instance counter, so it is reentrant.
    pub fn nth_preorder_mut(&mut self, k: usize) -> Option<&mut PlanNode> {
        fn visit<'a>(node: &'a mut PlanNode, k: usize, seen: &mut usize) -> Option<&'a mut PlanNode> {
            *seen += 1;
            if *seen == k {
                return Some(node);
            }
            for child in &mut node.plans {
                if let Some(found) = visit(child, k, seen) {
                    return Some(found);
                }
            }
            None
        }
        let mut seen = 0;
        visit(self, k, &mut seen)
    }

    pub fn nth_preorder(&self, k: usize) -> Option<&PlanNode> {
        fn visit<'a>(node: &'a PlanNode, k: usize, seen: &mut usize) -> Option<&'a PlanNode> {
            *seen += 1;
            if *seen == k {
                return Some(node);
            }
            for child in &node.plans {
                if let Some(found) = visit(child, k, seen) {
                    return Some(found);
                }
            }
            None
        }
        let mut seen = 0;
        visit(self, k, &mut seen)
    }

    /// Split children into (outer, inner, subplans) for join-class nodes.
    /// Position 0 is conventionally Outer, position 1 Inner; anything past
    /// that is a subplan and is ignored by join-specific logic.
    pub fn split_children(&self) -> (Option<&PlanNode>, Option<&PlanNode>, &[PlanNode]) {
        let outer = self.plans.first();
        let inner = self.plans.get(1);
        let subplans = if self.plans.len() > 2 {
            &self.plans[2..]
        } else {
            &[]
        };
        (outer, inner, subplans)
    }

    pub fn split_children_mut(&mut self) -> (Option<&mut PlanNode>, Option<&mut PlanNode>) {
        match self.plans.as_mut_slice() {
            [] => (None, None),
            [o] => (Some(o), None),
            [o, i, ..] => (Some(o), Some(i)),
        }
    }

    pub fn is_scan(&self) -> bool {
        self.node_type.arity_class() == ArityClass::Scan
    }

    pub fn is_outer(&self) -> bool {
        self.parent_relationship == Some(ParentRelationship::Outer)
    }

    pub fn is_inner(&self) -> bool {
        self.parent_relationship == Some(ParentRelationship::Inner)
    }

    /// Sum of the four "Removed Rows" variants present on this node.
    pub fn count_removed_rows(&self) -> f64 {
        self.rows_removed_by_filter.unwrap_or(0.0)
            + self.rows_removed_by_index_recheck.unwrap_or(0.0)
            + self.rows_removed_by_join_filter.unwrap_or(0.0)
            + self.rows_removed_by_conflict_filter.unwrap_or(0.0)
    }

    // -- JSON interop --------------------------------------------------

    /// Parse a single node (and its subtree) from an EXPLAIN (FORMAT JSON)
    /// node object.
    pub fn from_json(value: &Json) -> Result<PlanNode> {
        let obj = value
            .as_object()
            .ok_or_else(|| PlanPulseError::MalformedPlan("plan node is not an object".into()))?;

        let node_type_str = obj
            .get("Node Type")
            .and_then(Json::as_str)
            .ok_or_else(|| PlanPulseError::MalformedPlan("missing Node Type".into()))?;
        let mut node = PlanNode::new(NodeType::from_str(node_type_str));

        node.parent_relationship = obj
            .get("Parent Relationship")
            .and_then(Json::as_str)
            .map(ParentRelationship::from_str);

        node.plan_rows = obj.get("Plan Rows").and_then(Json::as_f64).unwrap_or(0.0);
        node.actual_rows = obj.get("Actual Rows").and_then(Json::as_f64);
        node.actual_loops = obj.get("Actual Loops").and_then(Json::as_f64);

        node.workers_planned = obj.get("Workers Planned").and_then(first_numeric);
        node.workers_launched = obj.get("Workers Launched").and_then(first_numeric);

        if let Some(Json::Array(workers)) = obj.get("Workers") {
            for w in workers {
                if let Some(wo) = w.as_object() {
                    node.workers.push(WorkerStats {
                        actual_rows: wo.get("Actual Rows").and_then(Json::as_f64).unwrap_or(0.0),
                        actual_loops: wo.get("Actual Loops").and_then(Json::as_f64).unwrap_or(0.0),
                    });
                }
            }
        }

        node.rows_removed_by_filter = obj.get("Rows Removed by Filter").and_then(Json::as_f64);
        node.rows_removed_by_index_recheck =
            obj.get("Rows Removed by Index Recheck").and_then(Json::as_f64);
        node.rows_removed_by_join_filter =
            obj.get("Rows Removed by Join Filter").and_then(Json::as_f64);
        node.rows_removed_by_conflict_filter =
            obj.get("Rows Removed by Conflict Filter").and_then(Json::as_f64);

        node.relation_name = obj.get("Relation Name").and_then(Json::as_str).map(str::to_string);
        node.schema = obj.get("Schema").and_then(Json::as_str).map(str::to_string);
        node.alias = obj.get("Alias").and_then(Json::as_str).map(str::to_string);

        node.join_filter = obj.get("Join Filter").and_then(Json::as_str).map(str::to_string);
        node.sort_space_type = obj.get("Sort Space Type").and_then(Json::as_str).map(str::to_string);
        node.sort_space_used = obj.get("Sort Space Used").and_then(Json::as_f64);

        const KNOWN: &[&str] = &[
            "Node Type",
            "Parent Relationship",
            "Plan Rows",
            "Actual Rows",
            "Actual Loops",
            "Workers Planned",
            "Workers Launched",
            "Workers",
            "Rows Removed by Filter",
            "Rows Removed by Index Recheck",
            "Rows Removed by Join Filter",
            "Rows Removed by Conflict Filter",
            "Relation Name",
            "Schema",
            "Alias",
            "Join Filter",
            "Sort Space Type",
            "Sort Space Used",
            "Plans",
            "Plan",
        ];
        for (k, v) in obj {
            if !KNOWN.contains(&k.as_str()) {
                node.extras.insert(k.clone(), v.clone());
            }
        }

        if let Some(Json::Array(children)) = obj.get("Plans") {
            for child in children {
                node.plans.push(PlanNode::from_json(child)?);
            }
        }

        Ok(node)
    }

    /// Parse a full EXPLAIN (FORMAT JSON) document: `[{"Plan": {...}, ...}]`.
    pub fn parse_document(value: &Json) -> Result<PlanNode> {
        let arr = value
            .as_array()
            .ok_or_else(|| PlanPulseError::MalformedPlan("plan document is not an array".into()))?;
        let first = arr
            .first()
            .ok_or_else(|| PlanPulseError::MalformedPlan("empty plan document".into()))?;
        let plan = first
            .get("Plan")
            .ok_or_else(|| PlanPulseError::MalformedPlan("document has no Plan".into()))?;
        PlanNode::from_json(plan)
    }

    /// Serialize this node (and subtree) back to a JSON node object,
    /// including every annotation the core has attached and every `extras`
    /// key carried through untouched.
    pub fn to_json(&self) -> Json {
        let mut obj = Map::new();
        obj.insert("Node Type".into(), Json::String(self.node_type.as_str().into()));
        if let Some(pr) = self.parent_relationship {
            obj.insert("Parent Relationship".into(), Json::String(pr.as_str().into()));
        }
        obj.insert("Plan Rows".into(), json_num(self.plan_rows));
        if let Some(v) = self.actual_rows {
            obj.insert("Actual Rows".into(), json_num(v));
        }
        if let Some(v) = self.actual_loops {
            obj.insert("Actual Loops".into(), json_num(v));
        }
        if let Some(v) = self.workers_planned {
            obj.insert("Workers Planned".into(), json_num(v));
        }
        if let Some(v) = self.workers_launched {
            obj.insert("Workers Launched".into(), json_num(v));
        }
        if !self.workers.is_empty() {
            let arr = self
                .workers
                .iter()
                .map(|w| {
                    let mut wo = Map::new();
                    wo.insert("Actual Rows".into(), json_num(w.actual_rows));
                    wo.insert("Actual Loops".into(), json_num(w.actual_loops));
                    Json::Object(wo)
                })
                .collect();
            obj.insert("Workers".into(), Json::Array(arr));
        }
        if let Some(v) = self.rows_removed_by_filter {
            obj.insert("Rows Removed by Filter".into(), json_num(v));
        }
        if let Some(v) = self.rows_removed_by_index_recheck {
            obj.insert("Rows Removed by Index Recheck".into(), json_num(v));
        }
        if let Some(v) = self.rows_removed_by_join_filter {
            obj.insert("Rows Removed by Join Filter".into(), json_num(v));
        }
        if let Some(v) = self.rows_removed_by_conflict_filter {
            obj.insert("Rows Removed by Conflict Filter".into(), json_num(v));
        }
        if let Some(v) = &self.relation_name {
            obj.insert("Relation Name".into(), Json::String(v.clone()));
        }
        if let Some(v) = &self.schema {
            obj.insert("Schema".into(), Json::String(v.clone()));
        }
        if let Some(v) = &self.alias {
            obj.insert("Alias".into(), Json::String(v.clone()));
        }
        if let Some(v) = &self.join_filter {
            obj.insert("Join Filter".into(), Json::String(v.clone()));
        }
        if let Some(v) = &self.sort_space_type {
            obj.insert("Sort Space Type".into(), Json::String(v.clone()));
        }
        if let Some(v) = self.sort_space_used {
            obj.insert("Sort Space Used".into(), json_num(v));
        }
        if let Some(v) = self.merge_flag {
            obj.insert("MergeFlag".into(), Json::Bool(v));
        }
        if let Some(v) = self.normalize_param {
            obj.insert("NormalizeParam".into(), json_num(v));
        }
        if let Some(v) = self.normalize_plan_param {
            obj.insert("NormalizePlanParam".into(), json_num(v));
        }
        if let Some(state) = self.current_state {
            let s = match state {
                NodeState::Waiting => "Waiting",
                NodeState::Running => "Running",
                NodeState::Finished => "Finished",
            };
            obj.insert("CurrentState".into(), Json::String(s.into()));
        }
        if let Some(v) = self.expected_rows {
            obj.insert("ExpectedRows".into(), json_num(v));
        }
        if let Some(v) = self.plan_points {
            obj.insert("PlanPoints".into(), json_num(v));
        }
        if let Some(v) = self.actual_points {
            obj.insert("ActualPoints".into(), json_num(v));
        }
        if let Some(v) = &self.coefficient {
            obj.insert(
                "Coefficient".into(),
                Json::Array(v.iter().map(|x| json_num(*x)).collect()),
            );
        }
        if let Some(v) = &self.coefficient2 {
            obj.insert(
                "Coefficient2".into(),
                Json::Array(v.iter().map(|x| json_num(*x)).collect()),
            );
        }
        if let Some(v) = &self.intercept {
            obj.insert(
                "Intercept".into(),
                Json::Array(v.iter().map(|x| json_num(*x)).collect()),
            );
        }
        for (k, v) in &self.extras {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if !self.plans.is_empty() {
            obj.insert(
                "Plans".into(),
                Json::Array(self.plans.iter().map(PlanNode::to_json).collect()),
            );
        }
        Json::Object(obj)
    }
}

fn first_numeric(v: &Json) -> Option<f64> {
    match v {
        Json::Array(a) => a.first().and_then(Json::as_f64),
        other => other.as_f64(),
    }
}

fn json_num(v: f64) -> Json {
    serde_json::Number::from_f64(v)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}
