//! The plan tree model and the transforms that turn a raw EXPLAIN document
//! plus zero or more worker samples into a single normalized, merged tree.

pub mod merge;
pub mod normalize;
pub mod tree;

pub use merge::{add_rows, extrapolate_rows, merge_rows};
pub use normalize::{prepare_merge, WorkerCounts};
pub use tree::{ArityClass, NodeState, NodeType, ParentRelationship, PlanNode, WorkerStats};
