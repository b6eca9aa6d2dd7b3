//! Grouping many historical executions into aligned samples, fitting
//! per-node-type regression models, and formatting the learned parameters
//! for the external push format.

pub mod fit;
pub mod grouping;
pub mod push_format;

pub use fit::{fit_tree, propagate_relation_names, RegressionParamNode};
pub use grouping::GroupedPlanNode;
pub use push_format::format_params;
