//! Everything that turns a merged, normalized plan tree into a progress
//! scalar: plan-row replacement, the heuristic rule engine, the points
//! calculator, and the query-time orchestrator that ties them together.

pub mod calc;
pub mod orchestrator;
pub mod replace;
pub mod rules;

pub use calc::{aggregate_progress, compute_points, prepare, strip_modify_table};
pub use orchestrator::{compute_progress, WorkerSample};
pub use replace::replace_plan_rows;
pub use rules::apply_rules;
