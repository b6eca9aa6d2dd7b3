//! Real-time completion progress estimation for an in-flight relational
//! query, built from three coupled subsystems operating over annotated plan
//! trees:
//!
//!  - [`plan`]: the plan tree model, parallel normalization, and row-merging
//!    (fusing a leader plan with zero or more per-worker plans).
//!  - [`regression`]: grouping many historical executions of the same
//!    (queryid, planid) and fitting per-node-type row-count models.
//!  - [`progress`]: turning a single in-flight merged plan into a progress
//!    scalar, either via stored regression parameters or a heuristic rule
//!    engine, and the query-time orchestrator that ties the three together.
//!
//! [`repository`] specifies (but does not fully implement) the on-disk
//! contract these subsystems are driven by; [`config`] and [`permissions`]
//! cover the host configuration file and its permission ceilings; [`error`]
//! is the crate-wide error type.

pub mod config;
pub mod error;
pub mod logging;
pub mod permissions;
pub mod plan;
pub mod progress;
pub mod regression;
pub mod repository;

pub use error::{PlanPulseError, Result};
