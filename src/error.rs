//! Crate-wide error type.
//!
//! Mirrors the error kinds enumerated in the design: most variants are raised by
//! the core (plan parsing, regression, progress); `ConnectFailure` and
//! `SqlExecutionError` exist for the repository/database boundary, which this
//! crate only specifies as a trait (see [`crate::repository`]).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanPulseError>;

#[derive(Error, Debug)]
pub enum PlanPulseError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("permissions too loose for '{path}': mode {mode:o} exceeds reference {reference:o}")]
    PermissionsTooLoose {
        path: String,
        mode: u32,
        reference: u32,
    },

    #[error("could not connect to server '{0}'")]
    ConnectFailure(String),

    #[error("SQL execution failed: {0}")]
    SqlExecutionError(String),

    #[error("plan for seqid {seqid} is missing (only a .tmp file was present)")]
    PlanMissing { seqid: u64 },

    #[error("grouped plan shape diverges from the existing skeleton at node {0}")]
    PlanShapeMismatch(String),

    #[error("regression singularity: {0}")]
    RegressionSingularity(String),

    #[error("progress unavailable: planned points total is zero")]
    ProgressUnavailable,

    #[error("malformed plan JSON: {0}")]
    MalformedPlan(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
