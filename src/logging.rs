//! Logging initialization for the CLI binaries.
//!
//! Replaces the original bespoke file-backed logger with `tracing` +
//! `tracing-subscriber`, since both are already in the dependency table for
//! this crate's own instrumentation (`tracing::debug!`/`trace!` calls inside
//! `plan`/`regression`/`progress`) and a hand-rolled logger duplicates what
//! they already do well.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber. `verbosity` mirrors a CLI's
/// repeated `-v` flag count: 0 = warnings and above, 1 = info, 2 = debug,
/// 3+ = trace. `RUST_LOG` always takes precedence when set.
pub fn init(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();
}
