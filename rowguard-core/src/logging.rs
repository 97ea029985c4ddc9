//! Logging bootstrap for embedders of the validation core.
//!
//! The core itself only emits `tracing` events; hosts that want output on
//! stderr can initialize a subscriber here. A `RUST_LOG` directive, when set,
//! takes precedence over the verbosity flags.

use crate::Result;
use tracing_subscriber::EnvFilter;

/// Maps verbosity flags to a default level directive.
fn level_directive(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}

/// Initializes structured logging.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
/// * `quiet` - If true, only show ERROR level logs
///
/// A `RUST_LOG` environment directive overrides both flags.
///
/// # Errors
/// Fails if a global subscriber is already installed.
///
/// # Example
/// ```rust,no_run
/// use rowguard_core::logging::init_logging;
///
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(verbose, quiet)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| {
            crate::error::RowGuardError::configuration(format!(
                "Failed to initialize logging: {}",
                e
            ))
        })?;

    Ok(())
}
