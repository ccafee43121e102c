/*!
 * Logging functionality for devflow.
 *
 * This module provides tracing setup so that hosts and drivers share one
 * logging bootstrap.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with verbose diagnostics enabled.
///
/// Verbose mode drops the filter to `debug`, which is the level the worker
/// loop and effect engine use for their per-command diagnostics.
pub fn init_verbose() -> Result<()> {
    init_with_filter("debug")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "devflow=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}
