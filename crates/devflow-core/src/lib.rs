/*!
 * devflow Core
 *
 * This crate provides the foundation for the devflow device-driver
 * framework: shared identifier and value types, error types, configuration,
 * logging bootstrap, and the sandboxed expression evaluator used by command
 * and response templates.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod expr;
pub mod logging;
pub mod prelude;
pub mod types;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use serde;
    pub use tracing;
    pub use uuid;
}

/// devflow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("devflow core {} initialized", VERSION);
    Ok(())
}
