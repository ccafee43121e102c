/*!
 * Prelude module for devflow core.
 *
 * Re-exports the commonly used types and functions so drivers and hosts can
 * import them in one line.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, Value};

// Re-export the expression evaluator
pub use crate::expr::{evaluate, evaluate_bool, evaluate_number, ExprError};

// Re-export config types
pub use crate::config::{Config, SharedConfig, WorkerDefaults};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
