/*!
 * Error types for the devflow driver crate.
 *
 * The taxonomy mirrors how failures are routed at runtime: validation
 * failures go back to the caller as a field map and never reach a worker,
 * transport and effect failures are isolated per unit of work, and only a
 * worker-level fault shuts a device down.
 */
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;
use devflow_core::error::Error as CoreError;
use devflow_core::expr::ExprError;

/// A structured action-validation failure: one message per failing parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// The action the parameters were validated against
    pub action: String,
    /// Failing parameter id mapped to its invalid-value message
    pub fields: BTreeMap<String, String>,
}

impl ValidationFailure {
    /// Create an empty failure record for an action
    pub fn new<S: Into<String>>(action: S) -> Self {
        Self {
            action: action.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Record a failing parameter
    pub fn add_field<K: Into<String>, M: Into<String>>(&mut self, field: K, message: M) {
        self.fields.insert(field.into(), message.into());
    }

    /// Check whether any parameter failed
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid values for action {}:", self.action)?;
        for (field, message) in &self.fields {
            write!(f, " {}: {};", field, message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Error type for devflow driver operations
#[derive(Error, Debug)]
pub enum Error {
    /// Action parameter validation failed
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationFailure),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response effect failed to execute
    #[error("Effect error: {0}")]
    Effect(String),

    /// Action compilation error
    #[error("Action error: {0}")]
    Action(String),

    /// Worker error (fatal to the owning device worker)
    #[error("Worker error: {0}")]
    Worker(String),

    /// Expression evaluation error
    #[error("Expression error: {0}")]
    Expr(#[from] ExprError),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for devflow driver operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new effect error
    pub fn effect<S: AsRef<str>>(msg: S) -> Self {
        Error::Effect(msg.as_ref().to_string())
    }

    /// Create a new action error
    pub fn action<S: AsRef<str>>(msg: S) -> Self {
        Error::Action(msg.as_ref().to_string())
    }

    /// Create a new worker error
    pub fn worker<S: AsRef<str>>(msg: S) -> Self {
        Error::Worker(msg.as_ref().to_string())
    }

    /// Create a new not found error
    pub fn not_found<S: AsRef<str>>(msg: S) -> Self {
        Error::NotFound(msg.as_ref().to_string())
    }
}
