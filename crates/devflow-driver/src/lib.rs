/*!
 * Devflow Driver
 *
 * This crate provides the device-driver runtime for the devflow system:
 * declarative action and response definitions, the per-device command
 * queue and worker loop, and the transport abstraction devices are
 * driven through.
 */

#![warn(missing_docs)]

// Re-export core types
pub use devflow_core::prelude;

pub mod action;
pub mod command;
pub mod device;
pub mod error;
pub mod param;
pub mod registry;
pub mod response;
pub mod state;
pub mod subst;
pub mod transport;
pub mod wol;
pub mod worker;

// Re-export the main driver surface
pub use action::{ActionDefinition, CommandTemplate};
pub use command::{Command, CommandPayload};
pub use device::{ActionInvoker, CommandSink, DeviceAdapter};
pub use error::{Error, Result, ValidationFailure};
pub use param::{ParamDefinition, ParamType};
pub use registry::{DefinitionRegistry, WorkerRegistry};
pub use response::{EffectKind, ResponseDefinition, ResponseEffect};
pub use state::{MemoryStateStore, StateStore};
pub use subst::{SubstitutionScope, Substituter, TokenSubstituter};
pub use transport::{NullTransport, RequestKind, Transport, TransportError, TransportResponse};
pub use worker::{DeviceCommandWorker, DeviceController, WorkerConfig, WorkerHandle, WorkerState};

/// Devflow driver crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the driver system
pub fn init() -> Result<()> {
    tracing::info!("Devflow Driver {} initialized", VERSION);
    Ok(())
}
