/*!
 * Device-side traits the driver runtime is built against.
 *
 * A concrete device integration implements [`DeviceAdapter`]; everything
 * else in the crate talks to devices only through these traits, so workers
 * and the response engine never depend on a particular device family.
 */
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::state::StateStore;
use crate::transport::{Transport, TransportError};
use devflow_core::types::{Id, Value};

/// The integration surface for one device.
///
/// Most methods have defaults; a minimal adapter supplies an id, an
/// address, a state store and a transport.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// The device's unique id
    fn id(&self) -> &Id;

    /// Resolve the device's network address. A failure here is fatal to
    /// the device's worker: nothing can be communicated without it.
    fn address(&self) -> Result<String>;

    /// The device's state store
    fn state(&self) -> Arc<dyn StateStore>;

    /// The device's communication channel
    fn transport(&self) -> Arc<dyn Transport>;

    /// Extra headers sent with every transport request
    fn custom_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Acquire any per-connection resources before the worker starts
    /// dequeuing
    async fn open_resources(&self) -> Result<()> {
        Ok(())
    }

    /// Release per-connection resources; runs on every worker exit path
    async fn close_resources(&self) {}

    /// Called for a dequeued command no built-in handler claims. The
    /// default logs and drops it.
    async fn handle_unknown_command(&self, command: &Command) -> Result<()> {
        warn!(
            device = %self.id(),
            command = %command.name,
            "no handler for command, dropping"
        );
        Ok(())
    }

    /// Called when a transport-bound command fails. The default logs; an
    /// adapter may reconnect or adjust state here.
    async fn handle_transport_error(&self, command: &Command, error: &TransportError) {
        warn!(
            device = %self.id(),
            command = %command.name,
            error = %error,
            "transport request failed"
        );
    }

    /// Run a named callback, as triggered by a matched response. The
    /// response text and the command that produced it are both passed
    /// through. Adapters that declare callback effects must override this;
    /// the default reports the name as unknown.
    async fn invoke_callback(&self, name: &str, _response: &str, _command: &Command) -> Result<()> {
        Err(Error::not_found(format!(
            "device {} has no callback named {}",
            self.id(),
            name
        )))
    }
}

/// Host-facing entry point for running a device's actions
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Validate and compile the named action, then queue its commands.
    /// Either every compiled command is queued or none are.
    async fn invoke_action(&self, action_id: &str, values: &HashMap<String, Value>) -> Result<()>;
}

/// Anything that accepts commands for a device's worker
pub trait CommandSink: Send + Sync {
    /// Queue a single command
    fn enqueue(&self, command: Command) -> Result<()>;

    /// Queue a batch of commands in order
    fn enqueue_batch(&self, commands: Vec<Command>) -> Result<()> {
        for command in commands {
            self.enqueue(command)?;
        }
        Ok(())
    }
}
