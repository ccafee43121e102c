/*!
 * Registries shared across device workers.
 *
 * [`DefinitionRegistry`] holds the action and response definitions for each
 * device type; definitions are registered once at startup and looked up in
 * registration order. [`WorkerRegistry`] maps live device ids to their
 * command sinks so response effects can queue commands onto other devices.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::action::ActionDefinition;
use crate::device::CommandSink;
use crate::error::{Error, Result};
use crate::response::ResponseDefinition;
use devflow_core::types::Id;

#[derive(Default)]
struct DeviceTypeDefs {
    actions: Vec<Arc<ActionDefinition>>,
    responses: Vec<Arc<ResponseDefinition>>,
}

/// Registry of action and response definitions, keyed by device type
#[derive(Default)]
pub struct DefinitionRegistry {
    types: RwLock<HashMap<String, DeviceTypeDefs>>,
}

impl DefinitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action definition for a device type
    pub fn register_action<S: Into<String>>(
        &self,
        device_type: S,
        action: ActionDefinition,
    ) -> Result<()> {
        let device_type = device_type.into();
        let mut types = self.types.write().map_err(|_| {
            Error::worker("Failed to acquire write lock on definition registry")
        })?;

        let defs = types.entry(device_type.clone()).or_default();
        if defs.actions.iter().any(|a| a.id == action.id) {
            return Err(Error::worker(format!(
                "Action {} already registered for device type {}",
                action.id, device_type
            )));
        }

        debug!(device_type = %device_type, action = %action.id, "registered action");
        defs.actions.push(Arc::new(action));
        Ok(())
    }

    /// Register a response definition for a device type. Definitions match
    /// in registration order.
    pub fn register_response<S: Into<String>>(
        &self,
        device_type: S,
        response: ResponseDefinition,
    ) -> Result<()> {
        let device_type = device_type.into();
        let mut types = self.types.write().map_err(|_| {
            Error::worker("Failed to acquire write lock on definition registry")
        })?;

        let defs = types.entry(device_type.clone()).or_default();
        debug!(device_type = %device_type, response = %response.id, "registered response");
        defs.responses.push(Arc::new(response));
        Ok(())
    }

    /// Look up a single action definition
    pub fn action(&self, device_type: &str, action_id: &str) -> Result<Arc<ActionDefinition>> {
        let types = self.types.read().map_err(|_| {
            Error::worker("Failed to acquire read lock on definition registry")
        })?;

        types
            .get(device_type)
            .and_then(|defs| defs.actions.iter().find(|a| a.id == action_id))
            .cloned()
            .ok_or_else(|| {
                Error::not_found(format!(
                    "action {} for device type {}",
                    action_id, device_type
                ))
            })
    }

    /// All action definitions for a device type, in registration order
    pub fn actions(&self, device_type: &str) -> Result<Vec<Arc<ActionDefinition>>> {
        let types = self.types.read().map_err(|_| {
            Error::worker("Failed to acquire read lock on definition registry")
        })?;

        Ok(types
            .get(device_type)
            .map(|defs| defs.actions.clone())
            .unwrap_or_default())
    }

    /// All response definitions for a device type, in registration order
    pub fn responses(&self, device_type: &str) -> Result<Vec<Arc<ResponseDefinition>>> {
        let types = self.types.read().map_err(|_| {
            Error::worker("Failed to acquire read lock on definition registry")
        })?;

        Ok(types
            .get(device_type)
            .map(|defs| defs.responses.clone())
            .unwrap_or_default())
    }
}

/// Registry of live device command sinks
#[derive(Default)]
pub struct WorkerRegistry {
    sinks: RwLock<HashMap<Id, Arc<dyn CommandSink>>>,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device's command sink, replacing any previous one
    pub fn register(&self, id: Id, sink: Arc<dyn CommandSink>) -> Result<()> {
        let mut sinks = self.sinks.write().map_err(|_| {
            Error::worker("Failed to acquire write lock on worker registry")
        })?;

        debug!(device = %id, "registered worker sink");
        sinks.insert(id, sink);
        Ok(())
    }

    /// Remove a device's command sink
    pub fn unregister(&self, id: &Id) -> Result<()> {
        let mut sinks = self.sinks.write().map_err(|_| {
            Error::worker("Failed to acquire write lock on worker registry")
        })?;

        if sinks.remove(id).is_none() {
            return Err(Error::not_found(format!("worker for device {}", id)));
        }
        debug!(device = %id, "unregistered worker sink");
        Ok(())
    }

    /// Look up a device's command sink
    pub fn sink(&self, id: &Id) -> Result<Arc<dyn CommandSink>> {
        let sinks = self.sinks.read().map_err(|_| {
            Error::worker("Failed to acquire read lock on worker registry")
        })?;

        sinks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("worker for device {}", id)))
    }

    /// Ids of all registered workers
    pub fn ids(&self) -> Result<Vec<Id>> {
        let sinks = self.sinks.read().map_err(|_| {
            Error::worker("Failed to acquire read lock on worker registry")
        })?;

        Ok(sinks.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use std::sync::Mutex;

    struct RecordingSink {
        commands: Mutex<Vec<Command>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandSink for RecordingSink {
        fn enqueue(&self, command: Command) -> Result<()> {
            self.commands.lock().unwrap().push(command);
            Ok(())
        }
    }

    #[test]
    fn test_action_lookup() {
        let registry = DefinitionRegistry::new();
        registry
            .register_action("receiver", ActionDefinition::new("set-volume"))
            .unwrap();

        assert!(registry.action("receiver", "set-volume").is_ok());
        assert!(matches!(
            registry.action("receiver", "missing"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.action("camera", "set-volume"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let registry = DefinitionRegistry::new();
        registry
            .register_action("receiver", ActionDefinition::new("set-volume"))
            .unwrap();
        assert!(registry
            .register_action("receiver", ActionDefinition::new("set-volume"))
            .is_err());
    }

    #[test]
    fn test_responses_keep_registration_order() {
        let registry = DefinitionRegistry::new();
        registry
            .register_response("receiver", ResponseDefinition::new("first"))
            .unwrap();
        registry
            .register_response("receiver", ResponseDefinition::new("second"))
            .unwrap();

        let responses = registry.responses("receiver").unwrap();
        let ids: Vec<&str> = responses.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["first", "second"]);
    }

    #[test]
    fn test_worker_registry_routing() {
        let registry = WorkerRegistry::new();
        let id = Id::from("receiver-1");
        registry
            .register(id.clone(), Arc::new(RecordingSink::new()))
            .unwrap();

        assert!(registry.sink(&id).is_ok());
        registry.unregister(&id).unwrap();
        assert!(registry.sink(&id).is_err());
    }
}
