/*!
 * Device state store.
 *
 * Response effects write device state through this narrow interface.
 * Writes are last-write-wins; there is no transactional batching across
 * effects.
 */
use std::collections::HashMap;
use std::sync::RwLock;

use devflow_core::types::Value;

/// The device state store interface used by the response-effect engine
pub trait StateStore: Send + Sync {
    /// Write a state value, optionally with a separate display value. When
    /// no display value is supplied any previously stored display value is
    /// cleared, leaving the raw value authoritative.
    fn set(&self, key: &str, value: Value, display: Option<String>);

    /// Read a state value
    fn get(&self, key: &str) -> Option<Value>;

    /// Read the display value for a key, if one was stored
    fn get_display(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
struct StateEntry {
    value: Value,
    display: Option<String>,
}

/// An in-memory state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<String, StateEntry>>,
}

impl MemoryStateStore {
    /// Create a new empty state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn set(&self, key: &str, value: Value, display: Option<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), StateEntry { value, display });
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).map(|e| e.value.clone()))
    }

    fn get_display(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).and_then(|e| e.display.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let store = MemoryStateStore::new();
        store.set("power", Value::from("on"), None);
        store.set("power", Value::from("off"), Some("Off".to_string()));

        assert_eq!(store.get("power"), Some(Value::from("off")));
        assert_eq!(store.get_display("power"), Some("Off".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_display_cleared_without_template() {
        let store = MemoryStateStore::new();
        store.set("volume", Value::Integer(10), Some("10%".to_string()));
        store.set("volume", Value::Integer(11), None);
        assert_eq!(store.get_display("volume"), None);
    }

    #[test]
    fn test_missing_key() {
        let store = MemoryStateStore::new();
        assert_eq!(store.get("nothing"), None);
        assert!(store.is_empty());
    }
}
