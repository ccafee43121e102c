/*!
 * Typed parameter definitions.
 *
 * A [`ParamDefinition`] describes one user-supplied parameter of an action:
 * its type, whether it is required, its default, and its constraints.
 * Definitions are created once at registration time and shared read-only
 * across every use of the action afterwards.
 */
use std::path::Path;

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use devflow_core::types::Value;

/// The type of a parameter, which selects its validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Integer within the configured range
    Integer,
    /// Float within the configured range
    Float,
    /// Boolean, accepting "true"/"false" strings case-insensitively
    Boolean,
    /// String with optional pattern and length constraints
    String,
    /// A path that must exist and be a directory
    DirectoryPath,
    /// A path that must exist and be a regular file
    FilePath,
    /// Dotted-quad IPv4 address (syntactic check only, no resolution)
    IpAddress,
    /// List whose length must be within the configured range
    List,
}

/// Definition of a single action parameter
#[derive(Debug, Clone)]
pub struct ParamDefinition {
    /// The parameter id, unique within its action
    pub id: String,
    /// The parameter type
    pub param_type: ParamType,
    /// Whether a value must be supplied
    pub required: bool,
    /// Value used when the caller supplies none
    pub default: Value,
    /// Minimum numeric value, string length, or list length
    pub min: f64,
    /// Maximum numeric value, string length, or list length
    pub max: f64,
    /// Optional case-insensitive pattern for string parameters
    pub validation_pattern: Option<Regex>,
    /// Message reported when validation fails
    pub invalid_message: String,
}

impl ParamDefinition {
    /// Create a new parameter definition with an open range and no pattern
    pub fn new<S: Into<String>>(id: S, param_type: ParamType) -> Self {
        let id = id.into();
        Self {
            invalid_message: format!("invalid value for {}", id),
            id,
            param_type,
            required: false,
            default: Value::Null,
            min: 0.0,
            max: i32::MAX as f64,
            validation_pattern: None,
        }
    }

    /// Mark the parameter as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default value
    pub fn with_default<V: Into<Value>>(mut self, default: V) -> Self {
        self.default = default.into();
        self
    }

    /// Set the numeric range, string-length range, or list-length range
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set a validation pattern for string parameters; matching is
    /// case-insensitive and unanchored
    pub fn with_validation_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::action(format!("invalid validation pattern: {}", e)))?;
        self.validation_pattern = Some(regex);
        Ok(self)
    }

    /// Set the message reported when validation fails
    pub fn with_invalid_message<S: Into<String>>(mut self, message: S) -> Self {
        self.invalid_message = message.into();
        self
    }

    /// Check whether a proposed value is valid for this definition.
    ///
    /// An empty or absent value is valid exactly when the parameter is not
    /// required. Path types perform filesystem existence checks; a
    /// transient filesystem error counts as invalid rather than as a
    /// separate error class.
    pub fn is_valid(&self, value: &Value) -> bool {
        if value.is_empty() {
            return !self.required;
        }

        match self.param_type {
            ParamType::Integer => match value.coerce_integer() {
                Some(v) => (v as f64) >= self.min && (v as f64) <= self.max,
                None => false,
            },
            ParamType::Float => match value.coerce_float() {
                Some(v) => v >= self.min && v <= self.max,
                None => false,
            },
            ParamType::Boolean => value.coerce_bool().is_some(),
            ParamType::DirectoryPath => match value.as_str() {
                Some(path) => Path::new(path).is_dir(),
                None => false,
            },
            ParamType::FilePath => match value.as_str() {
                Some(path) => Path::new(path).is_file(),
                None => false,
            },
            ParamType::IpAddress => match value.as_str() {
                Some(text) => is_ipv4(text),
                None => false,
            },
            ParamType::List => match value.as_list() {
                Some(items) => {
                    let len = items.len() as f64;
                    len >= self.min && len <= self.max
                }
                None => false,
            },
            ParamType::String => {
                let text = value.to_string();
                if let Some(pattern) = &self.validation_pattern {
                    if !pattern.is_match(&text) {
                        return false;
                    }
                }
                let len = text.chars().count() as f64;
                len >= self.min && len <= self.max
            }
        }
    }
}

/// Validate a dotted-quad IPv4 address: four '.'-separated integer octets,
/// each in [0, 255]
fn is_ipv4(text: &str) -> bool {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|part| {
        !part.is_empty() && part.len() <= 3 && part.chars().all(|c| c.is_ascii_digit()) && {
            match part.parse::<u16>() {
                Ok(octet) => octet <= 255,
                Err(_) => false,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_range_boundaries() {
        let param = ParamDefinition::new("level", ParamType::Integer)
            .required()
            .with_range(0.0, 100.0);

        assert!(param.is_valid(&Value::from("0")));
        assert!(param.is_valid(&Value::from("100")));
        assert!(param.is_valid(&Value::Integer(42)));
        assert!(!param.is_valid(&Value::from("-1")));
        assert!(!param.is_valid(&Value::from("101")));
        assert!(!param.is_valid(&Value::from("abc")));
    }

    #[test]
    fn test_float_range() {
        let param = ParamDefinition::new("gain", ParamType::Float).with_range(0.5, 2.0);
        assert!(param.is_valid(&Value::from("0.5")));
        assert!(param.is_valid(&Value::from("2.0")));
        assert!(!param.is_valid(&Value::from("2.01")));
        assert!(!param.is_valid(&Value::from("0.49")));
    }

    #[test]
    fn test_required_vs_optional_empty() {
        let required = ParamDefinition::new("host", ParamType::IpAddress).required();
        let optional = ParamDefinition::new("host", ParamType::IpAddress);

        assert!(!required.is_valid(&Value::from("")));
        assert!(!required.is_valid(&Value::Null));
        assert!(optional.is_valid(&Value::from("")));
        assert!(optional.is_valid(&Value::Null));
    }

    #[test]
    fn test_ip_address() {
        let param = ParamDefinition::new("host", ParamType::IpAddress).required();
        assert!(param.is_valid(&Value::from("192.168.1.1")));
        assert!(param.is_valid(&Value::from("0.0.0.0")));
        assert!(param.is_valid(&Value::from("255.255.255.255")));
        assert!(!param.is_valid(&Value::from("192.168.1.256")));
        assert!(!param.is_valid(&Value::from("1.2.3")));
        assert!(!param.is_valid(&Value::from("1.2.3.4.5")));
        assert!(!param.is_valid(&Value::from("a.b.c.d")));
        assert!(!param.is_valid(&Value::from("1..2.3")));
    }

    #[test]
    fn test_boolean() {
        let param = ParamDefinition::new("muted", ParamType::Boolean).required();
        assert!(param.is_valid(&Value::Bool(false)));
        assert!(param.is_valid(&Value::from("TRUE")));
        assert!(param.is_valid(&Value::from("false")));
        assert!(!param.is_valid(&Value::from("on")));
        assert!(!param.is_valid(&Value::Integer(1)));
    }

    #[test]
    fn test_string_pattern_and_length() {
        let param = ParamDefinition::new("zone", ParamType::String)
            .with_range(1.0, 4.0)
            .with_validation_pattern("^z[0-9]+$")
            .unwrap();

        assert!(param.is_valid(&Value::from("z1")));
        assert!(param.is_valid(&Value::from("Z12")));
        assert!(!param.is_valid(&Value::from("x1")));
        assert!(!param.is_valid(&Value::from("z12345")));
    }

    #[test]
    fn test_list_cardinality() {
        let param = ParamDefinition::new("targets", ParamType::List).with_range(1.0, 2.0);
        let one = Value::List(vec![Value::from("a")]);
        let three = Value::List(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
        assert!(param.is_valid(&one));
        assert!(!param.is_valid(&three));
        assert!(!param.is_valid(&Value::from("not-a-list")));
    }

    #[test]
    fn test_path_types() {
        let dir = ParamDefinition::new("dir", ParamType::DirectoryPath).required();
        let file = ParamDefinition::new("file", ParamType::FilePath).required();

        assert!(dir.is_valid(&Value::from("/")));
        assert!(!dir.is_valid(&Value::from("/definitely/not/a/dir")));
        assert!(!file.is_valid(&Value::from("/")));
        assert!(!file.is_valid(&Value::from("/definitely/not/a/file")));
    }
}
