/*!
 * Template substitution.
 *
 * Action payloads, skip-conditions, and response criteria are written as
 * templates with `%...%` tokens. The [`Substituter`] collaborator resolves
 * those tokens against the current command, response text, parameter values,
 * and device state. A resolved template may additionally carry the `eval:`
 * prefix, marking it for the sandboxed expression evaluator.
 */
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::command::Command;
use crate::state::StateStore;
use devflow_core::types::Value;

/// Prefix marking a substituted template for expression evaluation
pub const EVAL_PREFIX: &str = "eval:";

/// Token replaced with the command name
pub const TOKEN_COMMAND_NAME: &str = "%cp:name%";
/// Token replaced with the command payload text
pub const TOKEN_COMMAND_PAYLOAD: &str = "%cp:payload%";
/// Token replaced with the raw response text
pub const TOKEN_RESPONSE: &str = "%cp:response%";

/// Strip the `eval:` marker from a resolved template, returning the
/// expression source when the marker is present
pub fn eval_source(text: &str) -> Option<&str> {
    text.strip_prefix(EVAL_PREFIX)
}

/// Everything a template may be resolved against
#[derive(Default)]
pub struct SubstitutionScope<'a> {
    response: Option<&'a str>,
    command: Option<&'a Command>,
    values: Option<&'a HashMap<String, Value>>,
    state: Option<&'a dyn StateStore>,
    captures: Option<&'a [String]>,
}

impl<'a> SubstitutionScope<'a> {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the raw response text
    pub fn with_response(mut self, response: &'a str) -> Self {
        self.response = Some(response);
        self
    }

    /// Attach the originating command
    pub fn with_command(mut self, command: &'a Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Attach the resolved parameter-value environment
    pub fn with_values(mut self, values: &'a HashMap<String, Value>) -> Self {
        self.values = Some(values);
        self
    }

    /// Attach the device state store
    pub fn with_state(mut self, state: &'a dyn StateStore) -> Self {
        self.state = Some(state);
        self
    }

    /// Attach the capture groups of a matched response pattern; index 0 is
    /// the whole match
    pub fn with_captures(mut self, captures: &'a [String]) -> Self {
        self.captures = Some(captures);
        self
    }
}

/// The substitution collaborator: resolves a template against a scope.
///
/// Implementations must be idempotent on templates containing no recognized
/// tokens.
pub trait Substituter: Send + Sync {
    /// Resolve every recognized token in `template`
    fn resolve(&self, template: &str, scope: &SubstitutionScope<'_>) -> String;
}

/// The standard token substituter.
///
/// Replaces, in order: `%cp:name%` and `%cp:payload%` from the command,
/// `%cp:response%` from the response text, `%ap:<id>%` from the parameter
/// environment, `%ds:<key>%` from device state, and `%cg:<n>%` from the
/// capture groups of a matched response pattern. Unknown tokens resolve to
/// the empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSubstituter;

impl TokenSubstituter {
    /// Create a new token substituter
    pub fn new() -> Self {
        Self
    }
}

fn keyed_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%(ap|ds|cg):([A-Za-z0-9_.\-]+)%").unwrap())
}

impl Substituter for TokenSubstituter {
    fn resolve(&self, template: &str, scope: &SubstitutionScope<'_>) -> String {
        let mut resolved = template.to_string();

        if let Some(command) = scope.command {
            resolved = resolved.replace(TOKEN_COMMAND_NAME, &command.name);
            resolved = resolved.replace(TOKEN_COMMAND_PAYLOAD, &command.payload.as_text());
        }
        if let Some(response) = scope.response {
            resolved = resolved.replace(TOKEN_RESPONSE, response);
        }

        keyed_token_pattern()
            .replace_all(&resolved, |caps: &regex::Captures<'_>| {
                let key = &caps[2];
                match &caps[1] {
                    "ap" => scope
                        .values
                        .and_then(|values| values.get(key))
                        .map(|value| value.to_string())
                        .unwrap_or_default(),
                    "ds" => scope
                        .state
                        .and_then(|state| state.get(key))
                        .map(|value| value.to_string())
                        .unwrap_or_default(),
                    "cg" => key
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| scope.captures.and_then(|captures| captures.get(index)))
                        .cloned()
                        .unwrap_or_default(),
                    _ => String::new(),
                }
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    #[test]
    fn test_command_and_response_tokens() {
        let substituter = TokenSubstituter::new();
        let command = Command::new("HTTP_GET").with_payload("/status");
        let scope = SubstitutionScope::new()
            .with_command(&command)
            .with_response("OK:42");

        let resolved = substituter.resolve("%cp:name% -> %cp:payload% = %cp:response%", &scope);
        assert_eq!(resolved, "HTTP_GET -> /status = OK:42");
    }

    #[test]
    fn test_value_and_state_tokens() {
        let substituter = TokenSubstituter::new();
        let mut values = HashMap::new();
        values.insert("level".to_string(), Value::Integer(7));
        let state = MemoryStateStore::new();
        state.set("zone", Value::from("main"), None);

        let scope = SubstitutionScope::new()
            .with_values(&values)
            .with_state(&state);

        let resolved = substituter.resolve("set %ds:zone% to %ap:level%", &scope);
        assert_eq!(resolved, "set main to 7");
    }

    #[test]
    fn test_capture_group_tokens() {
        let substituter = TokenSubstituter::new();
        let captures = vec!["OK:42".to_string(), "42".to_string()];
        let scope = SubstitutionScope::new().with_captures(&captures);

        assert_eq!(substituter.resolve("eval:%cg:1%", &scope), "eval:42");
        assert_eq!(substituter.resolve("%cg:0%", &scope), "OK:42");
        assert_eq!(substituter.resolve("%cg:9%", &scope), "");
    }

    #[test]
    fn test_unknown_tokens_resolve_empty() {
        let substituter = TokenSubstituter::new();
        let scope = SubstitutionScope::new();
        assert_eq!(substituter.resolve("[%ap:missing%]", &scope), "[]");
    }

    #[test]
    fn test_idempotent_on_plain_text() {
        let substituter = TokenSubstituter::new();
        let scope = SubstitutionScope::new();
        let text = "no tokens here, 100% plain";
        assert_eq!(substituter.resolve(text, &scope), text);
        assert_eq!(
            substituter.resolve(&substituter.resolve(text, &scope), &scope),
            text
        );
    }

    #[test]
    fn test_eval_source() {
        assert_eq!(eval_source("eval:1 + 2"), Some("1 + 2"));
        assert_eq!(eval_source("plain"), None);
    }
}
