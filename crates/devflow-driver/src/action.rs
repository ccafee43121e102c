/*!
 * Declarative action definitions.
 *
 * An [`ActionDefinition`] describes one host-invokable operation: the
 * parameters a caller may supply and an ordered list of command templates.
 * Compilation validates the parameters and expands the templates into the
 * concrete [`Command`] batch that gets queued on a device worker.
 */
use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::command::{Command, CommandPayload};
use crate::error::{Error, Result, ValidationFailure};
use crate::param::ParamDefinition;
use crate::state::StateStore;
use crate::subst::{eval_source, SubstitutionScope, Substituter};
use devflow_core::expr;
use devflow_core::types::Value;

/// One command template within an action.
///
/// All fields except the name are substitution templates; `count`,
/// `delay`, and `condition` may be empty, meaning run once, no
/// inter-repeat delay, and always execute.
#[derive(Debug, Clone, Default)]
pub struct CommandTemplate {
    /// The name of the command to queue
    pub name: String,
    /// Template for the command payload
    pub payload: String,
    /// Template for the repeat count
    pub count: String,
    /// Template for the delay between repeats
    pub delay: String,
    /// Template for the execute-condition; when it resolves false the
    /// template is skipped
    pub condition: String,
}

impl CommandTemplate {
    /// Create a new command template with the given name and payload
    pub fn new<S: Into<String>, P: Into<String>>(name: S, payload: P) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Set the repeat-count template
    pub fn with_count<S: Into<String>>(mut self, count: S) -> Self {
        self.count = count.into();
        self
    }

    /// Set the inter-repeat delay template
    pub fn with_delay<S: Into<String>>(mut self, delay: S) -> Self {
        self.delay = delay.into();
        self
    }

    /// Set the execute-condition template
    pub fn with_condition<S: Into<String>>(mut self, condition: S) -> Self {
        self.condition = condition.into();
        self
    }
}

/// A host-invokable action definition
#[derive(Debug, Clone)]
pub struct ActionDefinition {
    /// The action id
    pub id: String,
    /// The declared parameters, ids unique within the action
    params: Vec<ParamDefinition>,
    /// The command templates, expanded in declaration order
    commands: Vec<CommandTemplate>,
}

impl ActionDefinition {
    /// Create a new action with no parameters and no commands. An action
    /// with zero command templates is legal and compiles to an empty batch.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            params: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Add a parameter definition
    pub fn add_parameter(mut self, param: ParamDefinition) -> Self {
        self.params.push(param);
        self
    }

    /// Add a command template; templates expand in the order added
    pub fn add_command(mut self, template: CommandTemplate) -> Self {
        self.commands.push(template);
        self
    }

    /// The declared parameters
    pub fn params(&self) -> &[ParamDefinition] {
        &self.params
    }

    /// The command templates
    pub fn commands(&self) -> &[CommandTemplate] {
        &self.commands
    }

    /// Validate supplied values against every declared parameter.
    ///
    /// All failures are collected; the result carries one message per
    /// failing parameter id rather than stopping at the first.
    pub fn validate(
        &self,
        values: &HashMap<String, Value>,
    ) -> std::result::Result<(), ValidationFailure> {
        let mut failure = ValidationFailure::new(&self.id);

        for param in &self.params {
            match values.get(&param.id) {
                Some(value) => {
                    if !param.is_valid(value) {
                        failure.add_field(&param.id, &param.invalid_message);
                    }
                }
                None => {
                    if param.required {
                        failure.add_field(&param.id, &param.invalid_message);
                    }
                }
            }
        }

        if failure.is_empty() {
            Ok(())
        } else {
            Err(failure)
        }
    }

    /// Compile the action into its command batch.
    ///
    /// Compilation is all-or-nothing: a validation failure or a fatal
    /// template error produces no commands at all. A template whose
    /// condition resolves false is skipped, which is not an error.
    pub fn compile(
        &self,
        substituter: &dyn Substituter,
        state: Option<&dyn StateStore>,
        values: &HashMap<String, Value>,
    ) -> Result<Vec<Command>> {
        self.validate(values)?;

        // the closed value environment: supplied value else declared default
        let mut environment = HashMap::with_capacity(self.params.len());
        for param in &self.params {
            let value = values.get(&param.id).cloned().unwrap_or_else(|| param.default.clone());
            environment.insert(param.id.clone(), value);
        }

        let mut scope = SubstitutionScope::new().with_values(&environment);
        if let Some(state) = state {
            scope = scope.with_state(state);
        }

        let mut batch = Vec::new();
        for template in &self.commands {
            if !template.condition.is_empty() {
                let resolved = substituter.resolve(&template.condition, &scope);
                let source = eval_source(&resolved).unwrap_or(&resolved);
                if !expr::evaluate_bool(source)? {
                    debug!(
                        action = %self.id,
                        command = %template.name,
                        "execute condition false, skipping command template"
                    );
                    continue;
                }
            }

            let count = self.resolve_count(substituter, &scope, template)?;

            for _ in 0..count {
                let resolved = substituter.resolve(&template.payload, &scope);
                let payload_text = match eval_source(&resolved) {
                    Some(source) => expr::evaluate(source)?.to_string(),
                    None => resolved,
                };
                let payload = if payload_text.is_empty() {
                    CommandPayload::Empty
                } else {
                    CommandPayload::Text(payload_text)
                };

                // an inter-repeat delay only applies when the command
                // actually repeats
                let delay = if count > 1 && !template.delay.is_empty() {
                    let resolved = substituter.resolve(&template.delay, &scope);
                    let seconds: f64 = resolved.trim().parse().map_err(|_| {
                        Error::action(format!(
                            "action {}: repeat delay '{}' is not a number",
                            self.id, resolved
                        ))
                    })?;
                    Duration::from_secs_f64(seconds)
                } else {
                    Duration::ZERO
                };

                batch.push(
                    Command::new(&template.name)
                        .with_payload(payload)
                        .with_post_pause(delay)
                        .with_parent_action(&self.id),
                );
            }
        }

        Ok(batch)
    }

    fn resolve_count(
        &self,
        substituter: &dyn Substituter,
        scope: &SubstitutionScope<'_>,
        template: &CommandTemplate,
    ) -> Result<u32> {
        if template.count.is_empty() {
            return Ok(1);
        }

        let resolved = substituter.resolve(&template.count, scope);
        let resolved = resolved.trim();
        if resolved.is_empty() {
            return Ok(1);
        }

        let count = match eval_source(resolved) {
            Some(source) => expr::evaluate_number(source)?,
            None => resolved.parse().map_err(|_| {
                Error::action(format!(
                    "action {}: repeat count '{}' is not a number",
                    self.id, resolved
                ))
            })?,
        };

        if count < 0.0 || count.fract() != 0.0 {
            return Err(Error::action(format!(
                "action {}: repeat count {} must be a non-negative integer",
                self.id, count
            )));
        }

        Ok(count as u32)
    }
}
