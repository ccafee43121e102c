/*!
 * Response matching and effects.
 *
 * After a transport command completes, the worker runs the device type's
 * response definitions against the response text. A definition carries two
 * match inputs: a criteria template, resolved into a test string per
 * response, and a fixed pattern matched against that test string. Every
 * definition that matches fires, in registration order, and each of its
 * effects executes under its own fault boundary so one bad effect cannot
 * block the rest.
 */
use regex::{Regex, RegexBuilder};
use tracing::{debug, error};

use crate::command::Command;
use crate::device::{CommandSink, DeviceAdapter};
use crate::error::{Error, Result};
use crate::registry::WorkerRegistry;
use crate::state::StateStore;
use crate::subst::{eval_source, SubstitutionScope, Substituter};
use devflow_core::expr;
use devflow_core::types::{Id, Value};

/// What a response effect does when its definition matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Write a value into the device's state store
    UpdateState,
    /// Queue a follow-up command
    QueueCommand,
    /// Invoke a named adapter callback
    Callback,
}

/// One effect of a matched response definition
#[derive(Debug, Clone)]
pub struct ResponseEffect {
    /// The effect kind
    pub kind: EffectKind,
    /// State key, command-name template, or callback name, depending on
    /// the kind
    pub target: String,
    /// Template for the state value or command payload
    pub value_template: String,
    /// Template for the state display text, when it differs from the value
    pub display_template: Option<String>,
    /// Force expression evaluation of the resolved value and display
    /// templates
    pub evaluate: bool,
    /// Route a queued command to another device instead of this one
    pub target_device: Option<Id>,
}

impl ResponseEffect {
    /// Effect that writes the resolved value template to a state key
    pub fn update_state<K: Into<String>, V: Into<String>>(key: K, value_template: V) -> Self {
        Self {
            kind: EffectKind::UpdateState,
            target: key.into(),
            value_template: value_template.into(),
            display_template: None,
            evaluate: false,
            target_device: None,
        }
    }

    /// Effect that queues a follow-up command with the resolved payload
    pub fn queue_command<N: Into<String>, P: Into<String>>(name: N, payload_template: P) -> Self {
        Self {
            kind: EffectKind::QueueCommand,
            target: name.into(),
            value_template: payload_template.into(),
            display_template: None,
            evaluate: false,
            target_device: None,
        }
    }

    /// Effect that invokes a named callback on the device adapter
    pub fn callback<N: Into<String>>(name: N) -> Self {
        Self {
            kind: EffectKind::Callback,
            target: name.into(),
            value_template: String::new(),
            display_template: None,
            evaluate: false,
            target_device: None,
        }
    }

    /// Set a display template for a state update
    pub fn with_display<S: Into<String>>(mut self, template: S) -> Self {
        self.display_template = Some(template.into());
        self
    }

    /// Evaluate the resolved value template as an expression
    pub fn evaluated(mut self) -> Self {
        self.evaluate = true;
        self
    }

    /// Route the queued command to another device's worker
    pub fn for_device(mut self, id: Id) -> Self {
        self.target_device = Some(id);
        self
    }
}

/// Everything an effect needs at execution time
pub struct EffectContext<'a> {
    /// Token substituter for templates
    pub substituter: &'a dyn Substituter,
    /// The device whose response matched
    pub device: &'a dyn DeviceAdapter,
    /// The device's own command sink
    pub sink: &'a dyn CommandSink,
    /// Sinks of other live devices, for cross-device command effects
    pub peers: Option<&'a WorkerRegistry>,
}

/// A response definition: a match rule plus the effects it triggers
#[derive(Debug, Clone)]
pub struct ResponseDefinition {
    /// The definition id, used in logs
    pub id: String,
    /// Template resolved into the test string the pattern runs against;
    /// empty means the raw response text
    pub criteria: String,
    /// Pattern matched against the resolved criteria string, compiled
    /// case-insensitive; unset means match everything the action filter
    /// lets through
    pub match_pattern: Option<Regex>,
    /// Restrict matching to commands compiled from this action
    pub respond_to_action: Option<String>,
    /// The effects fired on a match
    pub effects: Vec<ResponseEffect>,
}

impl ResponseDefinition {
    /// Create a definition with the given id, no criteria and no pattern
    pub fn new<I: Into<String>>(id: I) -> Self {
        Self {
            id: id.into(),
            criteria: String::new(),
            match_pattern: None,
            respond_to_action: None,
            effects: Vec::new(),
        }
    }

    /// Set the criteria template the pattern is matched against
    pub fn with_criteria<S: Into<String>>(mut self, template: S) -> Self {
        self.criteria = template.into();
        self
    }

    /// Set the match pattern. The pattern is compiled case-insensitive and
    /// searches anywhere in the criteria string unless it anchors itself.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                Error::effect(format!(
                    "response definition {}: invalid match pattern '{}': {}",
                    self.id, pattern, e
                ))
            })?;
        self.match_pattern = Some(regex);
        Ok(self)
    }

    /// Only match responses to commands compiled from the given action
    pub fn with_respond_to_action<S: Into<String>>(mut self, action_id: S) -> Self {
        self.respond_to_action = Some(action_id.into());
        self
    }

    /// Add an effect
    pub fn add_effect(mut self, effect: ResponseEffect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Resolve the criteria template into the string the pattern runs
    /// against. An empty template stands for the raw response text.
    fn criteria_string(
        &self,
        response: &str,
        command: &Command,
        substituter: &dyn Substituter,
        state: Option<&dyn StateStore>,
    ) -> String {
        if self.criteria.is_empty() {
            return response.to_string();
        }

        let mut scope = SubstitutionScope::new()
            .with_response(response)
            .with_command(command);
        if let Some(state) = state {
            scope = scope.with_state(state);
        }
        substituter.resolve(&self.criteria, &scope)
    }

    /// Test whether this definition matches a response.
    ///
    /// Without a pattern, the definition matches everything the action
    /// filter lets through. With one, the criteria template is resolved
    /// into a test string and the pattern is searched in it.
    pub fn is_match(
        &self,
        response: &str,
        command: &Command,
        substituter: &dyn Substituter,
        state: Option<&dyn StateStore>,
    ) -> bool {
        if let Some(action) = &self.respond_to_action {
            if command.parent_action.as_deref() != Some(action.as_str()) {
                return false;
            }
        }

        match &self.match_pattern {
            None => true,
            Some(pattern) => {
                pattern.is_match(&self.criteria_string(response, command, substituter, state))
            }
        }
    }

    /// The pattern's capture groups against the resolved criteria string;
    /// index 0 is the whole match. Empty when there is no pattern or it
    /// does not match.
    fn match_captures(
        &self,
        response: &str,
        command: &Command,
        substituter: &dyn Substituter,
        state: Option<&dyn StateStore>,
    ) -> Vec<String> {
        let pattern = match &self.match_pattern {
            Some(pattern) => pattern,
            None => return Vec::new(),
        };

        let test = self.criteria_string(response, command, substituter, state);
        pattern
            .captures(&test)
            .map(|caps| {
                caps.iter()
                    .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run every effect of this definition.
    ///
    /// Each effect executes under its own fault boundary; a failing effect
    /// is logged and the remaining effects still run. Returns the number of
    /// effects that executed successfully.
    pub async fn execute_effects(
        &self,
        response: &str,
        command: &Command,
        ctx: &EffectContext<'_>,
    ) -> usize {
        let state = ctx.device.state();
        let captures =
            self.match_captures(response, command, ctx.substituter, Some(state.as_ref()));

        let mut executed = 0;
        for (index, effect) in self.effects.iter().enumerate() {
            match self
                .execute_effect(effect, response, command, &captures, ctx)
                .await
            {
                Ok(()) => executed += 1,
                Err(e) => {
                    error!(
                        device = %ctx.device.id(),
                        response_definition = %self.id,
                        effect = index,
                        error = %e,
                        "response effect failed"
                    );
                }
            }
        }
        executed
    }

    async fn execute_effect(
        &self,
        effect: &ResponseEffect,
        response: &str,
        command: &Command,
        captures: &[String],
        ctx: &EffectContext<'_>,
    ) -> Result<()> {
        let state = ctx.device.state();
        let scope = SubstitutionScope::new()
            .with_response(response)
            .with_command(command)
            .with_state(state.as_ref())
            .with_captures(captures);

        match effect.kind {
            EffectKind::UpdateState => {
                let value =
                    resolve_value(&effect.value_template, effect.evaluate, ctx.substituter, &scope)?;
                let display = match &effect.display_template {
                    Some(template) => Some(
                        resolve_value(template, effect.evaluate, ctx.substituter, &scope)?
                            .to_string(),
                    ),
                    None => None,
                };
                debug!(
                    device = %ctx.device.id(),
                    key = %effect.target,
                    value = %value,
                    "updating state from response"
                );
                state.set(&effect.target, value, display);
                Ok(())
            }
            EffectKind::QueueCommand => {
                let name = ctx.substituter.resolve(&effect.target, &scope);
                let payload =
                    resolve_value(&effect.value_template, effect.evaluate, ctx.substituter, &scope)?;
                let follow_up = Command::new(name).with_payload(payload.to_string());
                match &effect.target_device {
                    Some(id) => {
                        let peers = ctx.peers.ok_or_else(|| {
                            Error::effect(format!(
                                "effect targets device {} but no worker registry is available",
                                id
                            ))
                        })?;
                        peers.sink(id)?.enqueue(follow_up)
                    }
                    None => ctx.sink.enqueue(follow_up),
                }
            }
            EffectKind::Callback => {
                ctx.device
                    .invoke_callback(&effect.target, response, command)
                    .await
            }
        }
    }
}

/// Resolve a value template, applying expression evaluation when the
/// resolved text carries the `eval:` marker or the effect forces it
fn resolve_value(
    template: &str,
    evaluate: bool,
    substituter: &dyn Substituter,
    scope: &SubstitutionScope<'_>,
) -> Result<Value> {
    let resolved = substituter.resolve(template, scope);
    match eval_source(&resolved) {
        Some(source) => Ok(expr::evaluate(source)?),
        None if evaluate => Ok(expr::evaluate(&resolved)?),
        None => Ok(Value::String(resolved)),
    }
}
