//! Declarative transition table.
//!
//! [`TransitionConfig`] is the raw, serde-friendly description of the
//! lifecycle (states plus transition entries referring to guards and
//! pre-actions by name). [`TransitionTable::build`] validates it against a
//! [`Registry`] and produces the immutable table the engine runs on.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::registry::{GuardFn, PreAction, Registry, names};
use crate::state::LoanState;

/// Configuration error detected while building a transition table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("transition configuration is not valid JSON: {0}")]
    Parse(String),

    #[error("no states declared")]
    NoStates,

    #[error("state '{state}' is declared more than once")]
    DuplicateState { state: String },

    #[error("unknown state '{state}' referenced by {context}")]
    UnknownState { state: String, context: String },

    #[error("trigger '{trigger}' has no transition definitions")]
    TriggerWithoutTransitions { trigger: String },

    #[error("transition #{index} has an empty trigger name")]
    EmptyTrigger { index: usize },

    #[error("unknown guard '{name}' referenced by trigger '{trigger}'")]
    UnknownGuard { name: String, trigger: String },

    #[error("unknown pre-action '{name}' referenced by trigger '{trigger}'")]
    UnknownPreAction { name: String, trigger: String },
}

/// One transition entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub trigger: String,
    pub source: String,
    pub dest: String,
    /// Pre-action name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// Guards that must all pass. Accepts a single name or a list.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    /// Guards that must all fail. Accepts a single name or a list.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub unless: Vec<String>,
    /// Permission required to invoke the trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

impl TransitionSpec {
    pub fn new(trigger: &str, source: LoanState, dest: LoanState) -> Self {
        Self {
            trigger: trigger.to_string(),
            source: source.as_str().to_string(),
            dest: dest.as_str().to_string(),
            before: None,
            conditions: Vec::new(),
            unless: Vec::new(),
            permission: None,
        }
    }

    pub fn before(mut self, pre_action: &str) -> Self {
        self.before = Some(pre_action.to_string());
        self
    }

    pub fn conditions(mut self, guards: &[&str]) -> Self {
        self.conditions = guards.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn unless(mut self, guards: &[&str]) -> Self {
        self.unless = guards.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn permission(mut self, permission: &str) -> Self {
        self.permission = Some(permission.to_string());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}

/// Raw lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Declared states; the first one is the initial state of new loans.
    pub states: Vec<String>,
    /// Transition entries, in evaluation order.
    pub transitions: Vec<TransitionSpec>,
    /// Triggers that must be backed by at least one transition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
}

impl TransitionConfig {
    pub fn from_json(raw: &str) -> Result<Self, TableError> {
        serde_json::from_str(raw).map_err(|e| TableError::Parse(e.to_string()))
    }

    /// The circulation lifecycle.
    ///
    /// A request whose pickup location is the item's home library goes
    /// straight to the desk; any other request waits for validation.
    pub fn circulation_default() -> Self {
        use LoanState::*;

        Self {
            states: LoanState::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            transitions: vec![
                TransitionSpec::new("request", Created, ItemAtDesk)
                    .before(names::SET_REQUEST_PARAMETERS)
                    .conditions(&[names::IS_REQUEST_VALID, names::IS_PICKUP_AT_SAME_LIBRARY]),
                TransitionSpec::new("request", Created, Pending)
                    .before(names::SET_REQUEST_PARAMETERS)
                    .conditions(&[names::IS_REQUEST_VALID]),
                TransitionSpec::new("validate_request", Pending, ItemInTransit)
                    .before(names::SET_PARAMETERS)
                    .conditions(&[names::IS_VALIDATE_REQUEST_VALID])
                    .unless(&[names::IS_PICKUP_AT_SAME_LIBRARY]),
                TransitionSpec::new("validate_request", Pending, ItemAtDesk)
                    .before(names::SET_PARAMETERS)
                    .conditions(&[names::IS_VALIDATE_REQUEST_VALID, names::IS_PICKUP_AT_SAME_LIBRARY]),
                TransitionSpec::new("checkout", Created, ItemOnLoan)
                    .before(names::SET_PARAMETERS)
                    .conditions(&[names::IS_CHECKOUT_VALID]),
                TransitionSpec::new("checkin", ItemOnLoan, ItemReturned)
                    .before(names::SET_PARAMETERS)
                    .conditions(&[names::IS_CHECKIN_VALID]),
            ],
            triggers: Vec::new(),
        }
    }
}

/// A named, resolved guard.
#[derive(Clone)]
pub struct NamedGuard {
    name: String,
    guard: GuardFn,
}

impl NamedGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guard(&self) -> &GuardFn {
        &self.guard
    }
}

impl core::fmt::Debug for NamedGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A named, resolved pre-action.
#[derive(Debug, Clone)]
pub struct NamedPreAction {
    name: String,
    action: PreAction,
}

impl NamedPreAction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> PreAction {
        self.action
    }
}

/// A validated transition edge.
#[derive(Debug, Clone)]
pub struct TransitionDefinition {
    trigger: String,
    source: LoanState,
    dest: LoanState,
    pre_action: Option<NamedPreAction>,
    guards: Vec<NamedGuard>,
    unless: Vec<NamedGuard>,
    permission_tag: Option<String>,
}

impl TransitionDefinition {
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn source(&self) -> LoanState {
        self.source
    }

    pub fn dest(&self) -> LoanState {
        self.dest
    }

    pub fn pre_action(&self) -> Option<&NamedPreAction> {
        self.pre_action.as_ref()
    }

    pub fn guards(&self) -> &[NamedGuard] {
        &self.guards
    }

    pub fn unless(&self) -> &[NamedGuard] {
        &self.unless
    }

    pub fn permission_tag(&self) -> Option<&str> {
        self.permission_tag.as_deref()
    }
}

/// Immutable, validated lifecycle definition shared by every engine call.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    initial_state: LoanState,
    states: Vec<LoanState>,
    definitions: Vec<TransitionDefinition>,
    triggers: Vec<String>,
}

impl TransitionTable {
    /// Validate `config` against `registry`.
    ///
    /// Fails when a state is unknown or undeclared, a guard or pre-action name
    /// is not registered, or a declared trigger has no transition.
    pub fn build(config: &TransitionConfig, registry: &Registry) -> Result<Self, TableError> {
        let (initial_state, states) = parse_states(&config.states)?;

        let mut definitions = Vec::with_capacity(config.transitions.len());
        let mut triggers: Vec<String> = Vec::new();

        for (index, spec) in config.transitions.iter().enumerate() {
            if spec.trigger.trim().is_empty() {
                return Err(TableError::EmptyTrigger { index });
            }
            let context = format!("transition #{index} ('{}')", spec.trigger);
            let source = declared_state(&states, &spec.source, &context)?;
            let dest = declared_state(&states, &spec.dest, &context)?;

            let pre_action = spec
                .before
                .as_ref()
                .map(|name| {
                    registry
                        .pre_action(name)
                        .map(|action| NamedPreAction {
                            name: name.clone(),
                            action,
                        })
                        .ok_or_else(|| TableError::UnknownPreAction {
                            name: name.clone(),
                            trigger: spec.trigger.clone(),
                        })
                })
                .transpose()?;

            definitions.push(TransitionDefinition {
                trigger: spec.trigger.clone(),
                source,
                dest,
                pre_action,
                guards: resolve_guards(registry, &spec.conditions, &spec.trigger)?,
                unless: resolve_guards(registry, &spec.unless, &spec.trigger)?,
                permission_tag: spec.permission.clone(),
            });

            if !triggers.contains(&spec.trigger) {
                triggers.push(spec.trigger.clone());
            }
        }

        for trigger in &config.triggers {
            if !triggers.contains(trigger) {
                return Err(TableError::TriggerWithoutTransitions {
                    trigger: trigger.clone(),
                });
            }
        }

        Ok(Self {
            initial_state,
            states,
            definitions,
            triggers,
        })
    }

    /// State of loans created without an explicit one.
    pub fn initial_state(&self) -> LoanState {
        self.initial_state
    }

    pub fn states(&self) -> &[LoanState] {
        &self.states
    }

    pub fn definitions(&self) -> &[TransitionDefinition] {
        &self.definitions
    }

    /// Distinct trigger names, in declaration order.
    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    pub fn has_trigger(&self, trigger: &str) -> bool {
        self.triggers.iter().any(|t| t == trigger)
    }

    /// Candidate definitions for `trigger` from `source`, in declaration order.
    pub fn candidates<'a>(
        &'a self,
        trigger: &'a str,
        source: LoanState,
    ) -> impl Iterator<Item = &'a TransitionDefinition> + 'a {
        self.definitions
            .iter()
            .filter(move |d| d.trigger == trigger && d.source == source)
    }

    /// First permission tag declared for `trigger`, if any.
    pub fn permission_tag(&self, trigger: &str) -> Option<&str> {
        self.definitions
            .iter()
            .filter(|d| d.trigger == trigger)
            .find_map(|d| d.permission_tag())
    }
}

fn parse_states(raw: &[String]) -> Result<(LoanState, Vec<LoanState>), TableError> {
    let mut seen = HashSet::new();
    let mut states = Vec::with_capacity(raw.len());
    for name in raw {
        let state = name.parse::<LoanState>().map_err(|_| TableError::UnknownState {
            state: name.clone(),
            context: "the declared state list".to_string(),
        })?;
        if !seen.insert(state) {
            return Err(TableError::DuplicateState { state: name.clone() });
        }
        states.push(state);
    }
    let initial = states.first().copied().ok_or(TableError::NoStates)?;
    Ok((initial, states))
}

fn declared_state(states: &[LoanState], name: &str, context: &str) -> Result<LoanState, TableError> {
    name.parse::<LoanState>()
        .ok()
        .filter(|state| states.contains(state))
        .ok_or_else(|| TableError::UnknownState {
            state: name.to_string(),
            context: context.to_string(),
        })
}

fn resolve_guards(registry: &Registry, names: &[String], trigger: &str) -> Result<Vec<NamedGuard>, TableError> {
    names
        .iter()
        .map(|name| {
            registry
                .guard(name)
                .map(|guard| NamedGuard {
                    name: name.clone(),
                    guard,
                })
                .ok_or_else(|| TableError::UnknownGuard {
                    name: name.clone(),
                    trigger: trigger.to_string(),
                })
        })
        .collect()
}
