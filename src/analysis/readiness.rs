//! Readiness analysis: which values and initializers of a raw graph can be
//! computed in the current phase without further external input.
//!
//! Two runs are modelled. The *initializer-setup run* resolves every tracked
//! initializer at once and never sees declared inputs. The *data-processing
//! run* additionally has the declared inputs available. Both passes are a
//! single forward sweep over values in creation order, which is a
//! topological order of the graph.

use crate::error::PlanError;
use crate::graph::{ComputationGraph, InitializerId, OpId, ValueId, ValueSource};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Root cause of a value whose readiness cannot be decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    /// A placeholder that is neither declared nor resolved.
    Injected(ValueId),
    Untracked { resource: OpId, initializer: Option<InitializerId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Blocked,
    Invalid(Cause),
}

impl State {
    /// Invalid beats Blocked beats Ready; the first invalid cause is kept.
    #[inline]
    fn and(self, other: State) -> State {
        match (self, other) {
            (State::Invalid(_), _) => self,
            (_, State::Invalid(_)) => other,
            (State::Blocked, _) | (_, State::Blocked) => State::Blocked,
            _ => State::Ready,
        }
    }
}

/// Initializer-setup run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupState {
    Ready,
    Blocked,
    /// Reaches a placeholder that is only fed in the data-processing run.
    Fed(ValueId),
    /// Reaches the output of a resource op (another initializer's table).
    Chained(ValueId),
}

impl SetupState {
    #[inline]
    fn and(self, other: SetupState) -> SetupState {
        match (self, other) {
            (SetupState::Fed(_) | SetupState::Chained(_), _) => self,
            (_, SetupState::Fed(_) | SetupState::Chained(_)) => other,
            (SetupState::Blocked, _) | (_, SetupState::Blocked) => SetupState::Blocked,
            _ => SetupState::Ready,
        }
    }
}

/// Result of analysing a graph for one phase. Read-only once built.
#[derive(Debug, Clone)]
pub struct ReadinessReport<'g> {
    graph: &'g ComputationGraph,
    declared: BTreeSet<ValueId>,
    resolved: BTreeMap<ValueId, bool>,
    value_states: Vec<State>,
    initializer_ready: Vec<bool>,
}

impl<'g> ReadinessReport<'g> {
    /// Analyzes `graph` given the inputs fed in the data-processing run and
    /// the values already decided by earlier phases. A decided value is a
    /// source in both runs, whatever produces it in the graph.
    ///
    /// Fails if a tracked initializer cannot be resolved in a single
    /// setup run.
    pub fn analyze(
        graph: &'g ComputationGraph,
        declared_inputs: impl IntoIterator<Item = ValueId>,
        resolved_values: impl IntoIterator<Item = (ValueId, bool)>,
    ) -> Result<Self, PlanError> {
        let declared: BTreeSet<ValueId> = declared_inputs.into_iter().collect();
        let resolved: BTreeMap<ValueId, bool> = resolved_values.into_iter().collect();
        if let Some(v) = declared.iter().chain(resolved.keys()).find(|v| !graph.contains_value(**v)) {
            return Err(PlanError::UnknownValue(v.0));
        }

        let mut report = Self {
            graph,
            declared,
            resolved,
            value_states: Vec::with_capacity(graph.value_count()),
            initializer_ready: Vec::new(),
        };
        report.initializer_ready = report.analyze_setup_run()?;
        report.value_states = report.analyze_data_run();

        debug!(
            values = graph.value_count(),
            ready_initializers = report.ready_initializers().len(),
            "readiness analyzed"
        );
        Ok(report)
    }

    fn analyze_setup_run(&self) -> Result<Vec<bool>, PlanError> {
        let graph = self.graph;
        let mut states = Vec::with_capacity(graph.value_count());
        for idx in 0..graph.value_count() {
            let id = ValueId::new(idx);
            let state = match (self.resolved.get(&id), graph.value_source(id)) {
                (Some(true), _) => SetupState::Ready,
                (Some(false), _) => SetupState::Blocked,
                (None, ValueSource::Placeholder) => SetupState::Fed(id),
                (None, ValueSource::Constant(_)) => SetupState::Ready,
                (None, ValueSource::Output { op, .. }) => {
                    if graph.op_def(*op).resource {
                        SetupState::Chained(id)
                    } else {
                        graph
                            .op_inputs(*op)
                            .iter()
                            .fold(SetupState::Ready, |acc, v| acc.and(states[v.index()]))
                    }
                }
            };
            states.push(state);
        }

        let mut ready = Vec::new();
        for (_, init) in graph.initializers() {
            if !init.tracked {
                ready.push(false);
                continue;
            }
            let state = init
                .inputs
                .iter()
                .fold(SetupState::Ready, |acc, v| acc.and(states[v.index()]));
            match state {
                SetupState::Ready => ready.push(true),
                SetupState::Blocked => ready.push(false),
                SetupState::Fed(value) => {
                    return Err(PlanError::PlaceholderInInitializer {
                        initializer: init.name.clone(),
                        value: graph.value_name(value).to_string(),
                    });
                }
                SetupState::Chained(value) => {
                    let provider = match graph.value_source(value) {
                        ValueSource::Output { op, .. } => graph
                            .initializer_for(*op)
                            .and_then(|i| graph.initializer(i))
                            .map(|i| i.name.clone())
                            .unwrap_or_else(|| graph.op_name(*op).to_string()),
                        _ => graph.value_name(value).to_string(),
                    };
                    return Err(PlanError::ChainedInitializers {
                        initializer: init.name.clone(),
                        value: graph.value_name(value).to_string(),
                        provider,
                    });
                }
            }
        }
        Ok(ready)
    }

    fn analyze_data_run(&self) -> Vec<State> {
        let graph = self.graph;
        let mut states: Vec<State> = Vec::with_capacity(graph.value_count());
        for idx in 0..graph.value_count() {
            let id = ValueId::new(idx);
            let state = match (self.resolved.get(&id), graph.value_source(id)) {
                (Some(true), _) => State::Ready,
                (Some(false), _) => State::Blocked,
                (None, ValueSource::Placeholder) if self.declared.contains(&id) => State::Ready,
                (None, ValueSource::Placeholder) => State::Invalid(Cause::Injected(id)),
                (None, ValueSource::Constant(_)) => State::Ready,
                (None, ValueSource::Output { op, .. }) if graph.op_def(*op).resource => {
                    match graph.initializer_for(*op) {
                        Some(init) if self.initializer_ready.get(init.index()) == Some(&true) => State::Ready,
                        Some(init) if graph.initializer(init).map_or(false, |i| i.tracked) => State::Blocked,
                        initializer => State::Invalid(Cause::Untracked { resource: *op, initializer }),
                    }
                }
                (None, ValueSource::Output { op, .. }) => graph
                    .op_inputs(*op)
                    .iter()
                    .fold(State::Ready, |acc, v| acc.and(states[v.index()])),
            };
            states.push(state);
        }
        states
    }

    // --- Queries ---

    pub fn graph(&self) -> &'g ComputationGraph { self.graph }

    /// Whether `value` can be computed in the data-processing run.
    pub fn ready_to_run(&self, value: ValueId) -> Result<bool, PlanError> {
        let state = self
            .value_states
            .get(value.index())
            .ok_or(PlanError::UnknownValue(value.0))?;
        match *state {
            State::Ready => Ok(true),
            State::Blocked => Ok(false),
            State::Invalid(cause) => Err(self.cause_error(value, cause)),
        }
    }

    /// Whether `initializer` runs in this phase's initializer-setup run.
    pub fn is_initializer_ready(&self, initializer: InitializerId) -> Result<bool, PlanError> {
        self.initializer_ready
            .get(initializer.index())
            .copied()
            .ok_or(PlanError::UnknownInitializer(initializer.0))
    }

    pub fn ready_initializers(&self) -> Vec<InitializerId> {
        self.initializer_ready
            .iter()
            .enumerate()
            .filter(|(_, ready)| **ready)
            .map(|(i, _)| InitializerId::new(i))
            .collect()
    }

    pub fn is_declared(&self, value: ValueId) -> bool { self.declared.contains(&value) }

    pub fn resolved(&self, value: ValueId) -> Option<bool> { self.resolved.get(&value).copied() }

    fn cause_error(&self, value: ValueId, cause: Cause) -> PlanError {
        let graph = self.graph;
        match cause {
            Cause::Injected(placeholder) => PlanError::ManuallyInjectedValue {
                value: graph.value_name(value).to_string(),
                placeholder: graph.value_name(placeholder).to_string(),
            },
            Cause::Untracked { resource, initializer } => PlanError::UntrackedInitializer {
                value: graph.value_name(value).to_string(),
                resource: graph.op_name(resource).to_string(),
                initializer: initializer
                    .and_then(|i| graph.initializer(i))
                    .map(|i| i.name.clone())
                    .unwrap_or_else(|| "<unregistered>".to_string()),
            },
        }
    }
}
