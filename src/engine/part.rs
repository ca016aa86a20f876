//! Condition parts: the leaves of the phase graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::events::PartObserver;
use super::types::{ComparisonOperator, PartId, PartSpec};
use crate::error::PhaseError;
use crate::fsm::subject::StateObserver;
use crate::fsm::{
    Event, MachineState, PartState, StateMachine, Step, Subject, TransitionHooks, lock,
};
use crate::observability::metrics;
use crate::strategy::{Evaluation, PartStrategy};

#[derive(Debug, Default)]
struct PartRecord {
    is_clear: bool,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
}

impl TransitionHooks<PartState> for PartRecord {
    fn on_enter(&mut self, state: PartState, step: &Step<PartState>) {
        match state {
            PartState::Unsatisfied if step.event == Event::Activate => {
                self.start_time = Some(Utc::now());
                self.finish_time = None;
                self.is_clear = false;
            }
            PartState::Satisfied => {
                self.finish_time = Some(Utc::now());
                self.is_clear = true;
            }
            PartState::Ready => *self = Self::default(),
            PartState::Unsatisfied | PartState::Processing => {}
        }
    }
}

struct PartInner {
    machine: StateMachine<PartState>,
    record: PartRecord,
    strategy: Option<Box<dyn PartStrategy>>,
}

/// A single measurable requirement inside a condition.
pub struct ConditionPart {
    spec: PartSpec,
    inner: Mutex<PartInner>,
    generation: AtomicU64,
    state_observers: Subject<dyn StateObserver>,
    part_observers: Subject<dyn PartObserver>,
}

/// Point-in-time view of a part.
#[derive(Debug, Clone, Serialize)]
pub struct PartSnapshot {
    /// Part identifier.
    pub id: PartId,
    /// Display label.
    pub label: String,
    /// Current state.
    pub state: PartState,
    /// Comparison operator.
    pub operator: ComparisonOperator,
    /// Reference value.
    pub reference: i64,
    /// Current strategy value.
    pub value: i64,
    /// Whether the part has been satisfied since it was last armed.
    pub is_clear: bool,
    /// When the part was last armed.
    pub start_time: Option<DateTime<Utc>>,
    /// When the part was last satisfied.
    pub finish_time: Option<DateTime<Utc>>,
}

impl ConditionPart {
    /// Creates a part in `ready` with no strategy.
    #[must_use]
    pub fn new(spec: PartSpec) -> Arc<Self> {
        Arc::new(Self {
            spec,
            inner: Mutex::new(PartInner {
                machine: StateMachine::new(),
                record: PartRecord::default(),
                strategy: None,
            }),
            generation: AtomicU64::new(0),
            state_observers: Subject::new(),
            part_observers: Subject::new(),
        })
    }

    /// Part identifier.
    #[must_use]
    pub const fn id(&self) -> PartId {
        self.spec.id
    }

    /// Static definition.
    #[must_use]
    pub const fn spec(&self) -> &PartSpec {
        &self.spec
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PartState {
        lock(&self.inner).machine.current()
    }

    /// Whether the part has been satisfied since it was last armed.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        lock(&self.inner).record.is_clear
    }

    /// When the part was last armed.
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).record.start_time
    }

    /// When the part was last satisfied.
    #[must_use]
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).record.finish_time
    }

    /// Observers of state tokens.
    #[must_use]
    pub const fn state_observers(&self) -> &Subject<dyn StateObserver> {
        &self.state_observers
    }

    /// Observers of satisfaction.
    #[must_use]
    pub const fn part_observers(&self) -> &Subject<dyn PartObserver> {
        &self.part_observers
    }

    /// Arming generation. Bumped under the part's lock whenever the part is
    /// reset, halted or given a new strategy; timer ticks carry the
    /// generation they were armed for and are dropped once it moves on.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns `true` once a strategy is installed.
    #[must_use]
    pub fn has_strategy(&self) -> bool {
        lock(&self.inner).strategy.is_some()
    }

    /// Current strategy value (0 without a strategy).
    #[must_use]
    pub fn current_value(&self) -> i64 {
        lock(&self.inner)
            .strategy
            .as_ref()
            .map_or(0, |s| s.current_value())
    }

    /// Replaces the strategy. The previous one is cleaned up first; the new
    /// one is initialized against this part before it is installed.
    ///
    /// # Errors
    ///
    /// Returns the initialization error, in which case the part is left
    /// without a strategy.
    pub fn set_strategy(self: &Arc<Self>, strategy: Box<dyn PartStrategy>) -> Result<(), PhaseError> {
        {
            let mut inner = lock(&self.inner);
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(old) = inner.strategy.take() {
                old.cleanup();
            }
        }
        strategy.initialize(self)?;
        lock(&self.inner).strategy = Some(strategy);
        Ok(())
    }

    /// Checks the part's definition.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` for an unspecified operator or an
    /// empty `between` range.
    pub fn validate(&self) -> Result<(), PhaseError> {
        self.spec.validate()
    }

    /// Arms the part (`ready → unsatisfied`) and starts its strategy.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` unless the part is `ready`.
    pub fn activate(&self) -> Result<(), PhaseError> {
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            let step = inner.machine.fire(Event::Activate, &mut inner.record)?;
            match &inner.strategy {
                Some(strategy) => {
                    if let Err(e) = strategy.start() {
                        warn!(part_id = %self.id(), error = %e, "failed to start part strategy");
                    }
                }
                None => warn!(part_id = %self.id(), "part activated without a strategy"),
            }
            step
        };
        self.dispatch(&step);
        Ok(())
    }

    /// Feeds `increment` to the strategy.
    ///
    /// From `unsatisfied` the part moves to `processing`; if the strategy
    /// reports the goal met it then moves to `satisfied`. Concurrent callers
    /// are serialized, so exactly one of them observes the satisfying step.
    ///
    /// # Errors
    ///
    /// - `PhaseError::InvalidTransition` unless the part is `unsatisfied` or
    ///   `processing`; the strategy is not touched.
    /// - `PhaseError::Strategy` if no strategy is installed or evaluation
    ///   fails; the state is not changed.
    pub fn process(&self, increment: i64) -> Result<PartState, PhaseError> {
        let (steps, state) = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            let current = inner.machine.current();
            if !matches!(current, PartState::Unsatisfied | PartState::Processing) {
                return Err(PhaseError::InvalidTransition {
                    entity: "part",
                    state: current.as_str(),
                    event: Event::Process,
                });
            }
            let strategy = inner.strategy.as_ref().ok_or_else(|| {
                PhaseError::Strategy(format!("{} has no strategy", self.id()))
            })?;
            let evaluation = strategy.evaluate(&self.spec, increment)?;

            let mut steps = Vec::with_capacity(2);
            if current == PartState::Unsatisfied {
                steps.push(inner.machine.fire(Event::Process, &mut inner.record)?);
            }
            if evaluation == Evaluation::Satisfied {
                steps.push(inner.machine.fire(Event::Complete, &mut inner.record)?);
                strategy.stop();
            }
            (steps, inner.machine.current())
        };
        for step in &steps {
            self.dispatch(step);
        }
        Ok(state)
    }

    /// `processing → satisfied`.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` from any other state.
    pub fn complete(&self) -> Result<(), PhaseError> {
        self.fire(Event::Complete)
    }

    /// `unsatisfied | processing → satisfied`, used by time strategies.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` from any other state.
    pub fn timeout(&self) -> Result<(), PhaseError> {
        self.fire(Event::Timeout)
    }

    /// Timer expiry for the activation armed at `generation`.
    ///
    /// Returns `Ok(false)` without touching the part when the generation is
    /// stale, i.e. the part was reset or halted after the timer was armed.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` unless the part is
    /// `unsatisfied` or `processing`.
    pub fn expire(&self, generation: u64) -> Result<bool, PhaseError> {
        let step = {
            let mut guard = lock(&self.inner);
            if self.generation() != generation {
                return Ok(false);
            }
            let inner = &mut *guard;
            let step = inner.machine.fire(Event::Timeout, &mut inner.record)?;
            if let Some(strategy) = &inner.strategy {
                strategy.stop();
            }
            step
        };
        self.dispatch(&step);
        Ok(true)
    }

    /// Stops the strategy's background activity without changing state.
    /// Pending timer ticks from before the halt are discarded.
    pub fn halt(&self) {
        let inner = lock(&self.inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(strategy) = &inner.strategy {
            strategy.stop();
        }
    }

    /// `processing → unsatisfied`.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` from any other state.
    pub fn revert(&self) -> Result<(), PhaseError> {
        self.fire(Event::Revert)
    }

    /// Returns the part to `ready`, cleaning up and re-initializing its
    /// strategy. A `ready` part is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` if the table rejects the reset.
    pub fn reset(self: &Arc<Self>) -> Result<(), PhaseError> {
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            if inner.machine.is(PartState::Ready) {
                return Ok(());
            }
            let step = inner.machine.fire(Event::Reset, &mut inner.record)?;
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(strategy) = &inner.strategy {
                strategy.cleanup();
                if let Err(e) = strategy.initialize(self) {
                    warn!(part_id = %self.id(), error = %e, "failed to re-initialize part strategy");
                }
            }
            step
        };
        self.dispatch(&step);
        Ok(())
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> PartSnapshot {
        let inner = lock(&self.inner);
        PartSnapshot {
            id: self.spec.id,
            label: self.spec.label.clone(),
            state: inner.machine.current(),
            operator: self.spec.operator,
            reference: self.spec.reference,
            value: inner.strategy.as_ref().map_or(0, |s| s.current_value()),
            is_clear: inner.record.is_clear,
            start_time: inner.record.start_time,
            finish_time: inner.record.finish_time,
        }
    }

    fn fire(&self, event: Event) -> Result<(), PhaseError> {
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            let step = inner.machine.fire(event, &mut inner.record)?;
            if step.to == PartState::Satisfied
                && let Some(strategy) = &inner.strategy
            {
                strategy.stop();
            }
            step
        };
        self.dispatch(&step);
        Ok(())
    }

    fn dispatch(&self, step: &Step<PartState>) {
        debug!(
            part_id = %self.id(),
            from = %step.from,
            to = %step.to,
            event = %step.event,
            "part transition"
        );
        self.state_observers
            .notify(|o| o.on_state_changed(step.to.as_str()));
        if step.to == PartState::Satisfied {
            metrics::record_part_satisfied();
            let id = self.id();
            self.part_observers.notify(|o| o.on_part_satisfied(id));
        }
    }
}

impl std::fmt::Debug for ConditionPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("ConditionPart")
            .field("id", &self.spec.id)
            .field("label", &self.spec.label)
            .field("state", &inner.machine.current())
            .field("strategy", &inner.strategy)
            .finish_non_exhaustive()
    }
}
