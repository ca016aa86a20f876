//! Phases: conditions combined under a rule, arranged in a hierarchy.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::condition::{Condition, ConditionSnapshot};
use super::events::{ConditionObserver, PhaseChange, PhaseObserver};
use super::types::{ConditionId, ConditionType, PhaseId};
use crate::error::PhaseError;
use crate::fsm::subject::StateObserver;
use crate::fsm::{
    Event, MachineState, PhaseState, StateInfo, StateMachine, Step, Subject, TransitionHooks,
    lock,
};
use crate::observability::metrics;

/// Static definition of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSpec {
    /// Phase identifier.
    pub id: PhaseId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Parent phase, `None` for root phases.
    pub parent_id: Option<PhaseId>,
    /// Position among siblings.
    pub order: u32,
    /// How conditions combine.
    pub condition_type: ConditionType,
    /// Move to `next` when the last child phase finishes.
    pub auto_progress: bool,
}

impl PhaseSpec {
    /// Root phase at `order` combining conditions with `condition_type`.
    #[must_use]
    pub fn new(
        id: impl Into<PhaseId>,
        name: impl Into<String>,
        order: u32,
        condition_type: ConditionType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            parent_id: None,
            order,
            condition_type,
            auto_progress: false,
        }
    }

    /// Places the phase under `parent`.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<PhaseId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// Sets the auto-progress flag.
    #[must_use]
    pub const fn with_auto_progress(mut self, auto_progress: bool) -> Self {
        self.auto_progress = auto_progress;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Default)]
struct PhaseRecord {
    satisfied: HashSet<ConditionId>,
    is_active: bool,
    is_clear: bool,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
}

impl TransitionHooks<PhaseState> for PhaseRecord {
    fn on_enter(&mut self, state: PhaseState, step: &Step<PhaseState>) {
        match state {
            PhaseState::Active => {
                if step.from == PhaseState::Next {
                    self.satisfied.clear();
                    self.is_clear = false;
                    self.finish_time = None;
                }
                self.is_active = true;
                self.start_time = Some(Utc::now());
            }
            PhaseState::Finish => {
                self.is_active = false;
                self.finish_time = Some(Utc::now());
            }
            PhaseState::Ready => *self = Self::default(),
            PhaseState::Next => {}
        }
    }
}

struct PhaseInner {
    machine: StateMachine<PhaseState>,
    record: PhaseRecord,
}

/// A stage of the sequence, gated by its conditions.
pub struct Phase {
    spec: PhaseSpec,
    conditions: IndexMap<ConditionId, Arc<Condition>>,
    inner: Mutex<PhaseInner>,
    state_observers: Subject<dyn StateObserver>,
    phase_observers: Subject<dyn PhaseObserver>,
}

/// Point-in-time view of a phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSnapshot {
    /// Phase identifier.
    pub id: PhaseId,
    /// Display name.
    pub name: String,
    /// Parent phase.
    pub parent_id: Option<PhaseId>,
    /// Position among siblings.
    pub order: u32,
    /// Combination rule.
    pub condition_type: ConditionType,
    /// Current state.
    pub state: PhaseState,
    /// Whether the phase is between activation and finish.
    pub is_active: bool,
    /// Whether the combination rule has been met.
    pub is_clear: bool,
    /// When the phase was last activated.
    pub start_time: Option<DateTime<Utc>>,
    /// When the phase last finished.
    pub finish_time: Option<DateTime<Utc>>,
    /// Conditions in declaration order.
    pub conditions: Vec<ConditionSnapshot>,
}

impl Phase {
    /// Creates a phase owning `conditions` and subscribes to each of them.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` if two conditions share an id.
    pub fn new(spec: PhaseSpec, conditions: Vec<Arc<Condition>>) -> Result<Arc<Self>, PhaseError> {
        let mut by_id = IndexMap::with_capacity(conditions.len());
        for condition in conditions {
            let id = condition.id();
            if by_id.insert(id, condition).is_some() {
                return Err(PhaseError::Validation(format!(
                    "{} has duplicate {id}",
                    spec.id
                )));
            }
        }
        let phase = Arc::new(Self {
            spec,
            conditions: by_id,
            inner: Mutex::new(PhaseInner {
                machine: StateMachine::new(),
                record: PhaseRecord::default(),
            }),
            state_observers: Subject::new(),
            phase_observers: Subject::new(),
        });
        let me: Weak<Self> = Arc::downgrade(&phase);
        let observer: Weak<dyn ConditionObserver> = me;
        for condition in phase.conditions.values() {
            condition.condition_observers().subscribe(observer.clone());
        }
        Ok(phase)
    }

    /// Static definition.
    #[must_use]
    pub const fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    /// Phase identifier.
    #[must_use]
    pub const fn id(&self) -> PhaseId {
        self.spec.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Parent phase.
    #[must_use]
    pub const fn parent_id(&self) -> Option<PhaseId> {
        self.spec.parent_id
    }

    /// Position among siblings.
    #[must_use]
    pub const fn order(&self) -> u32 {
        self.spec.order
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PhaseState {
        lock(&self.inner).machine.current()
    }

    /// Whether the phase is between activation and finish.
    #[must_use]
    pub fn is_active(&self) -> bool {
        lock(&self.inner).record.is_active
    }

    /// Whether the combination rule has been met.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        lock(&self.inner).record.is_clear
    }

    /// When the phase was last activated.
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).record.start_time
    }

    /// When the phase last finished.
    #[must_use]
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).record.finish_time
    }

    /// Ids of conditions satisfied while the phase was armed.
    #[must_use]
    pub fn satisfied_conditions(&self) -> Vec<ConditionId> {
        let inner = lock(&self.inner);
        self.conditions
            .keys()
            .filter(|id| inner.record.satisfied.contains(id))
            .copied()
            .collect()
    }

    /// Conditions in declaration order.
    #[must_use]
    pub fn conditions(&self) -> Vec<Arc<Condition>> {
        self.conditions.values().cloned().collect()
    }

    /// Looks up a condition by id.
    #[must_use]
    pub fn condition(&self, id: ConditionId) -> Option<Arc<Condition>> {
        self.conditions.get(&id).cloned()
    }

    /// Observers of state tokens.
    #[must_use]
    pub const fn state_observers(&self) -> &Subject<dyn StateObserver> {
        &self.state_observers
    }

    /// Observers of phase transitions.
    #[must_use]
    pub const fn phase_observers(&self) -> &Subject<dyn PhaseObserver> {
        &self.phase_observers
    }

    /// Description of the current state for operators.
    #[must_use]
    pub fn state_info(&self) -> StateInfo {
        StateInfo::for_phase(self.state())
    }

    /// Checks the phase and every condition.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` if a `single` phase does not have
    /// exactly one condition, or a condition is invalid.
    pub fn validate(&self) -> Result<(), PhaseError> {
        if self.spec.condition_type == ConditionType::Single && self.conditions.len() != 1 {
            return Err(PhaseError::Validation(format!(
                "{}: single phase needs exactly one condition, has {}",
                self.spec.id,
                self.conditions.len()
            )));
        }
        self.conditions.values().try_for_each(|c| c.validate())
    }

    /// Starts the phase (`ready | next → active`) and arms its conditions.
    ///
    /// Observers see `active` before any condition is armed. Re-activating
    /// from `next` resets the conditions first so they run again.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` from `active` or `finish`.
    pub fn activate(&self) -> Result<(), PhaseError> {
        let step = self.fire(Event::Activate)?;
        if step.from == PhaseState::Next {
            for condition in self.conditions.values() {
                if let Err(e) = condition.reset() {
                    warn!(phase = %self.spec.name, condition_id = %condition.id(), error = %e, "failed to reset condition");
                }
            }
        }
        self.dispatch(&step);
        for condition in self.conditions.values() {
            if let Err(e) = condition.activate() {
                warn!(phase = %self.spec.name, condition_id = %condition.id(), error = %e, "failed to activate condition");
            }
        }
        Ok(())
    }

    /// `active → next`, also used to advance `unspecified` phases by hand.
    /// Leaving `active` halts every condition's strategy.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` unless the phase is `active`.
    pub fn next(&self) -> Result<(), PhaseError> {
        let step = self.fire(Event::Next)?;
        self.dispatch(&step);
        Ok(())
    }

    /// `next → finish`.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` unless the phase is `next`.
    pub fn finish(&self) -> Result<(), PhaseError> {
        let step = self.fire(Event::Finish)?;
        self.dispatch(&step);
        Ok(())
    }

    /// Resets every condition and returns the phase to `ready`. Resetting a
    /// `ready` phase does nothing and emits nothing.
    ///
    /// # Errors
    ///
    /// Returns the first condition reset error.
    pub fn reset(&self) -> Result<(), PhaseError> {
        if self.state() == PhaseState::Ready {
            return Ok(());
        }
        for condition in self.conditions.values() {
            condition.reset()?;
        }
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            if inner.machine.is(PhaseState::Ready) {
                return Ok(());
            }
            inner.machine.fire(Event::Reset, &mut inner.record)?
        };
        self.dispatch(&step);
        Ok(())
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> PhaseSnapshot {
        let (state, is_active, is_clear, start_time, finish_time) = {
            let inner = lock(&self.inner);
            (
                inner.machine.current(),
                inner.record.is_active,
                inner.record.is_clear,
                inner.record.start_time,
                inner.record.finish_time,
            )
        };
        PhaseSnapshot {
            id: self.spec.id,
            name: self.spec.name.clone(),
            parent_id: self.spec.parent_id,
            order: self.spec.order,
            condition_type: self.spec.condition_type,
            state,
            is_active,
            is_clear,
            start_time,
            finish_time,
            conditions: self.conditions.values().map(|c| c.snapshot()).collect(),
        }
    }

    fn fire(&self, event: Event) -> Result<Step<PhaseState>, PhaseError> {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        inner.machine.fire(event, &mut inner.record)
    }

    fn rule_met(&self, satisfied: &HashSet<ConditionId>) -> bool {
        if self.conditions.is_empty() {
            return false;
        }
        match self.spec.condition_type {
            ConditionType::And => self.conditions.keys().all(|id| satisfied.contains(id)),
            ConditionType::Or => !satisfied.is_empty(),
            ConditionType::Single => {
                self.conditions.len() == 1
                    && self.conditions.keys().all(|id| satisfied.contains(id))
            }
            ConditionType::Unspecified => false,
        }
    }

    fn dispatch(&self, step: &Step<PhaseState>) {
        info!(
            phase = %self.spec.name,
            phase_id = %self.spec.id,
            from = %step.from,
            to = %step.to,
            "phase transition"
        );
        metrics::record_phase_transition(step.to.as_str());
        if step.from == PhaseState::Active && step.to == PhaseState::Next {
            for condition in self.conditions.values() {
                condition.halt();
            }
        }
        self.state_observers
            .notify(|o| o.on_state_changed(step.to.as_str()));
        let change = PhaseChange {
            phase_id: self.spec.id,
            name: self.spec.name.clone(),
            parent_id: self.spec.parent_id,
            order: self.spec.order,
            from: step.from,
            to: step.to,
        };
        self.phase_observers.notify(|o| o.on_phase_changed(&change));
    }
}

impl ConditionObserver for Phase {
    fn on_condition_satisfied(&self, condition: ConditionId) {
        if !self.conditions.contains_key(&condition) {
            warn!(phase = %self.spec.name, condition_id = %condition, "satisfaction from unknown condition");
            return;
        }
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            inner.record.satisfied.insert(condition);
            if !self.rule_met(&inner.record.satisfied) {
                return;
            }
            inner.record.is_clear = true;
            if !inner.machine.is(PhaseState::Active) {
                debug!(phase = %self.spec.name, state = %inner.machine.current(), "satisfaction recorded while not active");
                return;
            }
            match inner.machine.fire(Event::Next, &mut inner.record) {
                Ok(step) => step,
                Err(e) => {
                    debug!(phase = %self.spec.name, error = %e, "advance rejected");
                    return;
                }
            }
        };
        self.dispatch(&step);
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("id", &self.spec.id)
            .field("name", &self.spec.name)
            .field("order", &self.spec.order)
            .field("state", &self.state())
            .field("conditions", &self.conditions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::part::ConditionPart;
    use crate::engine::types::{ConditionKind, PartId, PartSpec};
    use crate::fsm::{ConditionState, PartState};
    use crate::strategy::StrategyFactory;

    #[derive(Default)]
    struct Tokens(Mutex<Vec<String>>);

    impl StateObserver for Tokens {
        fn on_state_changed(&self, state: &str) {
            self.0.lock().unwrap().push(state.to_string());
        }
    }

    fn counter_condition(id: u32, reference: i64) -> Arc<Condition> {
        let condition = Condition::new(id, format!("c{id}"), ConditionKind::Counter);
        condition
            .add_part(ConditionPart::new(PartSpec::counter_at_least(1, "hits", reference)))
            .unwrap();
        condition
            .initialize_part_strategies(&StrategyFactory::new())
            .unwrap();
        condition
    }

    fn phase(condition_type: ConditionType, count: u32) -> Arc<Phase> {
        let conditions = (1..=count).map(|id| counter_condition(id, 1)).collect();
        Phase::new(PhaseSpec::new(1, "stage", 1, condition_type), conditions).unwrap()
    }

    fn satisfy(phase: &Phase, condition: u32) {
        phase
            .condition(ConditionId(condition))
            .unwrap()
            .part(PartId(1))
            .unwrap()
            .process(1)
            .unwrap();
    }

    #[test]
    fn test_and_requires_all_in_any_order() {
        let phase = phase(ConditionType::And, 3);
        phase.activate().unwrap();
        satisfy(&phase, 3);
        satisfy(&phase, 1);
        assert_eq!(phase.state(), PhaseState::Active);
        assert!(!phase.is_clear());
        satisfy(&phase, 2);
        assert_eq!(phase.state(), PhaseState::Next);
        assert!(phase.is_clear());
    }

    #[test]
    fn test_or_advances_on_first() {
        let phase = phase(ConditionType::Or, 3);
        phase.activate().unwrap();
        satisfy(&phase, 2);
        assert_eq!(phase.state(), PhaseState::Next);
        satisfy(&phase, 1);
        assert_eq!(phase.state(), PhaseState::Next);
        assert_eq!(phase.satisfied_conditions(), [ConditionId(1), ConditionId(2)]);
    }

    #[test]
    fn test_single() {
        let phase = phase(ConditionType::Single, 1);
        assert!(phase.validate().is_ok());
        phase.activate().unwrap();
        satisfy(&phase, 1);
        assert_eq!(phase.state(), PhaseState::Next);
    }

    #[test]
    fn test_single_with_many_conditions_is_invalid() {
        assert!(phase(ConditionType::Single, 2).validate().is_err());
    }

    #[test]
    fn test_unspecified_never_advances() {
        let phase = phase(ConditionType::Unspecified, 1);
        phase.activate().unwrap();
        satisfy(&phase, 1);
        assert_eq!(phase.state(), PhaseState::Active);
        phase.next().unwrap();
        assert_eq!(phase.state(), PhaseState::Next);
    }

    #[test]
    fn test_no_conditions_never_advances() {
        let phase = Phase::new(PhaseSpec::new(1, "empty", 1, ConditionType::Or), vec![]).unwrap();
        phase.activate().unwrap();
        phase.on_condition_satisfied(ConditionId(9));
        assert_eq!(phase.state(), PhaseState::Active);
    }

    #[test]
    fn test_duplicate_condition_ids_rejected() {
        let result = Phase::new(
            PhaseSpec::new(1, "dup", 1, ConditionType::And),
            vec![counter_condition(1, 1), counter_condition(1, 2)],
        );
        assert!(matches!(result, Err(PhaseError::Validation(_))));
    }

    #[test]
    fn test_satisfaction_outside_active_is_recorded_only() {
        let phase = phase(ConditionType::Or, 2);
        phase.activate().unwrap();
        satisfy(&phase, 1);
        phase.finish().unwrap();
        phase.on_condition_satisfied(ConditionId(2));
        assert_eq!(phase.state(), PhaseState::Finish);
        assert_eq!(phase.satisfied_conditions().len(), 2);
    }

    #[test]
    fn test_notifies_active_before_children_drive_next() {
        let phase = phase(ConditionType::And, 1);
        let tokens = Arc::new(Tokens::default());
        let observer: Arc<dyn StateObserver> = tokens.clone();
        phase.state_observers().add_observer(&observer);
        phase.activate().unwrap();
        satisfy(&phase, 1);
        phase.finish().unwrap();
        assert_eq!(*tokens.0.lock().unwrap(), ["active", "next", "finish"]);
    }

    #[test]
    fn test_reset_on_ready_is_silent() {
        let phase = phase(ConditionType::And, 1);
        let tokens = Arc::new(Tokens::default());
        let observer: Arc<dyn StateObserver> = tokens.clone();
        phase.state_observers().add_observer(&observer);
        phase.reset().unwrap();
        assert!(tokens.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_returns_everything_to_ready() {
        let phase = phase(ConditionType::And, 2);
        phase.activate().unwrap();
        satisfy(&phase, 1);
        satisfy(&phase, 2);
        phase.finish().unwrap();
        assert!(phase.finish_time().is_some());
        phase.reset().unwrap();

        assert_eq!(phase.state(), PhaseState::Ready);
        assert!(phase.start_time().is_none());
        assert!(phase.finish_time().is_none());
        assert!(phase.satisfied_conditions().is_empty());
        assert!(!phase.is_active());
        for condition in phase.conditions() {
            assert_eq!(condition.state(), ConditionState::Ready);
            assert!(condition.start_time().is_none());
            assert!(condition.finish_time().is_none());
            assert!(condition.satisfied_parts().is_empty());
            for part in condition.parts() {
                assert_eq!(part.state(), PartState::Ready);
                assert!(part.start_time().is_none());
                assert!(part.finish_time().is_none());
            }
        }
    }

    #[test]
    fn test_reactivate_from_next_rearms_conditions() {
        let phase = phase(ConditionType::And, 1);
        phase.activate().unwrap();
        satisfy(&phase, 1);
        assert_eq!(phase.state(), PhaseState::Next);

        phase.activate().unwrap();
        assert_eq!(phase.state(), PhaseState::Active);
        assert!(!phase.is_clear());
        assert_eq!(
            phase.condition(ConditionId(1)).unwrap().state(),
            ConditionState::Unsatisfied
        );
        satisfy(&phase, 1);
        assert_eq!(phase.state(), PhaseState::Next);
    }

    #[test]
    fn test_state_info() {
        let phase = phase(ConditionType::And, 1);
        assert_eq!(phase.state_info().allowed_next, ["activate"]);
        phase.activate().unwrap();
        assert_eq!(phase.state_info().allowed_next, ["next"]);
    }
}
