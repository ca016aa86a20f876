//! Conditions: AND-groups of parts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use super::events::{ConditionObserver, PartObserver};
use super::part::{ConditionPart, PartSnapshot};
use super::types::{ConditionId, ConditionKind, PartId};
use crate::error::PhaseError;
use crate::fsm::subject::StateObserver;
use crate::fsm::{
    ConditionState, Event, MachineState, StateMachine, Step, Subject, TransitionHooks, lock,
};
use crate::observability::metrics;
use crate::strategy::StrategyFactory;

#[derive(Debug, Default)]
struct ConditionRecord {
    satisfied: HashSet<PartId>,
    is_clear: bool,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
}

impl TransitionHooks<ConditionState> for ConditionRecord {
    fn on_enter(&mut self, state: ConditionState, step: &Step<ConditionState>) {
        match state {
            ConditionState::Unsatisfied => {
                if step.event == Event::Activate {
                    self.start_time = Some(Utc::now());
                }
                self.satisfied.clear();
                self.is_clear = false;
                self.finish_time = None;
            }
            ConditionState::Satisfied => {
                self.is_clear = true;
                self.finish_time = Some(Utc::now());
            }
            ConditionState::Ready => *self = Self::default(),
        }
    }
}

struct ConditionInner {
    machine: StateMachine<ConditionState>,
    record: ConditionRecord,
    parts: IndexMap<PartId, Arc<ConditionPart>>,
}

/// A set of parts that must all be satisfied.
pub struct Condition {
    id: ConditionId,
    label: String,
    kind: ConditionKind,
    inner: Mutex<ConditionInner>,
    state_observers: Subject<dyn StateObserver>,
    condition_observers: Subject<dyn ConditionObserver>,
    me: Weak<Self>,
}

/// Point-in-time view of a condition.
#[derive(Debug, Clone, Serialize)]
pub struct ConditionSnapshot {
    /// Condition identifier.
    pub id: ConditionId,
    /// Display label.
    pub label: String,
    /// Strategy kind of its parts.
    pub kind: ConditionKind,
    /// Current state.
    pub state: ConditionState,
    /// Whether the condition has been satisfied since it was last armed.
    pub is_clear: bool,
    /// When the condition was last armed.
    pub start_time: Option<DateTime<Utc>>,
    /// When the condition was last satisfied.
    pub finish_time: Option<DateTime<Utc>>,
    /// Parts in insertion order.
    pub parts: Vec<PartSnapshot>,
}

impl Condition {
    /// Creates an empty condition in `ready`.
    #[must_use]
    pub fn new(id: impl Into<ConditionId>, label: impl Into<String>, kind: ConditionKind) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: id.into(),
            label: label.into(),
            kind,
            inner: Mutex::new(ConditionInner {
                machine: StateMachine::new(),
                record: ConditionRecord::default(),
                parts: IndexMap::new(),
            }),
            state_observers: Subject::new(),
            condition_observers: Subject::new(),
            me: me.clone(),
        })
    }

    /// Condition identifier.
    #[must_use]
    pub const fn id(&self) -> ConditionId {
        self.id
    }

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Strategy kind of its parts.
    #[must_use]
    pub const fn kind(&self) -> ConditionKind {
        self.kind
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConditionState {
        lock(&self.inner).machine.current()
    }

    /// Whether the condition has been satisfied since it was last armed.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        lock(&self.inner).record.is_clear
    }

    /// When the condition was last armed.
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).record.start_time
    }

    /// When the condition was last satisfied.
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
    pub const fn condition_observers(&self) -> &Subject<dyn ConditionObserver> {
        &self.condition_observers
    }

    /// Adds a part and subscribes to its satisfaction.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` if a part with the same id exists.
    pub fn add_part(&self, part: Arc<ConditionPart>) -> Result<(), PhaseError> {
        {
            let mut inner = lock(&self.inner);
            if inner.parts.contains_key(&part.id()) {
                return Err(PhaseError::Validation(format!(
                    "{} already has {}",
                    self.id,
                    part.id()
                )));
            }
            inner.parts.insert(part.id(), Arc::clone(&part));
        }
        let observer: Weak<dyn PartObserver> = self.me.clone();
        part.part_observers().subscribe(observer);
        Ok(())
    }

    /// Parts in insertion order.
    #[must_use]
    pub fn parts(&self) -> Vec<Arc<ConditionPart>> {
        lock(&self.inner).parts.values().cloned().collect()
    }

    /// Looks up a part by id.
    #[must_use]
    pub fn part(&self, id: PartId) -> Option<Arc<ConditionPart>> {
        lock(&self.inner).parts.get(&id).cloned()
    }

    /// Ids of the parts satisfied in the current cycle.
    #[must_use]
    pub fn satisfied_parts(&self) -> Vec<PartId> {
        let inner = lock(&self.inner);
        inner
            .parts
            .keys()
            .filter(|id| inner.record.satisfied.contains(id))
            .copied()
            .collect()
    }

    /// Installs a fresh strategy of this condition's kind on every part.
    ///
    /// # Errors
    ///
    /// Returns the first creation or initialization error.
    pub fn initialize_part_strategies(&self, factory: &StrategyFactory) -> Result<(), PhaseError> {
        for part in self.parts() {
            part.set_strategy(factory.create(self.kind)?)?;
        }
        Ok(())
    }

    /// Checks the condition and its parts.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` if the kind is unspecified, there are
    /// no parts, or a part is invalid.
    pub fn validate(&self) -> Result<(), PhaseError> {
        if self.kind == ConditionKind::Unspecified {
            return Err(PhaseError::Validation(format!(
                "{}: condition kind is unspecified",
                self.id
            )));
        }
        let parts = self.parts();
        if parts.is_empty() {
            return Err(PhaseError::Validation(format!(
                "{}: condition must have at least one part",
                self.id
            )));
        }
        parts.iter().try_for_each(|p| p.validate())
    }

    /// Arms the condition (`ready → unsatisfied`) and then every part.
    ///
    /// Part activation failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` unless the condition is `ready`.
    pub fn activate(&self) -> Result<(), PhaseError> {
        self.fire(Event::Activate)
    }

    /// `unsatisfied → satisfied`.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` from any other state.
    pub fn complete(&self) -> Result<(), PhaseError> {
        self.fire(Event::Complete)
    }

    /// `ready | satisfied → unsatisfied`. Clears the satisfied set without
    /// touching the parts.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` from `unsatisfied`.
    pub fn revert(&self) -> Result<(), PhaseError> {
        self.fire(Event::Revert)
    }

    /// Stops the strategies of every part without changing any state, so
    /// timers of a phase that moved on cannot satisfy it later.
    pub fn halt(&self) {
        for part in self.parts() {
            part.halt();
        }
        debug!(condition_id = %self.id, "condition halted");
    }

    /// Resets every part, then the condition. A `ready` condition whose parts
    /// are all `ready` is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the first part reset error.
    pub fn reset(&self) -> Result<(), PhaseError> {
        for part in self.parts() {
            part.reset()?;
        }
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            if inner.machine.is(ConditionState::Ready) {
                return Ok(());
            }
            inner.machine.fire(Event::Reset, &mut inner.record)?
        };
        self.dispatch(&step);
        Ok(())
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> ConditionSnapshot {
        let (state, record, parts) = {
            let inner = lock(&self.inner);
            (
                inner.machine.current(),
                (inner.record.is_clear, inner.record.start_time, inner.record.finish_time),
                inner.parts.values().cloned().collect::<Vec<_>>(),
            )
        };
        ConditionSnapshot {
            id: self.id,
            label: self.label.clone(),
            kind: self.kind,
            state,
            is_clear: record.0,
            start_time: record.1,
            finish_time: record.2,
            parts: parts.iter().map(|p| p.snapshot()).collect(),
        }
    }

    fn fire(&self, event: Event) -> Result<(), PhaseError> {
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            inner.machine.fire(event, &mut inner.record)?
        };
        self.dispatch(&step);
        Ok(())
    }

    fn dispatch(&self, step: &Step<ConditionState>) {
        debug!(
            condition_id = %self.id,
            from = %step.from,
            to = %step.to,
            event = %step.event,
            "condition transition"
        );
        self.state_observers
            .notify(|o| o.on_state_changed(step.to.as_str()));
        match step.to {
            ConditionState::Unsatisfied if step.event == Event::Activate => {
                for part in self.parts() {
                    if let Err(e) = part.activate() {
                        warn!(condition_id = %self.id, part_id = %part.id(), error = %e, "failed to activate part");
                    }
                }
            }
            ConditionState::Satisfied => {
                metrics::record_condition_satisfied();
                let id = self.id;
                self.condition_observers
                    .notify(|o| o.on_condition_satisfied(id));
            }
            _ => {}
        }
    }
}

impl PartObserver for Condition {
    fn on_part_satisfied(&self, part: PartId) {
        let step = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            if !inner.parts.contains_key(&part) {
                warn!(condition_id = %self.id, part_id = %part, "satisfaction from unknown part");
                return;
            }
            inner.record.satisfied.insert(part);
            let all = inner.record.satisfied.len() == inner.parts.len();
            if !all || !inner.machine.is(ConditionState::Unsatisfied) {
                return;
            }
            match inner.machine.fire(Event::Complete, &mut inner.record) {
                Ok(step) => step,
                Err(e) => {
                    debug!(condition_id = %self.id, error = %e, "completion rejected");
                    return;
                }
            }
        };
        self.dispatch(&step);
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Condition")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("state", &inner.machine.current())
            .field("parts", &inner.parts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::PartSpec;
    use crate::fsm::PartState;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Satisfactions(AtomicU32);

    impl ConditionObserver for Satisfactions {
        fn on_condition_satisfied(&self, _condition: ConditionId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter_condition(references: &[i64]) -> Arc<Condition> {
        let condition = Condition::new(1, "kills", ConditionKind::Counter);
        for (i, reference) in references.iter().enumerate() {
            let id = u32::try_from(i + 1).unwrap();
            condition
                .add_part(ConditionPart::new(PartSpec::counter_at_least(id, "hits", *reference)))
                .unwrap();
        }
        condition
            .initialize_part_strategies(&StrategyFactory::new())
            .unwrap();
        condition
    }

    #[test]
    fn test_activate_arms_parts() {
        let condition = counter_condition(&[1, 2]);
        condition.activate().unwrap();
        assert_eq!(condition.state(), ConditionState::Unsatisfied);
        assert!(condition.parts().iter().all(|p| p.state() == PartState::Unsatisfied));
    }

    #[test]
    fn test_satisfied_only_when_all_parts_satisfied() {
        let condition = counter_condition(&[1, 2]);
        let sat = Arc::new(Satisfactions::default());
        let observer: Arc<dyn ConditionObserver> = sat.clone();
        condition.condition_observers().add_observer(&observer);
        condition.activate().unwrap();

        condition.part(PartId(2)).unwrap().process(2).unwrap();
        assert_eq!(condition.state(), ConditionState::Unsatisfied);
        assert_eq!(condition.satisfied_parts(), [PartId(2)]);

        condition.part(PartId(1)).unwrap().process(1).unwrap();
        assert_eq!(condition.state(), ConditionState::Satisfied);
        assert!(condition.is_clear());
        assert_eq!(sat.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_part_rejected() {
        let condition = counter_condition(&[1]);
        let err = condition
            .add_part(ConditionPart::new(PartSpec::counter_at_least(1, "again", 1)))
            .unwrap_err();
        assert!(matches!(err, PhaseError::Validation(_)));
    }

    #[test]
    fn test_validate() {
        let empty = Condition::new(1, "empty", ConditionKind::Counter);
        assert!(empty.validate().is_err());
        let unspecified = Condition::new(2, "none", ConditionKind::Unspecified);
        assert!(unspecified.validate().is_err());
        assert!(counter_condition(&[3]).validate().is_ok());
    }

    #[test]
    fn test_initialize_with_unspecified_kind_fails() {
        let condition = Condition::new(1, "none", ConditionKind::Unspecified);
        condition
            .add_part(ConditionPart::new(PartSpec::counter_at_least(1, "hits", 1)))
            .unwrap();
        assert!(
            condition
                .initialize_part_strategies(&StrategyFactory::new())
                .is_err()
        );
    }

    #[test]
    fn test_revert_clears_satisfied_set() {
        let condition = counter_condition(&[1]);
        condition.activate().unwrap();
        condition.part(PartId(1)).unwrap().process(1).unwrap();
        assert_eq!(condition.state(), ConditionState::Satisfied);

        condition.revert().unwrap();
        assert_eq!(condition.state(), ConditionState::Unsatisfied);
        assert!(condition.satisfied_parts().is_empty());
        assert!(!condition.is_clear());
    }

    #[test]
    fn test_reset_round_trip() {
        let condition = counter_condition(&[1, 1]);
        condition.activate().unwrap();
        for part in condition.parts() {
            part.process(1).unwrap();
        }
        condition.reset().unwrap();
        assert_eq!(condition.state(), ConditionState::Ready);
        assert!(condition.parts().iter().all(|p| p.state() == PartState::Ready));
        condition.reset().unwrap();

        condition.activate().unwrap();
        for part in condition.parts() {
            part.process(1).unwrap();
        }
        assert_eq!(condition.state(), ConditionState::Satisfied);
    }

    #[test]
    fn test_snapshot_lists_parts_in_order() {
        let condition = counter_condition(&[4, 5, 6]);
        let snap = condition.snapshot();
        let ids: Vec<_> = snap.parts.iter().map(|p| p.id).collect();
        assert_eq!(ids, [PartId(1), PartId(2), PartId(3)]);
        assert_eq!(snap.state, ConditionState::Ready);
    }
}
