//! Phase controller
//!
//! Drives a tree of phases in order. The controller observes every phase,
//! condition and part it owns and re-broadcasts their changes as
//! [`EngineEvent`]s, so a single observer sees the whole tree.
//!
//! Advancement works on the current chain: the root phase that is current,
//! its current child, and so on down to the leaf. When a phase in that
//! chain reaches `next` it is finished and its sibling with the following
//! order is activated. Activating a phase that has children also activates
//! its first child. When a nested sibling list runs out, the parent becomes
//! the leaf again and, if it has `auto_progress`, moves to `next` itself.
//! Running out of root phases finishes the sequence.
//!
//! Part and condition satisfaction reach the controller through forwarders
//! registered ahead of the owning condition or phase, so the re-broadcast
//! feed is in causal order and every event names the phase it came from.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::condition::Condition;
use super::events::{
    ConditionObserver, ControllerObserver, EngineEvent, PartObserver, PhaseChange, PhaseObserver,
};
use super::facade::PhaseFacade;
use super::part::ConditionPart;
use super::phase::{Phase, PhaseSnapshot};
use super::types::{ConditionId, PartId, PhaseId};
use crate::error::PhaseError;
use crate::fsm::{PartState, PhaseState, StateInfo, Subject, lock};
use crate::observability::metrics;

/// Controller behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Advance automatically whenever a current phase reaches `next`.
    pub auto_advance: bool,
}

/// Point-in-time view of the whole tree.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    /// Whether the root sequence has run out.
    pub finished: bool,
    /// Current phases from root to leaf.
    pub current: Vec<PhaseId>,
    /// Every phase in declaration order.
    pub phases: Vec<PhaseSnapshot>,
}

/// Orchestrates a hierarchy of phases.
pub struct PhaseController {
    facade: PhaseFacade,
    options: ControllerOptions,
    finished: AtomicBool,
    observers: Subject<dyn ControllerObserver>,
    pending: Mutex<VecDeque<PhaseId>>,
    draining: AtomicBool,
    relays: Relays,
}

impl PhaseController {
    /// Builds a controller over `phases` and subscribes to the whole tree.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` if the hierarchy is malformed (see
    /// [`PhaseFacade::new`]).
    pub fn new(phases: Vec<Arc<Phase>>, options: ControllerOptions) -> Result<Arc<Self>, PhaseError> {
        let facade = PhaseFacade::new(phases)?;
        let controller = Arc::new_cyclic(|me: &Weak<Self>| {
            let relays = Relays::wire(&facade, me);
            Self {
                facade,
                options,
                finished: AtomicBool::new(false),
                observers: Subject::new(),
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                relays,
            }
        });
        let me: Weak<Self> = Arc::downgrade(&controller);
        let phase_observer: Weak<dyn PhaseObserver> = me;
        for phase in controller.facade.phases() {
            phase.phase_observers().subscribe(phase_observer.clone());
        }
        Ok(controller)
    }

    /// Observers of re-broadcast changes.
    #[must_use]
    pub const fn observers(&self) -> &Subject<dyn ControllerObserver> {
        &self.observers
    }

    /// Options the controller was built with.
    #[must_use]
    pub const fn options(&self) -> ControllerOptions {
        self.options
    }

    /// Phase registry.
    #[must_use]
    pub const fn facade(&self) -> &PhaseFacade {
        &self.facade
    }

    /// Whether the root sequence has run out.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Starts the sequence; equivalent to
    /// [`process_and_activate_by_next_order`](Self::process_and_activate_by_next_order).
    ///
    /// # Errors
    ///
    /// See `process_and_activate_by_next_order`.
    pub fn start(&self) -> Result<(), PhaseError> {
        self.process_and_activate_by_next_order().map(|_| ())
    }

    /// Moves the sequence forward by one step.
    ///
    /// - Nothing current: activates the lowest-order root phase and returns it.
    /// - A current phase is in `next`: finishes it and activates its sibling
    ///   with the following order, returning the sibling, or `None` if the
    ///   siblings ran out.
    /// - Otherwise: returns the current leaf unchanged.
    ///
    /// After the root sequence has finished this returns `None` until
    /// [`reset`](Self::reset).
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::NotFound` if there are no phases, or a transition
    /// error from the phases involved.
    pub fn process_and_activate_by_next_order(&self) -> Result<Option<Arc<Phase>>, PhaseError> {
        if self.is_finished() {
            return Ok(None);
        }
        let chain = self.facade.current_chain();
        if chain.is_empty() {
            let first = self
                .facade
                .first_child(None)
                .ok_or_else(|| PhaseError::NotFound("no phases to activate".to_string()))?;
            self.enter(&first)?;
            return Ok(Some(first));
        }
        if let Some(ready) = chain.iter().find(|p| p.state() == PhaseState::Next) {
            return self.advance(ready);
        }
        Ok(chain.last().cloned())
    }

    /// Forces the current leaf phase to `next`, for phases that are advanced
    /// by hand. Returns the phase that moved.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::NotFound` when nothing is current, or
    /// `PhaseError::InvalidTransition` when the leaf is not `active`.
    pub fn skip(&self) -> Result<Arc<Phase>, PhaseError> {
        let leaf = self
            .facade
            .current_leaf()
            .ok_or_else(|| PhaseError::NotFound("no current phase".to_string()))?;
        leaf.next()?;
        Ok(leaf)
    }

    /// Resets every phase and rewinds the cursor to the first root phase.
    ///
    /// # Errors
    ///
    /// Returns the first phase reset error.
    pub fn reset(&self) -> Result<(), PhaseError> {
        lock(&self.pending).clear();
        for phase in self.facade.phases() {
            phase.reset()?;
            metrics::set_current_phase(phase.name(), false);
        }
        self.facade.reset_current();
        self.finished.store(false, Ordering::SeqCst);
        info!("phase sequence reset");
        Ok(())
    }

    /// Current root phase, or the first root phase when nothing has started.
    #[must_use]
    pub fn current_phase(&self) -> Option<Arc<Phase>> {
        self.facade
            .current(None)
            .or_else(|| self.facade.first_child(None))
    }

    /// Current child of `parent` (`None` for the root level).
    #[must_use]
    pub fn current_phase_for(&self, parent: Option<PhaseId>) -> Option<Arc<Phase>> {
        self.facade.current(parent)
    }

    /// Deepest current phase.
    #[must_use]
    pub fn current_leaf_phase(&self) -> Option<Arc<Phase>> {
        self.facade.current_leaf()
    }

    /// Conditions of the current leaf phase.
    #[must_use]
    pub fn conditions(&self) -> Vec<Arc<Condition>> {
        self.current_leaf_phase()
            .map(|p| p.conditions())
            .unwrap_or_default()
    }

    /// Looks up a part of the current leaf phase.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::NotFound` if there is no current phase, or it has
    /// no such condition or part.
    pub fn condition_part(
        &self,
        condition: ConditionId,
        part: PartId,
    ) -> Result<Arc<ConditionPart>, PhaseError> {
        let phase = self
            .current_leaf_phase()
            .ok_or_else(|| PhaseError::NotFound("no current phase".to_string()))?;
        let found = phase
            .condition(condition)
            .ok_or_else(|| PhaseError::NotFound(format!("{condition} in {}", phase.id())))?;
        found
            .part(part)
            .ok_or_else(|| PhaseError::NotFound(format!("{part} in {condition}")))
    }

    /// Feeds `increment` to a part of the current leaf phase.
    ///
    /// # Errors
    ///
    /// Returns lookup errors from [`condition_part`](Self::condition_part)
    /// and errors from [`ConditionPart::process`].
    pub fn process(
        &self,
        condition: ConditionId,
        part: PartId,
        increment: i64,
    ) -> Result<PartState, PhaseError> {
        self.condition_part(condition, part)?.process(increment)
    }

    /// Describes the state of the current phase.
    #[must_use]
    pub fn state_info(&self) -> Option<StateInfo> {
        self.current_leaf_phase()
            .or_else(|| self.current_phase())
            .map(|p| p.state_info())
    }

    /// Every phase in declaration order.
    #[must_use]
    pub fn phases(&self) -> Vec<Arc<Phase>> {
        self.facade.phases()
    }

    /// Looks up a phase.
    #[must_use]
    pub fn phase(&self, id: PhaseId) -> Option<Arc<Phase>> {
        self.facade.phase(id)
    }

    /// Point-in-time view of the tree.
    #[must_use]
    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            finished: self.is_finished(),
            current: self.facade.current_chain().iter().map(|p| p.id()).collect(),
            phases: self.facade.phases().iter().map(|p| p.snapshot()).collect(),
        }
    }

    fn enter(&self, phase: &Arc<Phase>) -> Result<(), PhaseError> {
        self.facade.set_current(phase);
        phase.activate()?;
        metrics::set_current_phase(phase.name(), true);
        if let Some(child) = self.facade.first_child(Some(phase.id())) {
            self.enter(&child)?;
        }
        Ok(())
    }

    fn advance(&self, phase: &Arc<Phase>) -> Result<Option<Arc<Phase>>, PhaseError> {
        phase.finish()?;
        metrics::set_current_phase(phase.name(), false);
        self.retire_descendants(phase);

        if let Some(sibling) = self.facade.sibling_after(phase) {
            self.enter(&sibling)?;
            return Ok(Some(sibling));
        }

        match phase.parent_id() {
            Some(parent_id) => {
                self.facade.clear_current(Some(parent_id));
                debug!(parent = %parent_id, "child phases exhausted");
                if let Some(parent) = self.facade.phase(parent_id)
                    && parent.spec().auto_progress
                    && parent.state() == PhaseState::Active
                {
                    parent.next()?;
                }
            }
            None => self.finish_sequence(),
        }
        Ok(None)
    }

    fn retire_descendants(&self, phase: &Phase) {
        for descendant in self.facade.descendants(phase.id()) {
            if matches!(descendant.state(), PhaseState::Active | PhaseState::Next) {
                if let Err(e) = descendant.reset() {
                    warn!(phase = %descendant.name(), error = %e, "failed to reset child phase");
                }
                metrics::set_current_phase(descendant.name(), false);
            }
            self.facade.clear_current(Some(descendant.id()));
        }
        self.facade.clear_current(Some(phase.id()));
    }

    fn finish_sequence(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("phase sequence finished");
        metrics::record_sequence_finished();
        self.broadcast(&EngineEvent::SequenceFinished);
    }

    fn broadcast(&self, event: &EngineEvent) {
        self.observers.notify(|o| o.on_entity_changed(event));
    }

    fn schedule(&self, phase: PhaseId) {
        lock(&self.pending).push_back(phase);
        loop {
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            loop {
                let Some(id) = lock(&self.pending).pop_front() else {
                    break;
                };
                let Some(phase) = self.facade.phase(id) else {
                    continue;
                };
                let in_chain = self
                    .facade
                    .current_chain()
                    .iter()
                    .any(|p| p.id() == phase.id());
                if !in_chain || phase.state() != PhaseState::Next {
                    continue;
                }
                if let Err(e) = self.advance(&phase) {
                    warn!(phase = %phase.name(), error = %e, "automatic advance failed");
                }
            }
            self.draining.store(false, Ordering::SeqCst);
            if lock(&self.pending).is_empty() {
                return;
            }
        }
    }
}

impl PhaseObserver for PhaseController {
    fn on_phase_changed(&self, change: &PhaseChange) {
        self.broadcast(&EngineEvent::PhaseChanged(change.clone()));
        if self.options.auto_advance && change.to == PhaseState::Next {
            self.schedule(change.phase_id);
        }
    }
}

/// Forwarders that tag condition and part satisfaction with their owners.
///
/// Condition and part ids are only unique inside their phase, so the
/// controller subscribes one forwarder per owner instead of observing the
/// entities directly.
struct Relays {
    conditions: Vec<Arc<ConditionRelay>>,
    parts: Vec<Arc<PartRelay>>,
}

impl Relays {
    fn wire(facade: &PhaseFacade, controller: &Weak<PhaseController>) -> Self {
        let mut relays = Self {
            conditions: Vec::new(),
            parts: Vec::new(),
        };
        for phase in facade.phases() {
            for condition in phase.conditions() {
                let relay = Arc::new(ConditionRelay {
                    phase_id: phase.id(),
                    controller: controller.clone(),
                });
                let weak: Weak<ConditionRelay> = Arc::downgrade(&relay);
                let observer: Weak<dyn ConditionObserver> = weak;
                condition.condition_observers().subscribe_first(observer);
                relays.conditions.push(relay);

                for part in condition.parts() {
                    let relay = Arc::new(PartRelay {
                        phase_id: phase.id(),
                        condition_id: condition.id(),
                        controller: controller.clone(),
                    });
                    let weak: Weak<PartRelay> = Arc::downgrade(&relay);
                    let observer: Weak<dyn PartObserver> = weak;
                    part.part_observers().subscribe_first(observer);
                    relays.parts.push(relay);
                }
            }
        }
        relays
    }

    fn len(&self) -> usize {
        self.conditions.len() + self.parts.len()
    }
}

struct ConditionRelay {
    phase_id: PhaseId,
    controller: Weak<PhaseController>,
}

impl ConditionObserver for ConditionRelay {
    fn on_condition_satisfied(&self, condition: ConditionId) {
        if let Some(controller) = self.controller.upgrade() {
            controller.broadcast(&EngineEvent::ConditionSatisfied {
                phase_id: self.phase_id,
                condition_id: condition,
            });
        }
    }
}

struct PartRelay {
    phase_id: PhaseId,
    condition_id: ConditionId,
    controller: Weak<PhaseController>,
}

impl PartObserver for PartRelay {
    fn on_part_satisfied(&self, part: PartId) {
        if let Some(controller) = self.controller.upgrade() {
            controller.broadcast(&EngineEvent::PartSatisfied {
                phase_id: self.phase_id,
                condition_id: self.condition_id,
                part_id: part,
            });
        }
    }
}

impl std::fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseController")
            .field("phases", &self.facade.len())
            .field("auto_advance", &self.options.auto_advance)
            .field("relays", &self.relays.len())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
