//! Observer interfaces between engine entities.

use serde::Serialize;

use super::types::{ConditionId, PartId, PhaseId};
use crate::fsm::PhaseState;

/// Notified when a part becomes satisfied.
pub trait PartObserver: Send + Sync {
    /// `part` just entered `satisfied`.
    fn on_part_satisfied(&self, part: PartId);
}

/// Notified when a condition becomes satisfied.
pub trait ConditionObserver: Send + Sync {
    /// `condition` just entered `satisfied`.
    fn on_condition_satisfied(&self, condition: ConditionId);
}

/// Notified on every phase transition.
pub trait PhaseObserver: Send + Sync {
    /// A phase changed state.
    fn on_phase_changed(&self, change: &PhaseChange);
}

/// Notified of every change the controller sees.
pub trait ControllerObserver: Send + Sync {
    /// Something in the phase graph changed.
    fn on_entity_changed(&self, event: &EngineEvent);
}

/// A phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    /// Phase that moved.
    pub phase_id: PhaseId,
    /// Phase name.
    pub name: String,
    /// Parent phase, if nested.
    pub parent_id: Option<PhaseId>,
    /// Position among siblings.
    pub order: u32,
    /// State before.
    pub from: PhaseState,
    /// State after.
    pub to: PhaseState,
}

/// Change re-broadcast by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A phase changed state.
    PhaseChanged(PhaseChange),
    /// A condition was satisfied.
    ConditionSatisfied {
        /// Phase owning the condition.
        phase_id: PhaseId,
        /// Condition identifier, unique within the phase.
        condition_id: ConditionId,
    },
    /// A part was satisfied.
    PartSatisfied {
        /// Phase owning the condition.
        phase_id: PhaseId,
        /// Condition owning the part.
        condition_id: ConditionId,
        /// Part identifier, unique within the condition.
        part_id: PartId,
    },
    /// The last root phase finished.
    SequenceFinished,
}
