//! Phase engine
//!
//! Three entity layers, each driven by its own [`StateMachine`](crate::fsm::StateMachine):
//!
//! - [`ConditionPart`]: one measurable requirement, evaluated by a strategy.
//! - [`Condition`]: satisfied once all of its parts are.
//! - [`Phase`]: combines its conditions with an AND / OR / SINGLE rule.
//!
//! [`PhaseController`] sequences phases by order and nesting. Satisfaction
//! travels upward through observer callbacks on the caller's thread (or the
//! timer task for time parts); each entity locks only its own state and
//! releases it before notifying.

pub mod condition;
pub mod controller;
pub mod events;
pub mod facade;
pub mod part;
pub mod phase;
pub mod types;

pub use condition::{Condition, ConditionSnapshot};
pub use controller::{ControllerOptions, ControllerSnapshot, PhaseController};
pub use events::{
    ConditionObserver, ControllerObserver, EngineEvent, PartObserver, PhaseChange, PhaseObserver,
};
pub use facade::PhaseFacade;
pub use part::{ConditionPart, PartSnapshot};
pub use phase::{Phase, PhaseSnapshot, PhaseSpec};
pub use types::{
    ComparisonOperator, ConditionId, ConditionKind, ConditionType, PartId, PartSpec, PhaseId,
};
