//! Table-driven state machines
//!
//! Every engine entity (part, condition, phase) owns a [`StateMachine`] over
//! its own state enum. The allowed transitions live in a static table on the
//! state type; the machine looks up `(current, event)`, runs the exit and
//! enter hooks, and returns the [`Step`] it took so the owner can perform
//! outward effects after releasing its lock.

pub mod subject;
pub mod timer;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::PhaseError;

pub use subject::{StateObserver, Subject, TickObserver};
pub use timer::IntervalTimer;

// ============================================================================
// Events
// ============================================================================

/// Events accepted by the engine state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Arm an entity so it starts evaluating.
    Activate,
    /// A part received input.
    Process,
    /// A part or condition reached its goal.
    Complete,
    /// A time-driven part elapsed.
    Timeout,
    /// Undo completion and go back to evaluating.
    Revert,
    /// Return to the initial state.
    Reset,
    /// A phase is satisfied and waiting to hand over.
    Next,
    /// A phase has handed over to its successor.
    Finish,
}

impl Event {
    /// Stable lowercase token for the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Process => "process",
            Self::Complete => "complete",
            Self::Timeout => "timeout",
            Self::Revert => "revert",
            Self::Reset => "reset",
            Self::Next => "next",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transition table plumbing
// ============================================================================

/// One row of a transition table.
#[derive(Debug, Clone, Copy)]
pub struct Transition<S: 'static> {
    /// Triggering event.
    pub event: Event,
    /// States the event is accepted from.
    pub from: &'static [S],
    /// Destination state.
    pub to: S,
}

/// A state enum with a static transition table.
pub trait MachineState: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Entity name used in error messages.
    const ENTITY: &'static str;
    /// State a fresh machine starts in.
    const INITIAL: Self;
    /// Allowed transitions.
    const TRANSITIONS: &'static [Transition<Self>];

    /// Stable lowercase token for the state.
    fn as_str(self) -> &'static str;
}

/// A transition the machine performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step<S> {
    /// State before the transition.
    pub from: S,
    /// State after the transition.
    pub to: S,
    /// Event that caused it.
    pub event: Event,
}

/// Bookkeeping callbacks run while the owner's lock is held.
///
/// Hooks must not call back into the owning entity or notify observers;
/// those effects belong after the lock is released.
pub trait TransitionHooks<S> {
    /// Called before leaving `state`.
    fn on_exit(&mut self, _state: S, _step: &Step<S>) {}
    /// Called after entering `state`.
    fn on_enter(&mut self, _state: S, _step: &Step<S>) {}
    /// Called once the transition is complete.
    fn after_transition(&mut self, _step: &Step<S>) {}
}

impl<S> TransitionHooks<S> for () {}

/// Generic table-driven state machine.
#[derive(Debug, Clone)]
pub struct StateMachine<S: MachineState> {
    current: S,
}

impl<S: MachineState> Default for StateMachine<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MachineState> StateMachine<S> {
    /// Creates a machine in the type's initial state.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: S::INITIAL }
    }

    /// Current state.
    #[must_use]
    pub const fn current(&self) -> S {
        self.current
    }

    /// Returns `true` if the machine is in `state`.
    #[must_use]
    pub fn is(&self, state: S) -> bool {
        self.current == state
    }

    /// Destination of `event` from the current state, if allowed.
    #[must_use]
    pub fn target(&self, event: Event) -> Option<S> {
        S::TRANSITIONS
            .iter()
            .find(|t| t.event == event && t.from.contains(&self.current))
            .map(|t| t.to)
    }

    /// Returns `true` if `event` is allowed from the current state.
    #[must_use]
    pub fn can(&self, event: Event) -> bool {
        self.target(event).is_some()
    }

    /// Events allowed from the current state, in table order.
    #[must_use]
    pub fn available_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for t in S::TRANSITIONS {
            if t.from.contains(&self.current) && !events.contains(&t.event) {
                events.push(t.event);
            }
        }
        events
    }

    /// Fires `event`, running `hooks` around the state change.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::InvalidTransition` if the table has no entry for
    /// the current state and event. The state is left unchanged.
    pub fn fire<H: TransitionHooks<S>>(
        &mut self,
        event: Event,
        hooks: &mut H,
    ) -> Result<Step<S>, PhaseError> {
        let to = self.target(event).ok_or(PhaseError::InvalidTransition {
            entity: S::ENTITY,
            state: self.current.as_str(),
            event,
        })?;
        let step = Step {
            from: self.current,
            to,
            event,
        };
        hooks.on_exit(step.from, &step);
        self.current = to;
        hooks.on_enter(step.to, &step);
        hooks.after_transition(&step);
        Ok(step)
    }

    /// Forces the machine back to the initial state without hooks.
    pub const fn rewind(&mut self) {
        self.current = S::INITIAL;
    }
}

// ============================================================================
// Entity states
// ============================================================================

/// Lifecycle of a condition part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    /// Not armed.
    Ready,
    /// Armed and waiting for input or time.
    Unsatisfied,
    /// Has received input but has not reached its goal.
    Processing,
    /// Goal reached.
    Satisfied,
}

impl MachineState for PartState {
    const ENTITY: &'static str = "part";
    const INITIAL: Self = Self::Ready;
    const TRANSITIONS: &'static [Transition<Self>] = &[
        Transition {
            event: Event::Activate,
            from: &[Self::Ready],
            to: Self::Unsatisfied,
        },
        Transition {
            event: Event::Process,
            from: &[Self::Unsatisfied],
            to: Self::Processing,
        },
        Transition {
            event: Event::Complete,
            from: &[Self::Processing],
            to: Self::Satisfied,
        },
        Transition {
            event: Event::Timeout,
            from: &[Self::Processing, Self::Unsatisfied],
            to: Self::Satisfied,
        },
        Transition {
            event: Event::Revert,
            from: &[Self::Processing],
            to: Self::Unsatisfied,
        },
        Transition {
            event: Event::Reset,
            from: &[Self::Unsatisfied, Self::Processing, Self::Satisfied],
            to: Self::Ready,
        },
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Unsatisfied => "unsatisfied",
            Self::Processing => "processing",
            Self::Satisfied => "satisfied",
        }
    }
}

/// Lifecycle of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionState {
    /// Not armed.
    Ready,
    /// Parts armed, waiting for all of them.
    Unsatisfied,
    /// Every part satisfied.
    Satisfied,
}

impl MachineState for ConditionState {
    const ENTITY: &'static str = "condition";
    const INITIAL: Self = Self::Ready;
    const TRANSITIONS: &'static [Transition<Self>] = &[
        Transition {
            event: Event::Activate,
            from: &[Self::Ready],
            to: Self::Unsatisfied,
        },
        Transition {
            event: Event::Complete,
            from: &[Self::Unsatisfied],
            to: Self::Satisfied,
        },
        Transition {
            event: Event::Revert,
            from: &[Self::Ready, Self::Satisfied],
            to: Self::Unsatisfied,
        },
        Transition {
            event: Event::Reset,
            from: &[Self::Unsatisfied, Self::Satisfied],
            to: Self::Ready,
        },
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Unsatisfied => "unsatisfied",
            Self::Satisfied => "satisfied",
        }
    }
}

/// Lifecycle of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    /// Not started.
    Ready,
    /// Running; conditions are armed.
    Active,
    /// Satisfied and waiting for the controller to hand over.
    Next,
    /// Done.
    Finish,
}

impl MachineState for PhaseState {
    const ENTITY: &'static str = "phase";
    const INITIAL: Self = Self::Ready;
    const TRANSITIONS: &'static [Transition<Self>] = &[
        Transition {
            event: Event::Activate,
            from: &[Self::Ready, Self::Next],
            to: Self::Active,
        },
        Transition {
            event: Event::Next,
            from: &[Self::Active],
            to: Self::Next,
        },
        Transition {
            event: Event::Finish,
            from: &[Self::Next],
            to: Self::Finish,
        },
        Transition {
            event: Event::Reset,
            from: &[Self::Active, Self::Next, Self::Finish],
            to: Self::Ready,
        },
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Next => "next",
            Self::Finish => "finish",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })+
    };
}

display_as_str!(PartState, ConditionState, PhaseState);

// ============================================================================
// State info
// ============================================================================

/// Human-facing description of a phase state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateInfo {
    /// State token.
    pub name: &'static str,
    /// What the state means.
    pub description: &'static str,
    /// Events a caller may send next.
    pub allowed_next: &'static [&'static str],
    /// Prompt to show an operator.
    pub message: &'static str,
}

impl StateInfo {
    /// Describes `state`.
    #[must_use]
    pub const fn for_phase(state: PhaseState) -> Self {
        match state {
            PhaseState::Ready => Self {
                name: "ready",
                description: "Phase is waiting to start",
                allowed_next: &["activate"],
                message: "Start the phase to arm its conditions.",
            },
            PhaseState::Active => Self {
                name: "active",
                description: "Phase is running and evaluating its conditions",
                allowed_next: &["next"],
                message: "Complete the conditions to move on.",
            },
            PhaseState::Next => Self {
                name: "next",
                description: "Phase conditions are satisfied",
                allowed_next: &["activate", "finish"],
                message: "Advance to the next phase or run this one again.",
            },
            PhaseState::Finish => Self {
                name: "finish",
                description: "Phase is complete",
                allowed_next: &["reset"],
                message: "Reset to play the sequence again.",
            },
        }
    }
}

// ============================================================================
// Lock helpers
// ============================================================================

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-locks an `RwLock`, recovering from poisoning.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-locks an `RwLock`, recovering from poisoning.
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
