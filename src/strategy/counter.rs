//! Counter strategy: accumulates increments and compares.

use std::sync::{Arc, Mutex};

use tracing::trace;

use super::{Evaluation, PartStrategy};
use crate::engine::part::ConditionPart;
use crate::engine::types::{ConditionKind, PartSpec};
use crate::error::PhaseError;
use crate::fsm::lock;

#[derive(Debug, Default)]
struct Tally {
    value: i64,
    initialized: bool,
}

/// Accumulating counter.
///
/// The count survives the part becoming satisfied and is cleared only by
/// [`PartStrategy::cleanup`], which the part runs when it is reset.
#[derive(Debug, Default)]
pub struct CounterStrategy {
    tally: Mutex<Tally>,
}

impl CounterStrategy {
    /// Uninitialized counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartStrategy for CounterStrategy {
    fn kind(&self) -> ConditionKind {
        ConditionKind::Counter
    }

    fn initialize(&self, _part: &Arc<ConditionPart>) -> Result<(), PhaseError> {
        let mut tally = lock(&self.tally);
        tally.value = 0;
        tally.initialized = true;
        Ok(())
    }

    fn start(&self) -> Result<(), PhaseError> {
        Ok(())
    }

    fn evaluate(&self, spec: &PartSpec, increment: i64) -> Result<Evaluation, PhaseError> {
        let mut tally = lock(&self.tally);
        if !tally.initialized {
            return Err(PhaseError::Strategy(format!(
                "counter strategy for {} is not initialized",
                spec.id
            )));
        }
        // Reject before mutating so a bad operator leaves the count alone.
        let value = tally.value.saturating_add(increment);
        let held = spec.matches(value)?;
        tally.value = value;
        trace!(part_id = %spec.id, value, held, "counter evaluated");
        Ok(if held {
            Evaluation::Satisfied
        } else {
            Evaluation::Pending
        })
    }

    fn current_value(&self) -> i64 {
        lock(&self.tally).value
    }

    fn stop(&self) {}

    fn cleanup(&self) {
        let mut tally = lock(&self.tally);
        tally.value = 0;
        tally.initialized = false;
    }
}
