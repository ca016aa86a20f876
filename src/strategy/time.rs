//! Time strategy: satisfies a part once `reference` time units elapse.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::debug;

use super::{Evaluation, PartStrategy};
use crate::engine::part::ConditionPart;
use crate::engine::types::{ConditionKind, PartSpec};
use crate::error::PhaseError;
use crate::fsm::subject::TickObserver;
use crate::fsm::{IntervalTimer, lock};

/// Timer-backed strategy.
///
/// The first tick times the part out; the part stops the timer as it becomes
/// satisfied, so the strategy fires once per activation.
#[derive(Debug)]
pub struct TimeStrategy {
    unit: Duration,
    timer: Mutex<Option<Armed>>,
}

/// A timer plus the tick observer bound to one part generation.
#[derive(Debug)]
struct Armed {
    timer: IntervalTimer,
    _ticker: Arc<PartTicker>,
}

/// Expires its part, but only for the generation it was created for.
#[derive(Debug)]
struct PartTicker {
    part: Weak<ConditionPart>,
    generation: u64,
}

impl TickObserver for PartTicker {
    fn on_tick(&self) {
        let Some(part) = self.part.upgrade() else {
            return;
        };
        match part.expire(self.generation) {
            Ok(true) => {}
            Ok(false) => debug!(part_id = %part.id(), "stale tick dropped"),
            Err(e) => debug!(part_id = %part.id(), error = %e, "tick ignored"),
        }
    }
}

impl TimeStrategy {
    /// Strategy whose reference counts in `unit`.
    #[must_use]
    pub const fn new(unit: Duration) -> Self {
        Self {
            unit,
            timer: Mutex::new(None),
        }
    }

    fn interval_for(&self, spec: &PartSpec) -> Result<Duration, PhaseError> {
        if spec.reference <= 0 {
            return Err(PhaseError::Validation(format!(
                "{}: time reference must be greater than zero (got {})",
                spec.id, spec.reference
            )));
        }
        u32::try_from(spec.reference)
            .ok()
            .and_then(|units| self.unit.checked_mul(units))
            .ok_or_else(|| {
                PhaseError::Validation(format!(
                    "{}: time reference {} is too large",
                    spec.id, spec.reference
                ))
            })
    }
}

impl PartStrategy for TimeStrategy {
    fn kind(&self) -> ConditionKind {
        ConditionKind::Time
    }

    fn initialize(&self, part: &Arc<ConditionPart>) -> Result<(), PhaseError> {
        let interval = self.interval_for(part.spec())?;
        let timer = IntervalTimer::new(interval)?;
        let ticker = Arc::new(PartTicker {
            part: Arc::downgrade(part),
            generation: part.generation(),
        });
        let weak: Weak<PartTicker> = Arc::downgrade(&ticker);
        let observer: Weak<dyn TickObserver> = weak;
        timer.subscribe(observer);
        let armed = Armed {
            timer,
            _ticker: ticker,
        };
        if let Some(old) = lock(&self.timer).replace(armed) {
            old.timer.stop();
        }
        debug!(part_id = %part.id(), ?interval, "time strategy initialized");
        Ok(())
    }

    fn start(&self) -> Result<(), PhaseError> {
        let armed = lock(&self.timer);
        let armed = armed.as_ref().ok_or_else(|| {
            PhaseError::Strategy("time strategy is not initialized".to_string())
        })?;
        armed.timer.start()
    }

    fn evaluate(&self, _spec: &PartSpec, _increment: i64) -> Result<Evaluation, PhaseError> {
        self.start()?;
        Ok(Evaluation::Pending)
    }

    fn current_value(&self) -> i64 {
        let elapsed = lock(&self.timer)
            .as_ref()
            .and_then(|armed| armed.timer.elapsed())
            .unwrap_or_default();
        let units = elapsed.as_nanos() / self.unit.as_nanos().max(1);
        i64::try_from(units).unwrap_or(i64::MAX)
    }

    fn stop(&self) {
        if let Some(armed) = lock(&self.timer).as_ref() {
            armed.timer.stop();
        }
    }

    fn cleanup(&self) {
        if let Some(armed) = lock(&self.timer).take() {
            armed.timer.stop();
        }
    }
}
