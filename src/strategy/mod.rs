//! Evaluation strategies for condition parts
//!
//! A strategy decides when a part is satisfied. Counter strategies accumulate
//! increments and compare them against the part's reference; time strategies
//! arm an [`IntervalTimer`](crate::fsm::IntervalTimer) and let the tick drive
//! the part. Each part owns exactly one strategy instance, created by a
//! [`StrategyFactory`] from its condition's [`ConditionKind`].

pub mod counter;
pub mod time;

use std::sync::Arc;
use std::time::Duration;

use crate::engine::part::ConditionPart;
use crate::engine::types::{ConditionKind, PartSpec};
use crate::error::PhaseError;

pub use counter::CounterStrategy;
pub use time::TimeStrategy;

/// Outcome of evaluating a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The part has reached its goal.
    Satisfied,
    /// The part is still waiting.
    Pending,
}

/// Per-part evaluation behavior.
///
/// Implementations are called while the owning part holds its lock, so they
/// must not call back into the part synchronously.
pub trait PartStrategy: Send + Sync + std::fmt::Debug {
    /// Kind this strategy implements.
    fn kind(&self) -> ConditionKind;

    /// Binds the strategy to its part and prepares internal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the part's definition is unusable for this kind.
    fn initialize(&self, part: &Arc<ConditionPart>) -> Result<(), PhaseError>;

    /// Begins evaluation when the part is armed.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation cannot be started.
    fn start(&self) -> Result<(), PhaseError>;

    /// Applies an input to the strategy and reports whether the part is done.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy is not initialized or the operator is
    /// not supported.
    fn evaluate(&self, spec: &PartSpec, increment: i64) -> Result<Evaluation, PhaseError>;

    /// Current progress value (accumulated count, or elapsed units).
    fn current_value(&self) -> i64;

    /// Stops any background activity. Idempotent.
    fn stop(&self);

    /// Releases state so the strategy must be initialized again.
    fn cleanup(&self);
}

/// Creates strategies by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyFactory {
    time_unit: Duration,
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self {
            time_unit: Duration::from_secs(1),
        }
    }
}

impl StrategyFactory {
    /// Factory with a one-second time unit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose time strategies count in `unit` instead of seconds.
    #[must_use]
    pub const fn with_time_unit(unit: Duration) -> Self {
        Self { time_unit: unit }
    }

    /// Unit a time reference of `1` stands for.
    #[must_use]
    pub const fn time_unit(&self) -> Duration {
        self.time_unit
    }

    /// Creates a fresh strategy for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Strategy` for `ConditionKind::Unspecified`.
    pub fn create(&self, kind: ConditionKind) -> Result<Box<dyn PartStrategy>, PhaseError> {
        match kind {
            ConditionKind::Counter => Ok(Box::new(CounterStrategy::new())),
            ConditionKind::Time => Ok(Box::new(TimeStrategy::new(self.time_unit))),
            ConditionKind::Unspecified => Err(PhaseError::Strategy(format!(
                "unknown condition kind: {kind}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_creates_by_kind() {
        let factory = StrategyFactory::new();
        assert_eq!(factory.time_unit(), Duration::from_secs(1));
        assert_eq!(
            factory.create(ConditionKind::Counter).unwrap().kind(),
            ConditionKind::Counter
        );
        assert_eq!(
            factory.create(ConditionKind::Time).unwrap().kind(),
            ConditionKind::Time
        );
    }

    #[test]
    fn test_factory_rejects_unspecified() {
        let err = StrategyFactory::new()
            .create(ConditionKind::Unspecified)
            .unwrap_err();
        assert!(matches!(err, PhaseError::Strategy(_)));
    }

    #[test]
    fn test_factory_time_unit() {
        let factory = StrategyFactory::with_time_unit(Duration::from_millis(10));
        assert_eq!(factory.time_unit(), Duration::from_millis(10));
    }
}
