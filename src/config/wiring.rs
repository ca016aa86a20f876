//! Builds a live phase graph from a scenario.

use std::sync::Arc;

use crate::config::schema::{PhaseConfig, ScenarioConfig};
use crate::engine::{Condition, ConditionPart, ControllerOptions, Phase, PhaseController, PhaseSpec};
use crate::error::{PhaseError, PhasegateError};
use crate::strategy::StrategyFactory;

/// Builds every phase: parts, then conditions with fresh strategies, then
/// phases.
///
/// # Errors
///
/// Returns the first structural or strategy error.
pub fn build_phases(
    config: &ScenarioConfig,
    factory: &StrategyFactory,
) -> Result<Vec<Arc<Phase>>, PhaseError> {
    config
        .phases
        .iter()
        .map(|phase| build_phase(phase, factory))
        .collect()
}

fn build_phase(config: &PhaseConfig, factory: &StrategyFactory) -> Result<Arc<Phase>, PhaseError> {
    let mut conditions = Vec::with_capacity(config.conditions.len());
    for cond in &config.conditions {
        let condition = Condition::new(cond.id, cond.label.clone(), cond.kind);
        for part in &cond.parts {
            condition.add_part(ConditionPart::new(part.clone()))?;
        }
        condition.validate()?;
        condition.initialize_part_strategies(factory)?;
        conditions.push(condition);
    }

    let mut spec = PhaseSpec::new(config.id, config.name.clone(), config.order, config.condition_type)
        .with_auto_progress(config.auto_progress);
    if let Some(parent) = config.parent {
        spec = spec.with_parent(parent);
    }
    if let Some(description) = &config.description {
        spec = spec.with_description(description.clone());
    }

    let phase = Phase::new(spec, conditions)?;
    phase.validate()?;
    Ok(phase)
}

/// Wires a scenario into a controller that is ready to start.
///
/// # Errors
///
/// Returns `PhasegateError::Config` for a bad time unit and
/// `PhasegateError::Phase` for graph errors.
pub fn build_controller(config: &ScenarioConfig) -> Result<Arc<PhaseController>, PhasegateError> {
    let factory = StrategyFactory::with_time_unit(config.engine.time_unit()?);
    let phases = build_phases(config, &factory)?;
    let options = ControllerOptions {
        auto_advance: config.engine.auto_advance,
    };
    let controller = PhaseController::new(phases, options)?;
    tracing::debug!(
        scenario = %config.display_name(),
        phases = controller.phases().len(),
        auto_advance = options.auto_advance,
        "controller built"
    );
    Ok(controller)
}
