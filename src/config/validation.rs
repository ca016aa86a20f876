//! Scenario validation
//!
//! Runs on the deserialized [`ScenarioConfig`] and collects every issue
//! instead of stopping at the first one. Errors block loading; warnings are
//! handed back to the caller.

use std::collections::{HashMap, HashSet};

use crate::config::loader::ConfigLimits;
use crate::config::schema::{ConditionConfig, PhaseConfig, ScenarioConfig};
use crate::engine::{ComparisonOperator, ConditionKind, ConditionType, PartSpec, PhaseId};
use crate::error::{Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of validating a scenario.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Issues that prevent loading.
    pub errors: Vec<ValidationIssue>,

    /// Informational issues.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Scenario validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `config` and returns every error and warning found.
    pub fn validate(&mut self, config: &ScenarioConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        if let Err(e) = config.engine.time_unit() {
            self.add_error("engine.time_unit", &e.to_string());
        }

        if config.phases.is_empty() {
            self.add_error("phases", "at least one phase is required");
        }
        if config.phases.len() > limits.max_phases {
            self.add_error(
                "phases",
                &format!(
                    "{} phases exceeds the limit of {}",
                    config.phases.len(),
                    limits.max_phases
                ),
            );
        }

        self.validate_hierarchy(&config.phases);
        for (i, phase) in config.phases.iter().enumerate() {
            self.validate_phase(phase, &format!("phases[{i}]"));
        }

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    fn validate_hierarchy(&mut self, phases: &[PhaseConfig]) {
        let mut parents: HashMap<PhaseId, Option<PhaseId>> = HashMap::new();
        for (i, phase) in phases.iter().enumerate() {
            if parents.insert(phase.id, phase.parent).is_some() {
                self.add_error(
                    &format!("phases[{i}].id"),
                    &format!("duplicate phase id {}", phase.id.0),
                );
            }
        }

        for (i, phase) in phases.iter().enumerate() {
            let Some(parent) = phase.parent else {
                continue;
            };
            let path = format!("phases[{i}].parent");
            if parent == phase.id {
                self.add_error(&path, "a phase cannot be its own parent");
            } else if !parents.contains_key(&parent) {
                self.add_error(&path, &format!("unknown parent phase {}", parent.0));
            } else if in_cycle(phase.id, &parents) {
                self.add_error(&path, "parent chain forms a cycle");
            }
        }

        let mut orders: HashSet<(Option<PhaseId>, u32)> = HashSet::new();
        for (i, phase) in phases.iter().enumerate() {
            if !orders.insert((phase.parent, phase.order)) {
                self.add_error(
                    &format!("phases[{i}].order"),
                    &format!("order {} is already used by a sibling", phase.order),
                );
            }
        }
    }

    // ========================================================================
    // Phases, conditions, parts
    // ========================================================================

    fn validate_phase(&mut self, phase: &PhaseConfig, path: &str) {
        if phase.name.trim().is_empty() {
            self.add_error(&format!("{path}.name"), "phase name cannot be empty");
        }

        if phase.conditions.is_empty() {
            self.add_warning(
                &format!("{path}.conditions"),
                "phase has no conditions and can only be advanced by hand",
            );
        }

        if phase.condition_type == ConditionType::Single && phase.conditions.len() != 1 {
            self.add_error(
                &format!("{path}.condition_type"),
                &format!(
                    "single phases need exactly one condition, found {}",
                    phase.conditions.len()
                ),
            );
        }

        if phase.condition_type == ConditionType::Unspecified && !phase.conditions.is_empty() {
            self.add_warning(
                &format!("{path}.condition_type"),
                "conditions are ignored without a condition_type",
            );
        }

        let mut seen = HashSet::new();
        for (j, condition) in phase.conditions.iter().enumerate() {
            let cpath = format!("{path}.conditions[{j}]");
            if !seen.insert(condition.id) {
                self.add_error(
                    &format!("{cpath}.id"),
                    &format!("duplicate condition id {}", condition.id.0),
                );
            }
            self.validate_condition(condition, &cpath);
        }
    }

    fn validate_condition(&mut self, condition: &ConditionConfig, path: &str) {
        if condition.kind == ConditionKind::Unspecified {
            self.add_error(&format!("{path}.kind"), "condition kind is unspecified");
        }
        if condition.parts.is_empty() {
            self.add_error(&format!("{path}.parts"), "condition needs at least one part");
        }

        let mut seen = HashSet::new();
        for (k, part) in condition.parts.iter().enumerate() {
            let ppath = format!("{path}.parts[{k}]");
            if !seen.insert(part.id) {
                self.add_error(
                    &format!("{ppath}.id"),
                    &format!("duplicate part id {}", part.id.0),
                );
            }
            self.validate_part(part, condition.kind, &ppath);
        }
    }

    fn validate_part(&mut self, part: &PartSpec, kind: ConditionKind, path: &str) {
        match part.operator {
            ComparisonOperator::Unspecified => {
                self.add_error(&format!("{path}.operator"), "comparison operator is unspecified");
            }
            ComparisonOperator::Between if part.min >= part.max => {
                self.add_error(
                    path,
                    &format!("between requires min < max (got {}..{})", part.min, part.max),
                );
            }
            ComparisonOperator::In | ComparisonOperator::NotIn => {
                self.add_warning(
                    &format!("{path}.operator"),
                    &format!("operator {} always fails when evaluated", part.operator),
                );
            }
            _ => {}
        }

        if kind == ConditionKind::Time && part.reference <= 0 {
            self.add_error(
                &format!("{path}.reference"),
                &format!("time parts need a positive reference, got {}", part.reference),
            );
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

/// Walks up from `start` and reports whether the walk returns to `start`.
fn in_cycle(start: PhaseId, parents: &HashMap<PhaseId, Option<PhaseId>>) -> bool {
    let mut seen = HashSet::new();
    let mut cursor = parents.get(&start).copied().flatten();
    while let Some(id) = cursor {
        if id == start {
            return true;
        }
        if !seen.insert(id) {
            return false;
        }
        cursor = parents.get(&id).copied().flatten();
    }
    false
}
