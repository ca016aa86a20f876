//! Scenario schema types
//!
//! Deserialized from YAML. Ids are plain integers in the file and become
//! typed ids here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::{ConditionId, ConditionKind, ConditionType, PartSpec, PhaseId};
use crate::error::ConfigError;

/// Time unit used when `engine.time_unit` is omitted.
pub const DEFAULT_TIME_UNIT: &str = "1s";

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root of a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Scenario name, used in events and `status` output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Engine-wide settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Every phase in the graph, in any order.
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

impl ScenarioConfig {
    /// Scenario name, or `"unnamed"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Engine-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// What a time reference of `1` means, as a humantime string
    /// (`"1s"`, `"250ms"`, `"1m"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<String>,

    /// Advance as soon as a current phase reaches `next`.
    #[serde(default)]
    pub auto_advance: bool,
}

impl EngineConfig {
    /// Parses `time_unit`, falling back to one second.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the string is not a humantime
    /// duration or is zero.
    pub fn time_unit(&self) -> Result<Duration, ConfigError> {
        let raw = self.time_unit.as_deref().unwrap_or(DEFAULT_TIME_UNIT);
        let unit = humantime::parse_duration(raw).map_err(|e| ConfigError::InvalidValue {
            field: "engine.time_unit".to_string(),
            value: raw.to_string(),
            expected: format!("a duration like \"1s\" or \"250ms\" ({e})"),
        })?;
        if unit.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "engine.time_unit".to_string(),
                value: raw.to_string(),
                expected: "a non-zero duration".to_string(),
            });
        }
        Ok(unit)
    }
}

// ============================================================================
// Phases
// ============================================================================

/// One phase of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Unique phase id.
    pub id: PhaseId,

    /// Display name.
    pub name: String,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Position among siblings; siblings advance in ascending order.
    pub order: u32,

    /// Parent phase id; omitted for root phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PhaseId>,

    /// How the conditions combine.
    #[serde(default)]
    pub condition_type: ConditionType,

    /// Move to `next` when the last child phase finishes.
    #[serde(default)]
    pub auto_progress: bool,

    /// Conditions gating this phase.
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

/// A condition and its parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionConfig {
    /// Condition id, unique within its phase.
    pub id: ConditionId,

    /// Display label.
    #[serde(default)]
    pub label: String,

    /// Strategy kind for every part.
    pub kind: ConditionKind,

    /// Parts; all must be satisfied.
    #[serde(default)]
    pub parts: Vec<PartSpec>,
}
