//! Identifiers and value types shared by the engine entities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PhaseError;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(id: u32) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identifier of a phase, unique across a scenario.
    PhaseId,
    "phase"
);
id_type!(
    /// Identifier of a condition, unique within its phase.
    ConditionId,
    "condition"
);
id_type!(
    /// Identifier of a condition part, unique within its condition.
    PartId,
    "part"
);

/// Kind of evaluation strategy a condition uses for its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Not set; rejected by validation and by the strategy factory.
    #[default]
    Unspecified,
    /// Satisfied after a configured number of time units.
    Time,
    /// Satisfied when an accumulated counter meets a comparison.
    Counter,
}

impl ConditionKind {
    /// Stable lowercase token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Time => "time",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a phase combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// Never satisfied automatically; the phase is advanced by hand.
    #[default]
    #[serde(alias = "manual")]
    Unspecified,
    /// Every condition must be satisfied.
    And,
    /// Any condition is enough.
    Or,
    /// The phase's only condition must be satisfied.
    Single,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unspecified => "unspecified",
            Self::And => "and",
            Self::Or => "or",
            Self::Single => "single",
        })
    }
}

/// Comparison a counter part applies to its accumulated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    /// Not set; rejected by validation.
    #[default]
    Unspecified,
    /// `value == reference`
    Eq,
    /// `value != reference`
    Neq,
    /// `value > reference`
    Gt,
    /// `value >= reference`
    Gte,
    /// `value < reference`
    Lt,
    /// `value <= reference`
    Lte,
    /// `min <= value <= max`
    Between,
    /// Declared but not evaluable by any strategy.
    In,
    /// Declared but not evaluable by any strategy.
    NotIn,
}

impl ComparisonOperator {
    /// Applies the operator.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Strategy` for operators that cannot be
    /// evaluated against a single integer (`Unspecified`, `In`, `NotIn`).
    pub fn holds(self, value: i64, reference: i64, min: i64, max: i64) -> Result<bool, PhaseError> {
        Ok(match self {
            Self::Eq => value == reference,
            Self::Neq => value != reference,
            Self::Gt => value > reference,
            Self::Gte => value >= reference,
            Self::Lt => value < reference,
            Self::Lte => value <= reference,
            Self::Between => (min..=max).contains(&value),
            Self::Unspecified | Self::In | Self::NotIn => {
                return Err(PhaseError::Strategy(format!(
                    "unsupported comparison operator: {self}"
                )));
            }
        })
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unspecified => "unspecified",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
        })
    }
}

/// Static definition of a condition part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSpec {
    /// Part identifier.
    pub id: PartId,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Comparison to apply.
    #[serde(default)]
    pub operator: ComparisonOperator,
    /// Integer reference (count for counters, units for timers).
    #[serde(default)]
    pub reference: i64,
    /// Optional floating-point reference, carried for callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_float: Option<f64>,
    /// Optional string reference, carried for callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_string: Option<String>,
    /// Inclusive lower bound for `between`.
    #[serde(default)]
    pub min: i64,
    /// Inclusive upper bound for `between`.
    #[serde(default)]
    pub max: i64,
}

impl PartSpec {
    /// A part satisfied once its counter reaches `reference`.
    #[must_use]
    pub fn counter_at_least(id: impl Into<PartId>, label: impl Into<String>, reference: i64) -> Self {
        Self::compare(id, label, ComparisonOperator::Gte, reference)
    }

    /// A part satisfied after `units` time units.
    #[must_use]
    pub fn elapsed(id: impl Into<PartId>, label: impl Into<String>, units: i64) -> Self {
        Self::compare(id, label, ComparisonOperator::Gte, units)
    }

    /// A part with an arbitrary operator.
    #[must_use]
    pub fn compare(
        id: impl Into<PartId>,
        label: impl Into<String>,
        operator: ComparisonOperator,
        reference: i64,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            operator,
            reference,
            reference_float: None,
            reference_string: None,
            min: 0,
            max: 0,
        }
    }

    /// A `between` part with inclusive bounds.
    #[must_use]
    pub fn between(id: impl Into<PartId>, label: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            ..Self::compare(id, label, ComparisonOperator::Between, 0)
        }
    }

    /// Checks the structural rules for a part.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` when the operator is unspecified or a
    /// `between` range is empty.
    pub fn validate(&self) -> Result<(), PhaseError> {
        if self.operator == ComparisonOperator::Unspecified {
            return Err(PhaseError::Validation(format!(
                "{}: comparison operator is unspecified",
                self.id
            )));
        }
        if self.operator == ComparisonOperator::Between && self.min >= self.max {
            return Err(PhaseError::Validation(format!(
                "{}: between requires min < max (got {}..{})",
                self.id, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Applies this part's comparison to `value`.
    ///
    /// # Errors
    ///
    /// See [`ComparisonOperator::holds`].
    pub fn matches(&self, value: i64) -> Result<bool, PhaseError> {
        self.operator.holds(value, self.reference, self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_between_is_inclusive() {
        let op = ComparisonOperator::Between;
        assert!(op.holds(1, 0, 1, 3).unwrap());
        assert!(op.holds(3, 0, 1, 3).unwrap());
        assert!(!op.holds(4, 0, 1, 3).unwrap());
        assert!(!op.holds(0, 0, 1, 3).unwrap());
    }

    #[test]
    fn test_unsupported_operators() {
        for op in [
            ComparisonOperator::In,
            ComparisonOperator::NotIn,
            ComparisonOperator::Unspecified,
        ] {
            let err = op.holds(1, 1, 0, 0).unwrap_err();
            assert!(err.to_string().contains("unsupported comparison operator"));
        }
    }

    #[test]
    fn test_part_validation() {
        assert!(PartSpec::counter_at_least(1, "hits", 5).validate().is_ok());
        assert!(PartSpec::between(1, "window", 2, 5).validate().is_ok());
        assert!(PartSpec::between(1, "window", 5, 5).validate().is_err());
        assert!(
            PartSpec::compare(1, "none", ComparisonOperator::Unspecified, 1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_id_display() {
        assert_eq!(PhaseId(3).to_string(), "phase#3");
        assert_eq!(PartId::from(7).to_string(), "part#7");
    }

    #[test]
    fn test_serde_tokens() {
        let op: ComparisonOperator = serde_yaml::from_str("not_in").unwrap();
        assert_eq!(op, ComparisonOperator::NotIn);
        let ty: ConditionType = serde_yaml::from_str("manual").unwrap();
        assert_eq!(ty, ConditionType::Unspecified);
        let kind: ConditionKind = serde_yaml::from_str("counter").unwrap();
        assert_eq!(kind.to_string(), "counter");
    }

    proptest! {
        #[test]
        fn prop_operators_agree_with_rust(value in -1000i64..1000, reference in -1000i64..1000) {
            use ComparisonOperator as Op;
            prop_assert_eq!(Op::Eq.holds(value, reference, 0, 0).unwrap(), value == reference);
            prop_assert_eq!(Op::Neq.holds(value, reference, 0, 0).unwrap(), value != reference);
            prop_assert_eq!(Op::Gt.holds(value, reference, 0, 0).unwrap(), value > reference);
            prop_assert_eq!(Op::Gte.holds(value, reference, 0, 0).unwrap(), value >= reference);
            prop_assert_eq!(Op::Lt.holds(value, reference, 0, 0).unwrap(), value < reference);
            prop_assert_eq!(Op::Lte.holds(value, reference, 0, 0).unwrap(), value <= reference);
        }

        #[test]
        fn prop_between_matches_range(value in -100i64..100, min in -50i64..0, span in 1i64..50) {
            let max = min + span;
            let held = ComparisonOperator::Between.holds(value, 0, min, max).unwrap();
            prop_assert_eq!(held, value >= min && value <= max);
        }
    }
}
