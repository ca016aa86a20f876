//! Error types for `phasegate`
//!
//! Engine errors follow three families: transitions the state table does not
//! allow, structural validation failures, and strategy failures. Scenario
//! loading has its own error type, and the binary maps everything onto
//! process exit codes.

use std::path::PathBuf;
use thiserror::Error;

use crate::fsm::Event;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `phasegate` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Phase engine error (invalid transition, strategy failure)
    pub const PHASE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `phasegate` operations.
///
/// Aggregates the domain errors and maps each onto an exit code.
#[derive(Debug, Error)]
pub enum PhasegateError {
    /// Scenario loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Phase engine error
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),
}

impl PhasegateError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Phase(_) => ExitCode::PHASE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Scenario loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the scenario file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Scenario validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the scenario file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced scenario file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found while checking a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "phases[2].conditions[0].parts")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl ValidationIssue {
    /// Creates an error-level issue.
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Creates a warning-level issue.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Validation failure that prevents the scenario from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Phase Engine Errors
// ============================================================================

/// Errors raised by the phase engine.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The state table has no entry for this event in the current state
    #[error("invalid {entity} transition: event '{event}' not allowed from state '{state}'")]
    InvalidTransition {
        /// Kind of entity that rejected the event ("part", "condition", "phase")
        entity: &'static str,
        /// State the entity was in
        state: &'static str,
        /// Event that was rejected
        event: Event,
    },

    /// Structural validation failed
    #[error("validation failed: {0}")]
    Validation(String),

    /// Strategy creation, initialization or evaluation failed
    #[error("strategy error: {0}")]
    Strategy(String),

    /// Lookup of a phase, condition or part failed
    #[error("not found: {0}")]
    NotFound(String),
}

impl PhaseError {
    /// Returns `true` if this is a rejected state transition.
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `phasegate` operations.
pub type Result<T> = std::result::Result<T, PhasegateError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::PHASE_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn test_phase_error_exit_code() {
        let err: PhasegateError = PhaseError::Validation("no parts".to_string()).into();
        assert_eq!(err.exit_code(), ExitCode::PHASE_ERROR);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: PhasegateError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: PhasegateError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_usage_error_exit_code() {
        let err = PhasegateError::Usage("bad flag".to_string());
        assert_eq!(err.exit_code(), ExitCode::USAGE_ERROR);
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = PhaseError::InvalidTransition {
            entity: "part",
            state: "ready",
            event: Event::Process,
        };
        assert!(err.is_invalid_transition());
        assert_eq!(
            err.to_string(),
            "invalid part transition: event 'process' not allowed from state 'ready'"
        );
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue::warning("phases[0]", "phase has no conditions");
        assert_eq!(
            issue.to_string(),
            "warning: phase has no conditions at phases[0]"
        );
        let issue = ValidationIssue::error("phases[1].order", "duplicate order");
        assert_eq!(issue.severity, Severity::Error);
    }
}
