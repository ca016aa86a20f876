//! Scenario loader
//!
//! Pipeline:
//! 1. Size check
//! 2. Read, strip UTF-8 BOM
//! 3. YAML parsing (with line numbers on failure)
//! 4. Validation
//! 5. Freeze with `Arc`

use std::path::Path;
use std::sync::Arc;

use crate::config::schema::ScenarioConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Options for the scenario loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Size limits.
    pub config_limits: ConfigLimits,
}

/// Limits that guard against oversized scenarios.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of phases.
    pub max_phases: usize,

    /// Maximum scenario file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_phases: env_or("PHASEGATE_MAX_PHASES", 1000),
            max_config_size: env_or("PHASEGATE_MAX_CONFIG_SIZE", 10 * 1024 * 1024),
        }
    }
}

/// Result of loading a scenario.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated scenario.
    pub config: Arc<ScenarioConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning produced while loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Where in the scenario the warning applies.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Scenario loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Creates a loader with default limits.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LoaderOptions::default())
    }

    /// Loads, validates and freezes the scenario at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or is too large
    /// - YAML parsing fails
    /// - Validation reports errors
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let limits = &self.options.config_limits;

        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > limits.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", limits.max_config_size),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_str(&raw, path)
    }

    /// Parses and validates scenario text. `origin` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` for empty or malformed YAML and
    /// `ConfigError::ValidationError` when validation reports errors.
    pub fn load_str(&self, raw: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        let content = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        if content.trim().is_empty() {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: "scenario file is empty".to_string(),
            });
        }

        let config: ScenarioConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let result = Validator::new().validate(&config, &self.options.config_limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: result.errors,
            });
        }

        let warnings = result
            .warnings
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

/// Parses an environment variable with a default value.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
