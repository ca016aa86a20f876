//! Scenario configuration
//!
//! A scenario file declares the static phase graph: phases, their nesting
//! and order, and the conditions and parts that gate each phase.
//!
//! Loading runs read → parse → validate → freeze; [`wiring`] turns the
//! frozen config into a live [`PhaseController`](crate::engine::PhaseController).

pub mod loader;
pub mod schema;
pub mod validation;
pub mod wiring;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::{ConditionConfig, EngineConfig, PhaseConfig, ScenarioConfig};
pub use validation::{ValidationResult, Validator};
pub use wiring::{build_controller, build_phases};
