//! `phasegate` - hierarchical, condition-driven phase engine
//!
//! Phases advance in order once their conditions are satisfied. Each
//! condition is a set of parts measured by a strategy (a counter or an
//! elapsed-time timer), and phases nest so that a parent can wait for its
//! children.
//!
//! ```no_run
//! use phasegate::config::{ConfigLoader, build_controller};
//! # fn main() -> Result<(), phasegate::error::PhasegateError> {
//! let loaded = ConfigLoader::with_defaults().load(std::path::Path::new("scenario.yaml"))?;
//! let controller = build_controller(&loaded.config)?;
//! controller.start()?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod observability;
pub mod strategy;
