//! Command-line interface
//!
//! Argument definitions and command handlers for the `phasegate` binary.

pub mod args;
pub mod commands;
