//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler. Handlers
//! return the process exit code on success.

pub mod run;
pub mod validate;
pub mod version;

use crate::cli::args::{Cli, Commands};
use crate::error::{ExitCode, PhasegateError};

/// Dispatches a parsed CLI invocation to its handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli) -> Result<i32, PhasegateError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, cli.quiet).await,
        Commands::Validate(args) => validate::run(&args, cli.quiet),
        Commands::Version(args) => {
            version::run(&args);
            Ok(ExitCode::SUCCESS)
        }
    }
}
