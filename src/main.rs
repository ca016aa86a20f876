//! `phasegate` - drive condition-gated phase sequences from the command line

use clap::Parser;

use phasegate::cli::args::{Cli, Commands};
use phasegate::cli::commands;
use phasegate::observability::{LogFormat, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        let format = match &cli.command {
            Commands::Run(args) => LogFormat::from(args.log_format),
            _ => LogFormat::Human,
        };
        init_logging(format, cli.verbose, cli.color);
    }

    match commands::dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
