//! CLI argument definitions
//!
//! All Clap derive structs for `phasegate` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Drive hierarchical, condition-gated phase sequences.
#[derive(Parser, Debug)]
#[command(name = "phasegate", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "PHASEGATE_COLOR")]
    pub color: ColorChoice,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scenario, reading commands from stdin.
    Run(RunArgs),

    /// Validate scenario files without running them.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the YAML scenario file.
    #[arg(short, long, env = "PHASEGATE_CONFIG")]
    pub config: PathBuf,

    /// Advance as soon as a phase reaches `next`, overriding the scenario.
    #[arg(long)]
    pub auto_advance: bool,

    /// Where to write the JSONL event stream: `stdout`, `stderr` or a file
    /// path. Events are off when omitted.
    #[arg(long, env = "PHASEGATE_EVENTS")]
    pub events: Option<String>,

    /// Serve Prometheus metrics on 127.0.0.1:<port>.
    #[arg(long, env = "PHASEGATE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log output format.
    #[arg(long, default_value = "human", env = "PHASEGATE_LOG_FORMAT")]
    pub log_format: LogFormatArg,

    /// Exit as soon as the root sequence finishes.
    #[arg(long)]
    pub exit_on_finish: bool,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Log format flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines.
    #[default]
    Human,
    /// JSON lines.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Human => Self::Human,
            LogFormatArg::Json => Self::Json,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_config() {
        let cli = Cli::try_parse_from(["phasegate", "run", "--config", "scenario.yaml"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("scenario.yaml"));
        assert!(!args.auto_advance);
        assert_eq!(args.log_format, LogFormatArg::Human);
        assert!(args.events.is_none());
    }

    #[test]
    fn test_run_requires_config() {
        let result = Cli::try_parse_from(["phasegate", "run"]);
        if std::env::var_os("PHASEGATE_CONFIG").is_none() {
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "phasegate",
            "-vv",
            "run",
            "-c",
            "s.yaml",
            "--auto-advance",
            "--events",
            "stderr",
            "--metrics-port",
            "9100",
            "--log-format",
            "json",
            "--exit-on-finish",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.auto_advance && args.exit_on_finish);
        assert_eq!(args.events.as_deref(), Some("stderr"));
        assert_eq!(args.metrics_port, Some(9100));
        assert_eq!(LogFormat::from(args.log_format), LogFormat::Json);
    }

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["phasegate", "validate"]).is_err());
        let cli = Cli::try_parse_from(["phasegate", "validate", "a.yaml", "b.yaml", "-f", "json"])
            .unwrap();
        let Commands::Validate(args) = cli.command else {
            panic!("expected validate");
        };
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_help_and_version() {
        let err = Cli::try_parse_from(["phasegate", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        let err = Cli::try_parse_from(["phasegate", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["phasegate", "version", "-q", "--color", "never"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.color, ColorChoice::Never);
    }
}
