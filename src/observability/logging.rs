//! Subscriber setup for the `phasegate` binary.
//!
//! The library only emits `tracing` events. The binary calls
//! [`init_logging`] once; tests that want output install their own
//! subscriber with `tracing::subscriber::with_default`.
//!
//! Verbosity flags raise the level of this crate's targets only, so the
//! runtime and exporter crates stay at `warn` unless `PHASEGATE_LOG_LEVEL`
//! names them explicitly.

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable holding a full filter directive, e.g.
/// `phasegate::engine=trace,tokio=debug`.
pub const LOG_LEVEL_ENV: &str = "PHASEGATE_LOG_LEVEL";

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines, colored when stderr is a terminal.
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Level of this crate's targets for a `-v` count.
#[must_use]
pub const fn verbosity_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Filter directives for a run: the override when it is set and non-blank,
/// otherwise `warn` globally with this crate raised to the verbosity level.
#[must_use]
pub fn filter_directives(env_override: Option<&str>, verbosity: u8) -> String {
    match env_override.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => {
            let level = verbosity_level(verbosity).as_str().to_ascii_lowercase();
            format!("warn,{CRATE_TARGET}={level}")
        }
    }
}

fn use_ansi(color: ColorChoice, stderr_is_terminal: bool, no_color: bool) -> bool {
    match color {
        ColorChoice::Auto => stderr_is_terminal && !no_color,
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    }
}

/// Installs the global subscriber on stderr. A second call is ignored.
///
/// An unparsable `PHASEGATE_LOG_LEVEL` falls back to the verbosity-derived
/// filter and is reported once on stderr.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let env_override = std::env::var(LOG_LEVEL_ENV).ok();
    let directives = filter_directives(env_override.as_deref(), verbosity);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("warning: ignoring {LOG_LEVEL_ENV}={directives:?}: {e}");
        EnvFilter::new(filter_directives(None, verbosity))
    });

    let ansi = use_ansi(
        color,
        std::io::stderr().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    );
    // Module paths only help once engine internals are being traced.
    let with_target = verbosity >= 2;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(with_target)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Human => builder.with_ansi(ansi).try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_default_keeps_dependencies_at_warn() {
        assert_eq!(filter_directives(None, 0), "warn,phasegate=warn");
        assert_eq!(filter_directives(None, 2), "warn,phasegate=debug");
        assert_eq!(filter_directives(None, 9), "warn,phasegate=trace");
    }

    #[test]
    fn test_override_wins_unless_blank() {
        assert_eq!(
            filter_directives(Some("phasegate::engine=trace"), 0),
            "phasegate::engine=trace"
        );
        assert_eq!(filter_directives(Some("   "), 1), "warn,phasegate=info");
    }

    #[test]
    fn test_directives_parse() {
        for verbosity in 0..4 {
            assert!(EnvFilter::try_new(filter_directives(None, verbosity)).is_ok());
        }
    }

    #[test]
    fn test_color_choice() {
        assert!(use_ansi(ColorChoice::Auto, true, false));
        assert!(!use_ansi(ColorChoice::Auto, true, true));
        assert!(!use_ansi(ColorChoice::Auto, false, false));
        assert!(use_ansi(ColorChoice::Always, false, true));
        assert!(!use_ansi(ColorChoice::Never, true, false));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LogFormat::Human, 0, ColorChoice::Never);
        init_logging(LogFormat::Json, 3, ColorChoice::Never);
    }
}
