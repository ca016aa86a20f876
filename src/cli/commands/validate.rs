//! `phasegate validate`: load and check scenario files without running them.

use std::path::Path;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::ConfigLoader;
use crate::error::{ConfigError, ExitCode, PhasegateError};

/// Outcome for one file.
#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Validates every file and prints a report.
///
/// Returns `ExitCode::CONFIG_ERROR` when any file fails (or, with
/// `--strict`, has warnings).
///
/// # Errors
///
/// Returns `PhasegateError::Json` if the JSON report cannot be rendered.
pub fn run(args: &ValidateArgs, quiet: bool) -> Result<i32, PhasegateError> {
    let loader = ConfigLoader::with_defaults();
    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|path| check_file(&loader, path, args.strict))
        .collect();

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                if report.valid {
                    if !quiet {
                        println!("ok: {}", report.file);
                    }
                } else {
                    eprintln!("invalid: {}", report.file);
                }
                for error in &report.errors {
                    eprintln!("  error: {error}");
                }
                if !quiet {
                    for warning in &report.warnings {
                        eprintln!("  warning: {warning}");
                    }
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    if reports.iter().all(|r| r.valid) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::CONFIG_ERROR)
    }
}

fn check_file(loader: &ConfigLoader, path: &Path, strict: bool) -> FileReport {
    tracing::info!(file = %path.display(), "validating scenario");
    let file = path.display().to_string();
    match loader.load(path) {
        Ok(result) => {
            let warnings: Vec<String> = result.warnings.iter().map(ToString::to_string).collect();
            FileReport {
                file,
                valid: !(strict && !warnings.is_empty()),
                errors: Vec::new(),
                warnings,
            }
        }
        Err(ConfigError::ValidationError { errors, .. }) => FileReport {
            file,
            valid: false,
            errors: errors
                .iter()
                .map(|issue| format!("{} at {}", issue.message, issue.path))
                .collect(),
            warnings: Vec::new(),
        },
        Err(ConfigError::ParseError {
            line: Some(line),
            message,
            ..
        }) => FileReport {
            file,
            valid: false,
            errors: vec![format!("line {line}: {message}")],
            warnings: Vec::new(),
        },
        Err(e) => FileReport {
            file,
            valid: false,
            errors: vec![e.to_string()],
            warnings: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reports_valid_and_invalid_files() {
        let good = temp("phases: [{ id: 1, name: a, order: 1 }]\n");
        let bad = temp("phases: []\n");
        let loader = ConfigLoader::with_defaults();

        let report = check_file(&loader, good.path(), false);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);

        let strict = check_file(&loader, good.path(), true);
        assert!(!strict.valid);

        let report = check_file(&loader, bad.path(), false);
        assert!(!report.valid);
        assert!(report.errors[0].contains("at least one phase"));
    }

    #[test]
    fn test_exit_code_reflects_failures() {
        let bad = temp("phases: []\n");
        let args = ValidateArgs {
            files: vec![bad.path().to_path_buf()],
            format: OutputFormat::Json,
            strict: false,
        };
        assert_eq!(run(&args, true).unwrap(), ExitCode::CONFIG_ERROR);
    }
}
