//! `phasegate run`: drive a scenario from line commands on stdin.
//!
//! ```text
//! start | advance | skip | process <condition> <part> [increment]
//! reset | status | help | quit
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

use crate::cli::args::RunArgs;
use crate::config::{ConfigLoader, ScenarioConfig, build_controller};
use crate::engine::{
    ConditionId, ControllerObserver, ControllerSnapshot, EngineEvent, PartId, PhaseController,
};
use crate::error::{ExitCode, PhasegateError};
use crate::fsm::StateInfo;
use crate::observability::{Event, EventEmitter, StopReason, init_metrics};

/// Words accepted at the prompt, used for suggestions.
const COMMANDS: [&str; 8] = [
    "start", "advance", "skip", "process", "reset", "status", "help", "quit",
];

const HELP: &str = "commands: start | advance | skip | process <condition> <part> [increment] \
                    | reset | status | help | quit";

/// A parsed stdin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the sequence.
    Start,
    /// Finish a phase in `next` and activate what follows.
    Advance,
    /// Force the current leaf phase to `next`.
    Skip,
    /// Feed an increment to a part of the current phase.
    Process {
        /// Condition id.
        condition: ConditionId,
        /// Part id.
        part: PartId,
        /// Amount to add.
        increment: i64,
    },
    /// Reset every phase.
    Reset,
    /// Print a JSON snapshot.
    Status,
    /// Print the command list.
    Help,
    /// Stop the run.
    Quit,
}

/// Parses one input line. Blank lines and `#` comments yield `None`.
///
/// # Errors
///
/// Returns a message for unknown commands (with a suggestion when one is
/// close) and for malformed arguments.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let words = shlex::split(line).ok_or_else(|| "unbalanced quotes".to_string())?;
    let Some((head, rest)) = words.split_first() else {
        return Ok(None);
    };
    let name = head.to_ascii_lowercase();

    let command = match name.as_str() {
        "start" => Command::Start,
        "advance" | "next" => Command::Advance,
        "skip" => Command::Skip,
        "process" => return parse_process(rest).map(Some),
        "reset" => Command::Reset,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(unknown_command(other)),
    };
    if !rest.is_empty() {
        return Err(format!("'{name}' takes no arguments"));
    }
    Ok(Some(command))
}

fn parse_process(args: &[String]) -> Result<Command, String> {
    const USAGE: &str = "usage: process <condition> <part> [increment]";
    let (condition, part, increment) = match args {
        [c, p] => (c, p, None),
        [c, p, i] => (c, p, Some(i)),
        _ => return Err(USAGE.to_string()),
    };
    let condition: u32 = condition
        .parse()
        .map_err(|_| format!("invalid condition id '{condition}'; {USAGE}"))?;
    let part: u32 = part
        .parse()
        .map_err(|_| format!("invalid part id '{part}'; {USAGE}"))?;
    let increment: i64 = match increment {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("invalid increment '{raw}'; {USAGE}"))?,
        None => 1,
    };
    Ok(Command::Process {
        condition: ConditionId(condition),
        part: PartId(part),
        increment,
    })
}

fn unknown_command(word: &str) -> String {
    let suggestion = COMMANDS
        .iter()
        .map(|c| (strsim::levenshtein(word, c), *c))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance);
    match suggestion {
        Some((_, c)) => format!("unknown command '{word}', did you mean '{c}'?"),
        None => format!("unknown command '{word}'; try 'help'"),
    }
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    scenario: &'a str,
    state: Option<StateInfo>,
    snapshot: ControllerSnapshot,
}

/// Runs `command` against `controller` and returns the reply line.
///
/// # Errors
///
/// Returns engine errors from the underlying operation.
pub fn execute(
    controller: &PhaseController,
    scenario: &str,
    command: &Command,
) -> Result<String, PhasegateError> {
    let reply = match command {
        Command::Start | Command::Advance => {
            match controller.process_and_activate_by_next_order()? {
                Some(_) => describe_current(controller),
                None if controller.is_finished() => "sequence finished".to_string(),
                None => describe_current(controller),
            }
        }
        Command::Skip => {
            let phase = controller.skip()?;
            format!("{} is {}", phase.name(), phase.state())
        }
        Command::Process {
            condition,
            part,
            increment,
        } => {
            let state = controller.process(*condition, *part, *increment)?;
            format!("{condition}/{part} is {state}")
        }
        Command::Reset => {
            controller.reset()?;
            "reset".to_string()
        }
        Command::Status => serde_json::to_string(&StatusReport {
            scenario,
            state: controller.state_info(),
            snapshot: controller.snapshot(),
        })?,
        Command::Help => HELP.to_string(),
        Command::Quit => "bye".to_string(),
    };
    Ok(reply)
}

fn describe_current(controller: &PhaseController) -> String {
    controller.current_leaf_phase().map_or_else(
        || "no current phase".to_string(),
        |phase| format!("current: {} ({})", phase.name(), phase.state()),
    )
}

/// Wakes the command loop when the root sequence finishes.
struct FinishWatch(Notify);

impl ControllerObserver for FinishWatch {
    fn on_entity_changed(&self, event: &EngineEvent) {
        if matches!(event, EngineEvent::SequenceFinished) {
            self.0.notify_one();
        }
    }
}

fn open_emitter(target: Option<&str>) -> Result<Option<Arc<EventEmitter>>, PhasegateError> {
    let emitter = match target {
        None => return Ok(None),
        Some("stdout" | "-") => EventEmitter::stdout(),
        Some("stderr") => EventEmitter::stderr(),
        Some(path) => EventEmitter::from_file(Path::new(path))?,
    };
    Ok(Some(Arc::new(emitter)))
}

/// Runs a scenario until input ends, `quit`, a signal, or (with
/// `--exit-on-finish`) the end of the sequence.
///
/// # Errors
///
/// Returns loading, wiring, metrics and stdin I/O errors. Errors from
/// individual commands are printed and do not stop the run.
pub async fn run(args: &RunArgs, quiet: bool) -> Result<i32, PhasegateError> {
    let loaded = ConfigLoader::with_defaults().load(&args.config)?;
    for warning in &loaded.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    let mut scenario = ScenarioConfig::clone(&loaded.config);
    scenario.engine.auto_advance |= args.auto_advance;
    let name = scenario.name.clone().unwrap_or_else(|| args.config.display().to_string());

    if args.metrics_port.is_some() {
        init_metrics(args.metrics_port)?;
    }

    let controller = build_controller(&scenario)?;

    let emitter = open_emitter(args.events.as_deref())?;
    if let Some(emitter) = &emitter {
        let observer: Arc<dyn ControllerObserver> = emitter.clone();
        controller.observers().add_observer(&observer);
    }
    let finish = Arc::new(FinishWatch(Notify::new()));
    let finish_observer: Arc<dyn ControllerObserver> = finish.clone();
    controller.observers().add_observer(&finish_observer);

    if let Some(emitter) = &emitter {
        emitter.emit(Event::ScenarioStarted {
            timestamp: Utc::now(),
            scenario: name.clone(),
            phases: controller.phases().len(),
            auto_advance: scenario.engine.auto_advance,
        });
    }
    controller.start()?;
    tracing::info!(scenario = %name, "scenario started");
    if !quiet {
        println!("{}", describe_current(&controller));
    }

    let reason = command_loop(&controller, &name, &finish.0, args.exit_on_finish, quiet).await?;

    tracing::info!(scenario = %name, reason = ?reason, "scenario stopped");
    if let Some(emitter) = &emitter {
        emitter.emit(Event::ScenarioStopped {
            timestamp: Utc::now(),
            reason,
        });
    }

    Ok(match reason {
        StopReason::Interrupted => ExitCode::INTERRUPTED,
        StopReason::Terminated => ExitCode::TERMINATED,
        StopReason::EndOfInput | StopReason::Quit | StopReason::SequenceFinished => {
            ExitCode::SUCCESS
        }
    })
}

async fn command_loop(
    controller: &PhaseController,
    scenario: &str,
    finished: &Notify,
    exit_on_finish: bool,
    quiet: bool,
) -> Result<StopReason, PhasegateError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sigterm = signal(SignalKind::terminate())?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => return Ok(StopReason::Interrupted),
            _ = sigterm.recv() => return Ok(StopReason::Terminated),
            () = finished.notified(), if exit_on_finish => return Ok(StopReason::SequenceFinished),
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(StopReason::EndOfInput);
                };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => return Ok(StopReason::Quit),
                    Ok(Some(command)) => match execute(controller, scenario, &command) {
                        Ok(reply) => {
                            if !quiet || command == Command::Status {
                                println!("{reply}");
                            }
                        }
                        Err(e) => eprintln!("error: {e}"),
                    },
                    Err(message) => eprintln!("error: {message}"),
                }
                if exit_on_finish && controller.is_finished() {
                    return Ok(StopReason::SequenceFinished);
                }
            }
        }
    }
}
