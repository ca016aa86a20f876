//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, Mutex};

use phasegate::engine::{
    Condition, ConditionKind, ConditionPart, ConditionType, ControllerObserver, EngineEvent,
    PartSpec, Phase, PhaseSpec,
};
use phasegate::strategy::StrategyFactory;

/// Path to a file under `tests/fixtures/`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Runs the `phasegate` binary with `args` and empty stdin.
pub fn phasegate(args: &[&str]) -> Output {
    phasegate_with_input(args, "")
}

/// Runs the `phasegate` binary with `args`, feeding `input` on stdin.
pub fn phasegate_with_input(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_phasegate"))
        .args(args)
        .env_remove("PHASEGATE_LOG_LEVEL")
        .env_remove("PHASEGATE_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("phasegate binary should spawn");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input.as_bytes())
        .expect("stdin should accept input");
    child.wait_with_output().expect("phasegate should exit")
}

/// A counter condition with one `gte` part per reference.
pub fn counter_condition(id: u32, references: &[i64]) -> Arc<Condition> {
    let condition = Condition::new(id, format!("c{id}"), ConditionKind::Counter);
    for (i, reference) in references.iter().enumerate() {
        let part_id = u32::try_from(i + 1).unwrap();
        condition
            .add_part(ConditionPart::new(PartSpec::counter_at_least(
                part_id,
                format!("p{part_id}"),
                *reference,
            )))
            .unwrap();
    }
    condition
        .initialize_part_strategies(&StrategyFactory::new())
        .unwrap();
    condition
}

/// A time condition with one part lasting `units` seconds.
pub fn time_condition(id: u32, units: i64) -> Arc<Condition> {
    let condition = Condition::new(id, format!("t{id}"), ConditionKind::Time);
    condition
        .add_part(ConditionPart::new(PartSpec::elapsed(1, "elapsed", units)))
        .unwrap();
    condition
        .initialize_part_strategies(&StrategyFactory::new())
        .unwrap();
    condition
}

/// A root phase combining `conditions` with `rule`.
pub fn phase(id: u32, order: u32, rule: ConditionType, conditions: Vec<Arc<Condition>>) -> Arc<Phase> {
    Phase::new(PhaseSpec::new(id, format!("phase-{id}"), order, rule), conditions).unwrap()
}

/// Records every event a controller re-broadcasts.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<EngineEvent>>);

impl EventLog {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl ControllerObserver for EventLog {
    fn on_entity_changed(&self, event: &EngineEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}
