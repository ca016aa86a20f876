//! Prometheus metrics for phase runs.
//!
//! Without an installed recorder every function here is a no-op, so the
//! engine records unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::PhasegateError;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Phase names come from scenario files and end up as label values.
const MAX_PHASE_LABEL_LEN: usize = 64;

/// Installs the global Prometheus recorder.
///
/// With `Some(port)` an HTTP listener is started on `127.0.0.1:<port>`.
/// Later calls are ignored.
///
/// # Errors
///
/// Returns `PhasegateError::Io` if the recorder or listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), PhasegateError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| PhasegateError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "phasegate_phase_transitions_total",
        "Phase transitions by target state"
    );
    describe_counter!(
        "phasegate_conditions_satisfied_total",
        "Conditions that reached satisfied"
    );
    describe_counter!(
        "phasegate_parts_satisfied_total",
        "Condition parts that reached satisfied"
    );
    describe_counter!(
        "phasegate_sequences_finished_total",
        "Root phase sequences that ran to the end"
    );
    describe_gauge!(
        "phasegate_current_phase",
        "Phases on the current chain (1 = current)"
    );
}

/// Records a phase transition into state `to`.
pub fn record_phase_transition(to: &str) {
    counter!("phasegate_phase_transitions_total", "to" => to.to_owned()).increment(1);
}

/// Records a satisfied condition.
pub fn record_condition_satisfied() {
    counter!("phasegate_conditions_satisfied_total").increment(1);
}

/// Records a satisfied part.
pub fn record_part_satisfied() {
    counter!("phasegate_parts_satisfied_total").increment(1);
}

/// Records the end of the root sequence.
pub fn record_sequence_finished() {
    counter!("phasegate_sequences_finished_total").increment(1);
}

/// Marks `phase_name` as on (or off) the current chain.
pub fn set_current_phase(phase_name: &str, current: bool) {
    let value = if current { 1.0 } else { 0.0 };
    gauge!("phasegate_current_phase", "phase" => sanitize_phase_label(phase_name)).set(value);
}

/// Truncates to [`MAX_PHASE_LABEL_LEN`] characters and replaces characters
/// outside `[A-Za-z0-9_-]` with underscores.
fn sanitize_phase_label(name: &str) -> String {
    name.chars()
        .take(MAX_PHASE_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_phase_label("warm up/1"), "warm_up_1");
        assert_eq!(sanitize_phase_label("stage-2_b"), "stage-2_b");
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "p".repeat(500);
        assert_eq!(sanitize_phase_label(&long).len(), MAX_PHASE_LABEL_LEN);
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_phase_transition("active");
        record_condition_satisfied();
        record_part_satisfied();
        record_sequence_finished();
        set_current_phase("warmup", true);
        set_current_phase("warmup", false);
    }
}
