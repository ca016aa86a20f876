//! Structured event stream.
//!
//! Discrete, typed events describing a scenario run, written as
//! newline-delimited JSON (JSONL) with a monotonically increasing sequence
//! number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::{ConditionId, ControllerObserver, EngineEvent, PartId, PhaseId};
use crate::fsm::PhaseState;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during a run.
///
/// Serialized with a `"type"` tag so consumers can dispatch on the kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A scenario was loaded and its sequence started.
    ScenarioStarted {
        /// When the run started.
        timestamp: DateTime<Utc>,
        /// Scenario file or name.
        scenario: String,
        /// Number of phases in the graph.
        phases: usize,
        /// Whether the controller advances on its own.
        auto_advance: bool,
    },

    /// A phase changed state.
    PhaseChanged {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Phase identifier.
        phase_id: PhaseId,
        /// Phase name.
        phase_name: String,
        /// Parent phase, if nested.
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<PhaseId>,
        /// Position among siblings.
        order: u32,
        /// State before.
        from: PhaseState,
        /// State after.
        to: PhaseState,
    },

    /// A condition became satisfied.
    ConditionSatisfied {
        /// When it happened.
        timestamp: DateTime<Utc>,
        /// Owning phase.
        phase_id: PhaseId,
        /// Condition identifier.
        condition_id: ConditionId,
    },

    /// A condition part became satisfied.
    PartSatisfied {
        /// When it happened.
        timestamp: DateTime<Utc>,
        /// Owning phase.
        phase_id: PhaseId,
        /// Owning condition.
        condition_id: ConditionId,
        /// Part identifier.
        part_id: PartId,
    },

    /// The root phase sequence ran out.
    SequenceFinished {
        /// When it happened.
        timestamp: DateTime<Utc>,
    },

    /// The run ended.
    ScenarioStopped {
        /// When the run ended.
        timestamp: DateTime<Utc>,
        /// Why it ended.
        reason: StopReason,
    },
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Command input reached end of file.
    EndOfInput,
    /// A `quit` command was read.
    Quit,
    /// The sequence finished and the run was told to exit then.
    SequenceFinished,
    /// SIGINT / Ctrl+C.
    Interrupted,
    /// SIGTERM.
    Terminated,
}

impl From<&EngineEvent> for Event {
    fn from(event: &EngineEvent) -> Self {
        let timestamp = Utc::now();
        match event {
            EngineEvent::PhaseChanged(change) => Self::PhaseChanged {
                timestamp,
                phase_id: change.phase_id,
                phase_name: change.name.clone(),
                parent_id: change.parent_id,
                order: change.order,
                from: change.from,
                to: change.to,
            },
            EngineEvent::ConditionSatisfied {
                phase_id,
                condition_id,
            } => Self::ConditionSatisfied {
                timestamp,
                phase_id: *phase_id,
                condition_id: *condition_id,
            },
            EngineEvent::PartSatisfied {
                phase_id,
                condition_id,
                part_id,
            } => Self::PartSatisfied {
                timestamp,
                phase_id: *phase_id,
                condition_id: *condition_id,
                part_id: *part_id,
            },
            EngineEvent::SequenceFinished => Self::SequenceFinished { timestamp },
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each [`emit`](Self::emit) takes the next sequence number, writes one
/// JSON line and flushes. Serialization and I/O failures are dropped.
///
/// The emitter is also a [`ControllerObserver`], so it can be registered
/// directly on a [`PhaseController`](crate::engine::PhaseController).
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to `writer`.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes `event` as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope { sequence, event };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl ControllerObserver for EventEmitter {
    fn on_entity_changed(&self, event: &EngineEvent) {
        self.emit(Event::from(event));
    }
}
