//! IPC Message Types
//!
//! All messages are serialized with rkyv and validated on receipt.
//! The protocol is intentionally self-contained: a `BenchSpec` carries
//! everything the worker needs to run one benchmark, so the worker
//! process links none of the orchestration code.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// A serialized benchmark definition, sent orchestrator to worker.
///
/// The checksum identifies the benchmark content (setup, code, cleanup)
/// and keys the outcome the worker sends back.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct BenchSpec {
    /// Content checksum, stable across renames
    pub checksum: String,
    /// Human-readable benchmark name
    pub name: String,
    /// Setup fragment, run once before timing
    pub setup: String,
    /// Timed statement
    pub code: String,
    /// Cleanup fragment, always run after timing
    pub cleanup: String,
    /// Optional prerequisite fragment, run between setup and timing
    pub prereq: Option<String>,
    /// Fixed loop count, or None for adaptive discovery
    pub ncalls: Option<u64>,
    /// Fixed repeat count, or None for adaptive discovery
    pub repeat: Option<u64>,
}

/// Timing parameters applied to every benchmark in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct BatchOptions {
    /// Adaptive discovery target, in nanoseconds
    pub target_duration_ns: u64,
    /// Report timings in milliseconds regardless of magnitude
    pub force_millis: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            target_duration_ns: 100_000_000,
            force_millis: true,
        }
    }
}

/// Commands sent from the orchestrator to the worker.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum RunnerCommand {
    /// Run every spec in order, streaming one outcome per spec
    RunBatch {
        /// Benchmarks to execute
        specs: Vec<BenchSpec>,
        /// Shared timing parameters
        options: BatchOptions,
    },
    /// Exit cleanly after the current benchmark
    Shutdown,
}

/// Stage at which a benchmark failed inside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailStage {
    /// Setup fragment raised
    Setup,
    /// Prerequisite fragment raised
    Prereq,
    /// Timed statement raised or panicked
    Benchmark,
}

/// The result of executing a single benchmark.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum ExecResult {
    /// Timing completed
    Timed {
        /// Loop count per repeat
        loops: u64,
        /// Number of repeats
        repeat: u64,
        /// Best per-call time, in `units`
        timing: f64,
        /// Unit suffix ("s", "ms", "us", "ns")
        units: String,
    },
    /// A fragment failed
    Failed {
        /// Which stage failed
        stage: FailStage,
        /// Error text for the results store
        traceback: String,
    },
}

impl ExecResult {
    /// Whether this result carries a timing.
    pub fn succeeded(&self) -> bool {
        matches!(self, ExecResult::Timed { .. })
    }
}

/// One benchmark's outcome, streamed worker to orchestrator.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct BenchOutcome {
    /// Checksum of the spec this outcome answers
    pub checksum: String,
    /// What happened
    pub result: ExecResult,
}

/// Messages sent from the worker to the orchestrator.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerReply {
    /// Handshake, sent once at startup
    Hello {
        /// Must match [`crate::PROTOCOL_VERSION`]
        protocol_version: u32,
    },
    /// One benchmark finished
    Outcome(BenchOutcome),
    /// All specs in the batch were attempted
    BatchComplete {
        /// Number of failed benchmarks in the batch
        errors: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_target_a_tenth_of_a_second() {
        let options = BatchOptions::default();
        assert_eq!(options.target_duration_ns, 100_000_000);
        assert!(options.force_millis);
    }

    #[test]
    fn exec_result_success_flag() {
        let timed = ExecResult::Timed {
            loops: 100,
            repeat: 3,
            timing: 1.25,
            units: "ms".to_string(),
        };
        assert!(timed.succeeded());

        let failed = ExecResult::Failed {
            stage: FailStage::Setup,
            traceback: "import failed".to_string(),
        };
        assert!(!failed.succeeded());
    }
}
