//! Batch Execution
//!
//! The runner hands a batch of serialized benchmark definitions to an
//! executor and gets back one outcome per benchmark. Two executors
//! exist: [`InProcessExecutor`] runs the batch in the calling process
//! (fast, no isolation, the choice for tests), and
//! [`crate::supervisor::ProcessExecutor`] spawns an isolated worker so
//! a crashing benchmark cannot take the orchestrator down.

use std::time::Duration;

use thiserror::Error;
use velobench_core::{
    Benchmark, ClosureRuntime, FragmentRuntime, RunResult, Stage, TimingOptions,
};
use velobench_ipc::{BatchOptions, BenchOutcome, BenchSpec, ExecResult, FailStage, FrameError};

/// Errors from batch execution.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The worker process could not be started
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// Framing or serialization failure on the worker channel
    #[error("IPC error: {0}")]
    Ipc(String),

    /// The batch exceeded its wall-clock budget
    #[error("timeout waiting for worker")]
    Timeout,

    /// The worker sent an unexpected message
    #[error("worker protocol error: expected {expected}, got {got}")]
    Protocol {
        /// What the orchestrator was waiting for
        expected: String,
        /// What arrived instead
        got: String,
    },

    /// The worker process died mid-batch
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
}

impl From<FrameError> for ExecutorError {
    fn from(e: FrameError) -> Self {
        ExecutorError::Ipc(e.to_string())
    }
}

/// Runs batches of benchmarks, one outcome per benchmark.
///
/// Executors may return fewer outcomes than specs when the batch is cut
/// short; the runner treats missing outcomes as failures to retry.
pub trait BatchExecutor {
    /// Execute every spec, in order.
    fn run_batch(
        &mut self,
        specs: &[BenchSpec],
        options: &BatchOptions,
    ) -> Result<Vec<BenchOutcome>, ExecutorError>;
}

/// Serialize a benchmark for the wire.
pub fn spec_for(bench: &Benchmark) -> BenchSpec {
    BenchSpec {
        checksum: bench.checksum().as_str().to_string(),
        name: bench.name.clone(),
        setup: bench.setup.clone(),
        code: bench.code.clone(),
        cleanup: bench.cleanup.clone(),
        prereq: bench.prereq.clone(),
        ncalls: bench.ncalls,
        repeat: bench.repeat,
    }
}

/// Rebuild a benchmark from its wire form.
///
/// Group and description do not travel: they are orchestrator-side
/// metadata and do not affect the checksum.
pub fn benchmark_from_spec(spec: &BenchSpec) -> Benchmark {
    let mut bench = Benchmark::new(&spec.name, "", &spec.setup, &spec.code)
        .with_cleanup(&spec.cleanup);
    if let Some(prereq) = &spec.prereq {
        bench = bench.with_prereq(prereq);
    }
    if let Some(n) = spec.ncalls {
        bench = bench.with_ncalls(n);
    }
    if let Some(r) = spec.repeat {
        bench = bench.with_repeat(r);
    }
    bench
}

/// Timing options for one spec within a batch.
pub fn timing_options(spec: &BenchSpec, options: &BatchOptions) -> TimingOptions {
    TimingOptions {
        ncalls: spec.ncalls,
        repeat: spec.repeat,
        target_duration: Duration::from_nanos(options.target_duration_ns),
        force_millis: options.force_millis,
    }
}

fn fail_stage(stage: Stage) -> FailStage {
    match stage {
        Stage::Setup => FailStage::Setup,
        Stage::Prereq => FailStage::Prereq,
        Stage::Benchmark => FailStage::Benchmark,
    }
}

/// Convert an in-process run result to its wire form.
pub fn exec_result(result: RunResult) -> ExecResult {
    match result {
        RunResult::Timed(timing) => ExecResult::Timed {
            loops: timing.loops,
            repeat: timing.repeat,
            timing: timing.timing,
            units: timing.units.suffix().to_string(),
        },
        RunResult::Failed { stage, traceback } => ExecResult::Failed {
            stage: fail_stage(stage),
            traceback,
        },
    }
}

/// Executes batches in the calling process against a fragment runtime.
pub struct InProcessExecutor<R: FragmentRuntime> {
    runtime: R,
}

impl<R: FragmentRuntime> InProcessExecutor<R> {
    /// Wrap a runtime.
    pub fn new(runtime: R) -> Self {
        Self { runtime }
    }
}

impl Default for InProcessExecutor<ClosureRuntime> {
    fn default() -> Self {
        Self::new(ClosureRuntime::new())
    }
}

impl<R: FragmentRuntime> BatchExecutor for InProcessExecutor<R> {
    fn run_batch(
        &mut self,
        specs: &[BenchSpec],
        options: &BatchOptions,
    ) -> Result<Vec<BenchOutcome>, ExecutorError> {
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let bench = benchmark_from_spec(spec);
            let opts = timing_options(spec, options);
            let result = bench.run(&self.runtime, &opts);
            outcomes.push(BenchOutcome {
                checksum: spec.checksum.clone(),
                result: exec_result(result),
            });
        }
        Ok(outcomes)
    }
}
