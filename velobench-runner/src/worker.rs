//! Worker Process Entry Point
//!
//! The worker runs benchmark batches in a process of its own so the
//! orchestrator survives crashes and runaway fragments. It speaks the
//! framed protocol over fds 3 and 4 when spawned by the supervisor, or
//! over stdin and stdout when driven by hand.

use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};

use velobench_core::FragmentRuntime;
use velobench_ipc::{
    BenchOutcome, ExecResult, FailStage, FrameError, FrameReader, FrameWriter, RunnerCommand,
    WorkerReply, IPC_FD_ENV, PROTOCOL_VERSION,
};

use crate::executor::{benchmark_from_spec, exec_result, timing_options};

fn transport() -> (Box<dyn Read>, Box<dyn Write>) {
    if let Ok(spec) = std::env::var(IPC_FD_ENV) {
        let mut parts = spec.splitn(2, ',');
        let read_fd = parts.next().and_then(|s| s.trim().parse::<i32>().ok());
        let write_fd = parts.next().and_then(|s| s.trim().parse::<i32>().ok());
        if let (Some(read_fd), Some(write_fd)) = (read_fd, write_fd) {
            let reader = unsafe { std::fs::File::from_raw_fd(read_fd) };
            let writer = unsafe { std::fs::File::from_raw_fd(write_fd) };
            return (Box::new(reader), Box::new(writer));
        }
    }
    (Box::new(std::io::stdin()), Box::new(std::io::stdout()))
}

fn run_spec(
    runtime: &dyn FragmentRuntime,
    spec: &velobench_ipc::BenchSpec,
    options: &velobench_ipc::BatchOptions,
) -> ExecResult {
    let bench = benchmark_from_spec(spec);
    let opts = timing_options(spec, options);

    // A panicking fragment must not take the rest of the batch with it.
    match catch_unwind(AssertUnwindSafe(|| bench.run(runtime, &opts))) {
        Ok(result) => exec_result(result),
        Err(panic) => {
            let message = panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "benchmark panicked".to_string());
            ExecResult::Failed {
                stage: FailStage::Benchmark,
                traceback: message,
            }
        }
    }
}

/// Run the worker loop until the orchestrator shuts it down.
///
/// Returns the process exit code: the total number of failed
/// benchmarks across all batches, clamped to fit.
pub fn worker_main(runtime: &dyn FragmentRuntime) -> i32 {
    let (read, write) = transport();
    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write);

    if writer
        .write(&WorkerReply::Hello {
            protocol_version: PROTOCOL_VERSION,
        })
        .is_err()
    {
        return 1;
    }

    let mut total_errors: u32 = 0;

    loop {
        let command: RunnerCommand = match reader.read() {
            Ok(command) => command,
            Err(FrameError::EndOfStream) => break,
            Err(e) => {
                tracing::error!(error = %e, "worker channel failed");
                return 1;
            }
        };

        match command {
            RunnerCommand::Shutdown => break,
            RunnerCommand::RunBatch { specs, options } => {
                let mut errors: u32 = 0;
                for spec in &specs {
                    let result = run_spec(runtime, spec, &options);
                    if !result.succeeded() {
                        errors += 1;
                    }
                    let outcome = BenchOutcome {
                        checksum: spec.checksum.clone(),
                        result,
                    };
                    if writer.write(&WorkerReply::Outcome(outcome)).is_err() {
                        // Orchestrator went away; nothing left to report to.
                        return errors.min(i32::MAX as u32) as i32;
                    }
                }
                total_errors = total_errors.saturating_add(errors);
                if writer.write(&WorkerReply::BatchComplete { errors }).is_err() {
                    break;
                }
            }
        }
    }

    total_errors.min(i32::MAX as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use velobench_core::{Benchmark, ClosureRuntime};
    use velobench_ipc::BatchOptions;

    fn spec(name: &str, code: &str) -> velobench_ipc::BenchSpec {
        crate::executor::spec_for(&Benchmark::new(name, "suite", "", code).with_ncalls(5).with_repeat(3))
    }

    #[test]
    fn panicking_fragment_becomes_a_failure() {
        let mut runtime = ClosureRuntime::new();
        runtime.register("kaboom()", || panic!("induced failure"));

        let result = run_spec(&runtime, &spec("panics", "kaboom()"), &BatchOptions::default());
        match result {
            ExecResult::Failed { stage, traceback } => {
                assert_eq!(stage, FailStage::Benchmark);
                assert!(traceback.contains("induced failure"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn healthy_fragment_times_normally() {
        let mut runtime = ClosureRuntime::new();
        runtime.register("fine()", || Ok(()));

        let result = run_spec(&runtime, &spec("fine", "fine()"), &BatchOptions::default());
        assert!(result.succeeded());
    }
}
