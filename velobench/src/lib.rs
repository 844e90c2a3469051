#![warn(missing_docs)]
//! # VeloBench
//!
//! Continuous benchmarking across a project's revision history.
//!
//! VeloBench measures how performance evolves over version control
//! history rather than at a single commit:
//! - **Content-addressed benchmarks**: a benchmark is its fragments;
//!   the checksum survives renames, so history is never lost
//! - **Adaptive timing**: loop counts discovered per revision so fast
//!   and slow eras of a codebase measure equally well
//! - **Process isolation**: batches run in a worker process; crashes
//!   and hangs cost one batch, not the pass
//! - **Incremental passes**: every (benchmark, revision) result is
//!   persisted in SQLite, so a pass resumes where the last one stopped
//! - **Regression detection**: ANOVA-gated rolling-window analysis
//!   localizes sustained slowdowns to a revision
//!
//! ## Quick Start
//!
//! ```ignore
//! use velobench::prelude::*;
//!
//! let bench = Benchmark::new(
//!     "groupby_sum",
//!     "frame_ops",
//!     "from pkg import make_frame; df = make_frame()",
//!     "df.groupby('key').sum()",
//! );
//!
//! let mut runner = BenchmarkRunner::new(
//!     vec![bench],
//!     BenchmarkDb::open("benchmarks.db")?,
//!     repo,
//!     workspace,
//!     ProcessExecutor::current_exe(Duration::from_secs(3600))?,
//!     RunnerOptions::default(),
//! )?;
//! runner.run()?;
//! ```

// Re-export core types
pub use velobench_core::{
    measure, BenchUnit, Benchmark, Checksum, ClosureRuntime, FragmentError, FragmentRuntime,
    RunResult, Stage, TimeUnit, Timing, TimingOptions,
};

// Re-export orchestration
pub use velobench_runner::{
    check_benchmark, run_cli, select_revisions, BatchExecutor, BenchWorkspace, BenchmarkRunner,
    BuildFailure, CommitInfo, InProcessExecutor, ProcessExecutor, RegressionReport, RepoError,
    Revision, RevisionOutcome, RunOrder, RunPolicy, RunnerError, RunnerOptions, SourceRepo,
    VeloConfig,
};

// Re-export the wire types custom executors handle
pub use velobench_ipc::{BatchOptions, BenchOutcome, BenchSpec, ExecResult, FailStage};

// Re-export persistence
pub use velobench_store::{BenchmarkDb, MeasurementRecord, SeriesPoint, StoreError, StoredBenchmark};

// Re-export statistics
pub use velobench_stats::{Anova, Regression, RegressionCheck};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Benchmark, BenchmarkDb, BenchmarkRunner, Checksum, ClosureRuntime, InProcessExecutor,
        ProcessExecutor, RegressionCheck, Revision, RunOrder, RunPolicy, RunnerOptions,
        TimingOptions,
    };
}
