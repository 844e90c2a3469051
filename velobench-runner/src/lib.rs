#![warn(missing_docs)]
//! VeloBench Runner
//!
//! Orchestrates benchmark passes over a revision history: selects
//! revisions by policy and order, materializes each one through a
//! [`repo::BenchWorkspace`], runs the outstanding benchmarks in an
//! isolated worker process, and persists a result row for every pair
//! so a pass can resume or run incrementally. Also home to the worker
//! entry point and the maintenance CLI.

mod cli;
pub mod config;
pub mod executor;
pub mod repo;
pub mod report;
pub mod runner;
pub mod select;
pub mod supervisor;
pub mod worker;

pub use cli::{run_cli, Cli, Commands};
pub use config::{RunConfig, StoreConfig, VeloConfig, WorkerConfig};
pub use executor::{BatchExecutor, ExecutorError, InProcessExecutor};
pub use repo::{BenchWorkspace, BuildFailure, CommitInfo, RepoError, Revision, SourceRepo};
pub use report::{check_benchmark, RegressionReport};
pub use runner::{BenchmarkRunner, RevisionOutcome, RunnerError, RunnerOptions};
pub use select::{select_revisions, RunOrder, RunPolicy, SelectorError};
pub use supervisor::ProcessExecutor;
pub use worker::worker_main;
