//! Pass Orchestration
//!
//! A pass walks the selected revisions, materializes each one, runs the
//! outstanding benchmarks through the executor, and persists one result
//! row per (benchmark, revision). Failure handling is deliberately
//! conservative: a revision where everything failed gets one retry
//! after a hard clean, and only lands on the blacklist when enough
//! benchmarks agree the revision itself is broken.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use velobench_core::Benchmark;
use velobench_ipc::{BatchOptions, BenchSpec, ExecResult, FailStage};
use velobench_store::{BenchmarkDb, MeasurementRecord, StoreError};

use crate::executor::{spec_for, BatchExecutor};
use crate::repo::{BenchWorkspace, RepoError, Revision, SourceRepo};
use crate::select::{select_revisions, RunOrder, RunPolicy, SelectorError};

/// Settings for one pass.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Which revisions to visit
    pub policy: RunPolicy,
    /// Traversal order
    pub order: RunOrder,
    /// Ignore revisions before this date
    pub start_date: Option<DateTime<Utc>>,
    /// Re-run benchmarks that already have results
    pub overwrite: bool,
    /// Skip revisions on the blacklist
    pub use_blacklist: bool,
    /// Blacklist a revision when this many benchmarks all fail there
    pub failure_threshold: usize,
    /// Adaptive timing target per benchmark
    pub target_duration: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            policy: RunPolicy::Eod,
            order: RunOrder::Normal,
            start_date: None,
            overwrite: false,
            use_blacklist: true,
            failure_threshold: 5,
            target_duration: Duration::from_millis(100),
        }
    }
}

/// What happened at one revision during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionOutcome {
    /// Revision identifier
    pub revision: String,
    /// Whether at least one benchmark produced a timing here
    pub any_succeeded: bool,
    /// How many benchmarks were outstanding at this revision
    pub outstanding: usize,
}

/// Errors that abort a pass.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Results database failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid selection settings
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// Repository access failure
    #[error(transparent)]
    Repo(#[from] RepoError),
}

fn stage_name(stage: FailStage) -> &'static str {
    match stage {
        FailStage::Setup => "setup",
        FailStage::Prereq => "prereq",
        FailStage::Benchmark => "benchmark",
    }
}

fn measurement_from(result: &ExecResult) -> MeasurementRecord {
    match result {
        ExecResult::Timed { loops, timing, .. } => {
            MeasurementRecord::success(*loops as i64, *timing)
        }
        ExecResult::Failed { stage, traceback } => {
            MeasurementRecord::failure(format!("{} failed: {}", stage_name(*stage), traceback))
        }
    }
}

/// Orchestrates benchmark passes over a revision history.
pub struct BenchmarkRunner<R, W, X> {
    benchmarks: Vec<Benchmark>,
    db: BenchmarkDb,
    repo: R,
    workspace: W,
    executor: X,
    options: RunnerOptions,
}

impl<R, W, X> BenchmarkRunner<R, W, X>
where
    R: SourceRepo,
    W: BenchWorkspace,
    X: BatchExecutor,
{
    /// Build a runner, registering every benchmark in the store so
    /// renamed benchmarks keep their history.
    pub fn new(
        benchmarks: Vec<Benchmark>,
        db: BenchmarkDb,
        repo: R,
        workspace: W,
        executor: X,
        options: RunnerOptions,
    ) -> Result<Self, RunnerError> {
        for bench in &benchmarks {
            db.register_benchmark(bench)?;
        }
        Ok(Self {
            benchmarks,
            db,
            repo,
            workspace,
            executor,
            options,
        })
    }

    /// Borrow the results database.
    pub fn db(&self) -> &BenchmarkDb {
        &self.db
    }

    /// Give the database back, consuming the runner.
    pub fn into_db(self) -> BenchmarkDb {
        self.db
    }

    /// Borrow the workspace.
    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            target_duration_ns: self.options.target_duration.as_nanos() as u64,
            force_millis: true,
        }
    }

    /// Benchmarks still needing a result at `revision`.
    fn outstanding_at(&self, revision: &Revision) -> Result<Vec<Benchmark>, RunnerError> {
        let existing = if self.options.overwrite {
            HashSet::new()
        } else {
            self.db.rev_results(&revision.id)?
        };
        Ok(self
            .benchmarks
            .iter()
            .filter(|b| {
                b.start_date.map_or(true, |d| d <= revision.timestamp)
                    && !existing.contains(b.checksum().as_str())
            })
            .cloned()
            .collect())
    }

    /// Run one batch at a materialized revision, persisting a row per
    /// benchmark. Returns the success count, or `None` when the
    /// revision failed to build (and was blacklisted).
    fn attempt(
        &mut self,
        revision: &Revision,
        outstanding: &[Benchmark],
        overwrite: bool,
    ) -> Result<Option<usize>, RunnerError> {
        if let Err(failure) = self.workspace.materialize(&revision.id) {
            tracing::warn!(revision = %revision.id, reason = %failure.reason, "build failed");
            self.db
                .add_to_blacklist(&revision.id, &format!("build failed: {}", failure.reason))?;
            return Ok(None);
        }

        let specs: Vec<BenchSpec> = outstanding.iter().map(spec_for).collect();
        let batch_options = self.batch_options();
        let outcomes = match self.executor.run_batch(&specs, &batch_options) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!(revision = %revision.id, error = %e, "batch execution failed");
                Vec::new()
            }
        };

        let mut results: HashMap<String, ExecResult> = outcomes
            .into_iter()
            .map(|o| (o.checksum, o.result))
            .collect();

        let mut successes = 0;
        for bench in outstanding {
            let checksum = bench.checksum();
            let record = match results.remove(checksum.as_str()) {
                Some(result) => measurement_from(&result),
                None => MeasurementRecord::failure("worker did not report an outcome"),
            };
            if record.succeeded() {
                successes += 1;
            }
            self.db
                .write_result(&checksum, &revision.id, revision.timestamp, &record, overwrite)?;
        }

        tracing::info!(
            revision = %revision.id,
            succeeded = successes,
            attempted = outstanding.len(),
            "revision measured"
        );
        Ok(Some(successes))
    }

    /// Run a full pass, returning one outcome per visited revision.
    pub fn run(&mut self) -> Result<Vec<RevisionOutcome>, RunnerError> {
        let history = self.repo.revisions()?;
        let revisions = select_revisions(
            history,
            self.options.policy,
            self.options.order,
            self.options.start_date,
        );

        let blacklist = if self.options.use_blacklist {
            self.db.blacklist()?
        } else {
            HashSet::new()
        };

        let mut outcomes = Vec::with_capacity(revisions.len());
        for revision in revisions {
            if blacklist.contains(&revision.id) {
                tracing::debug!(revision = %revision.id, "skipping blacklisted revision");
                outcomes.push(RevisionOutcome {
                    revision: revision.id,
                    any_succeeded: false,
                    outstanding: 0,
                });
                continue;
            }

            let outstanding = self.outstanding_at(&revision)?;
            if outstanding.is_empty() {
                outcomes.push(RevisionOutcome {
                    revision: revision.id,
                    any_succeeded: false,
                    outstanding: 0,
                });
                continue;
            }

            let attempted = outstanding.len();
            let first = self.attempt(&revision, &outstanding, self.options.overwrite)?;
            let successes = match first {
                None => {
                    outcomes.push(RevisionOutcome {
                        revision: revision.id,
                        any_succeeded: false,
                        outstanding: attempted,
                    });
                    continue;
                }
                Some(successes) => successes,
            };

            let final_successes = if successes == 0 {
                // Everything failed: scrub the build tree and try once
                // more, overwriting the failure rows just written.
                tracing::warn!(revision = %revision.id, "all benchmarks failed, retrying after hard clean");
                match self.workspace.hard_clean() {
                    Ok(()) => match self.attempt(&revision, &outstanding, true)? {
                        Some(retried) => retried,
                        None => successes,
                    },
                    Err(failure) => {
                        tracing::warn!(revision = %revision.id, reason = %failure.reason, "hard clean failed");
                        successes
                    }
                }
            } else {
                successes
            };

            if final_successes == 0 && attempted > self.options.failure_threshold {
                self.db.add_to_blacklist(
                    &revision.id,
                    &format!("no benchmark succeeded among {attempted}"),
                )?;
            }

            outcomes.push(RevisionOutcome {
                revision: revision.id,
                any_succeeded: final_successes > 0,
                outstanding: attempted,
            });
        }

        Ok(outcomes)
    }
}
