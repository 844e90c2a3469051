//! End-to-end pass behavior against in-memory fakes: a scripted
//! revision history, a workspace that records materialize calls, and
//! an in-process executor backed by closures.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use velobench::{
    check_benchmark, BenchWorkspace, Benchmark, BenchmarkDb, BenchmarkRunner, BuildFailure,
    ClosureRuntime, CommitInfo, InProcessExecutor, MeasurementRecord, RegressionCheck, RepoError,
    Revision, RunOrder, RunPolicy, RunnerOptions, SourceRepo,
};

struct ScriptedRepo {
    revisions: Vec<Revision>,
}

impl ScriptedRepo {
    fn daily(days: u32) -> Self {
        Self {
            revisions: (1..=days)
                .map(|d| {
                    Revision::new(
                        format!("rev-{d:02}"),
                        Utc.with_ymd_and_hms(2024, 7, d, 12, 0, 0).unwrap(),
                    )
                })
                .collect(),
        }
    }
}

impl SourceRepo for ScriptedRepo {
    fn revisions(&self) -> Result<Vec<Revision>, RepoError> {
        Ok(self.revisions.clone())
    }

    fn commit_info(&self, revision: &str) -> Result<CommitInfo, RepoError> {
        self.revisions
            .iter()
            .find(|r| r.id == revision)
            .map(|r| CommitInfo {
                timestamp: r.timestamp,
                authors: vec!["dev".to_string()],
                message: format!("change at {revision}"),
            })
            .ok_or_else(|| RepoError::UnknownRevision(revision.to_string()))
    }
}

#[derive(Default)]
struct RecordingWorkspace {
    materialized: Vec<String>,
    broken: HashSet<String>,
    hard_cleans: usize,
}

impl BenchWorkspace for RecordingWorkspace {
    fn materialize(&mut self, revision: &str) -> Result<(), BuildFailure> {
        self.materialized.push(revision.to_string());
        if self.broken.contains(revision) {
            return Err(BuildFailure {
                revision: revision.to_string(),
                reason: "link error".to_string(),
            });
        }
        Ok(())
    }

    fn hard_clean(&mut self) -> Result<(), BuildFailure> {
        self.hard_cleans += 1;
        Ok(())
    }
}

fn suite() -> (Vec<Benchmark>, ClosureRuntime) {
    let benchmarks = vec![
        Benchmark::new("sum_loop", "arith", "", "sum()")
            .with_ncalls(10)
            .with_repeat(3),
        Benchmark::new("sort_vec", "arith", "", "sort()")
            .with_ncalls(10)
            .with_repeat(3),
    ];
    let mut runtime = ClosureRuntime::new();
    runtime.register("sum()", || {
        std::hint::black_box((0..100u64).sum::<u64>());
        Ok(())
    });
    runtime.register("sort()", || {
        let mut v: Vec<u64> = (0..100).rev().collect();
        v.sort_unstable();
        std::hint::black_box(v);
        Ok(())
    });
    (benchmarks, runtime)
}

fn options() -> RunnerOptions {
    RunnerOptions {
        policy: RunPolicy::All,
        order: RunOrder::Normal,
        target_duration: Duration::from_millis(1),
        ..Default::default()
    }
}

#[test]
fn pass_covers_every_revision_and_benchmark() {
    let (benchmarks, runtime) = suite();
    let checksums: Vec<_> = benchmarks.iter().map(|b| b.checksum()).collect();
    let mut runner = BenchmarkRunner::new(
        benchmarks,
        BenchmarkDb::open_in_memory().unwrap(),
        ScriptedRepo::daily(4),
        RecordingWorkspace::default(),
        InProcessExecutor::new(runtime),
        options(),
    )
    .unwrap();

    let outcomes = runner.run().unwrap();
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.any_succeeded && o.outstanding == 2));

    for checksum in &checksums {
        let series = runner.db().benchmark_series(checksum).unwrap();
        assert_eq!(series.len(), 4);
        assert!(series.iter().all(|p| p.record.succeeded()));
        // Commit-timestamp order, oldest first.
        assert_eq!(series[0].revision, "rev-01");
        assert_eq!(series[3].revision, "rev-04");
    }
}

#[test]
fn interrupted_pass_resumes_without_remeasuring() {
    let (benchmarks, runtime) = suite();
    let checksums: Vec<_> = benchmarks.iter().map(|b| b.checksum()).collect();

    // First pass over a two-revision prefix of the history.
    let mut runner = BenchmarkRunner::new(
        benchmarks.clone(),
        BenchmarkDb::open_in_memory().unwrap(),
        ScriptedRepo::daily(2),
        RecordingWorkspace::default(),
        InProcessExecutor::new(runtime),
        options(),
    )
    .unwrap();
    runner.run().unwrap();
    let db = runner.into_db();

    // Second pass sees the full history but only measures the new tail.
    let (_, runtime) = suite();
    let mut runner = BenchmarkRunner::new(
        benchmarks,
        db,
        ScriptedRepo::daily(4),
        RecordingWorkspace::default(),
        InProcessExecutor::new(runtime),
        options(),
    )
    .unwrap();
    let outcomes = runner.run().unwrap();

    let measured: Vec<usize> = outcomes.iter().map(|o| o.outstanding).collect();
    assert_eq!(measured, vec![0, 0, 2, 2]);
    for checksum in &checksums {
        assert_eq!(runner.db().benchmark_series(checksum).unwrap().len(), 4);
    }
}

#[test]
fn blacklisted_revisions_are_never_materialized() {
    let (benchmarks, runtime) = suite();
    let db = BenchmarkDb::open_in_memory().unwrap();
    db.add_to_blacklist("rev-02", "known broken").unwrap();

    let mut runner = BenchmarkRunner::new(
        benchmarks,
        db,
        ScriptedRepo::daily(3),
        RecordingWorkspace::default(),
        InProcessExecutor::new(runtime),
        options(),
    )
    .unwrap();
    let outcomes = runner.run().unwrap();

    let skipped = outcomes.iter().find(|o| o.revision == "rev-02").unwrap();
    assert!(!skipped.any_succeeded);
    assert_eq!(skipped.outstanding, 0);
    assert!(!runner.workspace().materialized.contains(&"rev-02".to_string()));
}

#[test]
fn build_failure_is_blacklisted_and_skipped_next_pass() {
    let (benchmarks, runtime) = suite();
    let mut workspace = RecordingWorkspace::default();
    workspace.broken.insert("rev-03".to_string());

    let mut runner = BenchmarkRunner::new(
        benchmarks.clone(),
        BenchmarkDb::open_in_memory().unwrap(),
        ScriptedRepo::daily(3),
        workspace,
        InProcessExecutor::new(runtime),
        options(),
    )
    .unwrap();
    runner.run().unwrap();
    assert!(runner.db().blacklist().unwrap().contains("rev-03"));

    // Second pass: the broken revision stays untouched.
    let db = runner.into_db();
    let (_, runtime) = suite();
    let mut runner = BenchmarkRunner::new(
        benchmarks,
        db,
        ScriptedRepo::daily(3),
        RecordingWorkspace::default(),
        InProcessExecutor::new(runtime),
        options(),
    )
    .unwrap();
    let outcomes = runner.run().unwrap();
    assert!(runner.workspace().materialized.is_empty());
    assert!(outcomes.iter().all(|o| o.outstanding == 0));
}

#[test]
fn regression_check_flags_a_seeded_slowdown() {
    let db = BenchmarkDb::open_in_memory().unwrap();
    let bench = Benchmark::new("window_agg", "frame", "", "agg()");
    db.register_benchmark(&bench).unwrap();
    let checksum = bench.checksum();

    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    for i in 0..30 {
        let timing = if i < 20 { 1.0 } else { 2.0 };
        db.write_result(
            &checksum,
            &format!("rev-{i:02}"),
            base + chrono::Duration::days(i),
            &MeasurementRecord::success(1000, timing),
            false,
        )
        .unwrap();
    }

    let report = check_benchmark(&db, &checksum, &RegressionCheck::default())
        .unwrap()
        .expect("the step change should be flagged");
    assert_eq!(report.earliest_notworse.as_deref(), Some("rev-20"));
    assert!((report.regression.slowdown_percent - 100.0).abs() < 1e-9);
    assert!(report.regression.statistic <= 0.01);
}

#[test]
fn results_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("velo.db");

    let (benchmarks, runtime) = suite();
    let checksum = benchmarks[0].checksum();
    let mut runner = BenchmarkRunner::new(
        benchmarks,
        BenchmarkDb::open(&path).unwrap(),
        ScriptedRepo::daily(2),
        RecordingWorkspace::default(),
        InProcessExecutor::new(runtime),
        options(),
    )
    .unwrap();
    runner.run().unwrap();
    drop(runner);

    let db = BenchmarkDb::open(&path).unwrap();
    assert_eq!(db.benchmark_series(&checksum).unwrap().len(), 2);
    assert_eq!(db.benchmarks().unwrap().len(), 2);
}
