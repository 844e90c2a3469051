//! Benchmark Definition and Content Identity
//!
//! A benchmark is identified by the checksum of its code content
//! (setup + statement + cleanup), never by its name: renaming or
//! reordering benchmarks must not invalidate recorded history, while a
//! one-character change to any fragment yields a new identity.

use chrono::{DateTime, Utc};

use crate::fragment::{FragmentRuntime, Stage};
use crate::timing::{measure, Timing, TimingOptions};

/// Content identity of a benchmark: hex digest over setup, statement,
/// and cleanup text, in that order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum(String);

impl Checksum {
    /// Compute the identity of the given fragments.
    pub fn of(setup: &str, code: &str, cleanup: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(setup.as_bytes());
        hasher.update(code.as_bytes());
        hasher.update(cleanup.as_bytes());
        Checksum(hasher.finalize().to_hex().to_string())
    }

    /// Rehydrate a checksum that crossed a serialization boundary.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Checksum(hex.into())
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable unit of measurement work.
///
/// The fragments are stored as text; executing them is delegated to a
/// [`FragmentRuntime`]. Names and descriptions are display metadata only
/// and never participate in identity.
#[derive(Debug, Clone)]
pub struct Benchmark {
    /// Display name. Required at construction; never inferred.
    pub name: String,
    /// Owning group (suite/module) name.
    pub group: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Fragment run once before timing.
    pub setup: String,
    /// The timed statement.
    pub code: String,
    /// Fragment run once after timing.
    pub cleanup: String,
    /// Optional prerequisite fragment; its failure marks the benchmark
    /// not worthwhile rather than broken.
    pub prereq: Option<String>,
    /// Fixed iterations per timed loop, overriding adaptive discovery.
    pub ncalls: Option<u64>,
    /// Fixed repeat count.
    pub repeat: Option<u64>,
    /// Revisions older than this date are never measured.
    pub start_date: Option<DateTime<Utc>>,
}

impl Benchmark {
    /// Create a benchmark with empty cleanup and no overrides.
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        setup: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            description: None,
            setup: setup.into(),
            code: code.into(),
            cleanup: String::new(),
            prereq: None,
            ncalls: None,
            repeat: None,
            start_date: None,
        }
    }

    /// Set the cleanup fragment.
    pub fn with_cleanup(mut self, cleanup: impl Into<String>) -> Self {
        self.cleanup = cleanup.into();
        self
    }

    /// Set the prerequisite fragment.
    pub fn with_prereq(mut self, prereq: impl Into<String>) -> Self {
        self.prereq = Some(prereq.into());
        self
    }

    /// Fix the iterations per timed loop.
    pub fn with_ncalls(mut self, ncalls: u64) -> Self {
        self.ncalls = Some(ncalls);
        self
    }

    /// Fix the repeat count.
    pub fn with_repeat(mut self, repeat: u64) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Exclude revisions before `date` from measurement.
    pub fn with_start_date(mut self, date: DateTime<Utc>) -> Self {
        self.start_date = Some(date);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Content identity of this benchmark.
    pub fn checksum(&self) -> Checksum {
        Checksum::of(&self.setup, &self.code, &self.cleanup)
    }

    /// Load this benchmark through `runtime` and time it.
    ///
    /// `opts.ncalls` / `opts.repeat` act as overrides; when `None`, the
    /// benchmark's own values (or adaptive discovery) apply. Failures at
    /// any stage are returned as data with the originating stage and
    /// message attached; they are never retried here.
    pub fn run(&self, runtime: &dyn FragmentRuntime, opts: &TimingOptions) -> RunResult {
        let mut unit = match runtime.load(self) {
            Ok(unit) => unit,
            Err(e) => {
                return RunResult::Failed {
                    stage: e.stage,
                    traceback: e.message,
                }
            }
        };

        let merged = TimingOptions {
            ncalls: opts.ncalls.or(self.ncalls),
            repeat: opts.repeat.or(self.repeat),
            ..opts.clone()
        };

        let result = match measure(|| unit.call(), &merged) {
            Ok(timing) => RunResult::Timed(timing),
            Err(e) => RunResult::Failed {
                stage: e.stage,
                traceback: e.message,
            },
        };

        if let Err(e) = unit.cleanup() {
            tracing::warn!(benchmark = %self.name, error = %e, "cleanup fragment failed");
        }

        result
    }
}

/// Outcome of running one benchmark once.
#[derive(Debug, Clone)]
pub enum RunResult {
    /// The statement was timed successfully.
    Timed(Timing),
    /// A stage raised; the traceback text is kept for diagnosis.
    Failed {
        /// Stage the failure occurred in.
        stage: Stage,
        /// Failure text, attached to the originating fragment.
        traceback: String,
    },
}

impl RunResult {
    /// Whether a timing was produced.
    pub fn succeeded(&self) -> bool {
        matches!(self, RunResult::Timed(_))
    }

    /// The timing, when one was produced.
    pub fn timing(&self) -> Option<&Timing> {
        match self {
            RunResult::Timed(t) => Some(t),
            RunResult::Failed { .. } => None,
        }
    }
}
