//! Source Repository Abstraction
//!
//! The runner only needs two things from a version control system: the
//! revision history with commit timestamps, and a way to materialize a
//! buildable working tree at a given revision. Both live behind traits
//! so the orchestration logic stays VCS-agnostic and testable with
//! in-memory fakes.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A revision in the history, oldest-first ordering is not assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Stable revision identifier (hash, revno)
    pub id: String,
    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
}

impl Revision {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
        }
    }
}

/// Commit metadata beyond the timestamp, used for reporting.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
    /// Author names
    pub authors: Vec<String>,
    /// Commit message subject
    pub message: String,
}

/// Errors from repository access.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The revision does not exist in the history
    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    /// Underlying VCS command or I/O failure
    #[error("repository error: {0}")]
    Backend(String),
}

/// The working tree could not be brought to a buildable state at a
/// revision. Distinct from [`RepoError`] because the runner reacts by
/// blacklisting the revision rather than aborting the pass.
#[derive(Debug, Error)]
#[error("build failed at revision {revision}: {reason}")]
pub struct BuildFailure {
    /// The revision that failed to build
    pub revision: String,
    /// Build output or error summary
    pub reason: String,
}

/// Read-only access to a revision history.
pub trait SourceRepo {
    /// The full history, unordered.
    fn revisions(&self) -> Result<Vec<Revision>, RepoError>;

    /// Metadata for one revision.
    fn commit_info(&self, revision: &str) -> Result<CommitInfo, RepoError>;
}

/// A working tree that can be rebuilt at arbitrary revisions.
pub trait BenchWorkspace {
    /// Check out and build `revision`, leaving the tree importable by
    /// worker processes.
    fn materialize(&mut self, revision: &str) -> Result<(), BuildFailure>;

    /// Scrub all build products so the next materialize starts clean.
    /// Used as a last resort when every benchmark failed at a revision.
    fn hard_clean(&mut self) -> Result<(), BuildFailure>;
}
