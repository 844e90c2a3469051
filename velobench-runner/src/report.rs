//! Regression Reporting
//!
//! Bridges the results store and the statistical detector: pulls a
//! benchmark's successful timings in commit order, runs the check, and
//! maps the flagged indices back to revision identifiers.

use velobench_core::Checksum;
use velobench_stats::{Regression, RegressionCheck};
use velobench_store::{BenchmarkDb, StoreResult};

/// A detected slowdown, expressed in revisions.
#[derive(Debug, Clone)]
pub struct RegressionReport {
    /// Benchmark checksum
    pub checksum: String,
    /// Benchmark name at last registration, if known
    pub name: Option<String>,
    /// Revision at the fastest stretch of the series
    pub reference_revision: String,
    /// Newest revision in the series
    pub target_revision: String,
    /// Latest revision still measurably fast, if localized
    pub latest_better: Option<String>,
    /// First revision no longer fast, if localized
    pub earliest_notworse: Option<String>,
    /// Underlying statistics
    pub regression: Regression,
}

/// Check one benchmark's series for a sustained slowdown.
///
/// Failure rows carry no timing and are excluded; the check runs over
/// the successful points only, in commit-timestamp order.
pub fn check_benchmark(
    db: &BenchmarkDb,
    checksum: &Checksum,
    check: &RegressionCheck,
) -> StoreResult<Option<RegressionReport>> {
    let series = db.benchmark_series(checksum)?;
    let points: Vec<(&str, f64)> = series
        .iter()
        .filter_map(|p| p.record.timing.map(|t| (p.revision.as_str(), t)))
        .collect();

    let timings: Vec<f64> = points.iter().map(|(_, t)| *t).collect();
    let regression = match check.check(&timings) {
        Some(regression) => regression,
        None => return Ok(None),
    };

    let revision_at = |i: usize| points[i].0.to_string();
    let name = db.benchmark(checksum)?.map(|b| b.name);

    Ok(Some(RegressionReport {
        checksum: checksum.as_str().to_string(),
        name,
        reference_revision: revision_at(regression.reference_index),
        target_revision: revision_at(regression.target_index),
        latest_better: regression.latest_better.map(|i| revision_at(i)),
        earliest_notworse: regression.earliest_notworse.map(|i| revision_at(i)),
        regression,
    }))
}
