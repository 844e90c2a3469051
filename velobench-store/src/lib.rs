#![warn(missing_docs)]
//! VeloBench Results Store
//!
//! SQLite persistence for benchmark timings keyed by content checksum
//! and revision. One row per (benchmark, revision) pair records either
//! a timing or the traceback of the failure, so a pass can later tell
//! "never attempted" apart from "attempted and failed". A blacklist
//! table keeps revisions that cannot be benchmarked from being retried
//! on every pass.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use velobench_core::{Benchmark, Checksum};

/// Errors from the results store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A result row already exists and overwrite was not requested
    #[error("result already recorded for benchmark {checksum} at revision {revision}")]
    Conflict {
        /// Benchmark checksum
        checksum: String,
        /// Revision identifier
        revision: String,
    },

    /// A stored timestamp could not be parsed
    #[error("malformed timestamp in results table: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A single measurement row: a timing on success, a traceback on
/// failure, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    /// Total calls per timing loop, None on failure
    pub ncalls: Option<i64>,
    /// Best per-call timing, None on failure
    pub timing: Option<f64>,
    /// Failure text, None on success
    pub traceback: Option<String>,
}

impl MeasurementRecord {
    /// A successful measurement.
    pub fn success(ncalls: i64, timing: f64) -> Self {
        Self {
            ncalls: Some(ncalls),
            timing: Some(timing),
            traceback: None,
        }
    }

    /// A failed measurement with its error text.
    pub fn failure(traceback: impl Into<String>) -> Self {
        Self {
            ncalls: None,
            timing: None,
            traceback: Some(traceback.into()),
        }
    }

    /// Whether this record carries a timing.
    pub fn succeeded(&self) -> bool {
        self.timing.is_some()
    }
}

/// One point in a benchmark's timing series.
#[derive(Debug, Clone)]
pub struct SeriesPoint {
    /// Revision identifier
    pub revision: String,
    /// Commit timestamp of the revision
    pub timestamp: DateTime<Utc>,
    /// The measurement at that revision
    pub record: MeasurementRecord,
}

/// A registered benchmark row.
#[derive(Debug, Clone)]
pub struct StoredBenchmark {
    /// Content checksum
    pub checksum: String,
    /// Benchmark name at last registration
    pub name: String,
    /// Description, if any
    pub description: Option<String>,
}

/// Handle to the results database.
pub struct BenchmarkDb {
    conn: Connection,
}

impl BenchmarkDb {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS benchmarks (
                checksum    TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS results (
                checksum  TEXT NOT NULL,
                revision  TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                ncalls    INTEGER,
                timing    REAL,
                traceback TEXT,
                PRIMARY KEY (checksum, revision)
            );
            CREATE INDEX IF NOT EXISTS idx_results_revision ON results(revision);

            CREATE TABLE IF NOT EXISTS blacklist (
                revision TEXT PRIMARY KEY,
                reason   TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Register a benchmark, updating name and description if its
    /// checksum is already known.
    pub fn register_benchmark(&self, bench: &Benchmark) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO benchmarks (checksum, name, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(checksum) DO UPDATE SET name = ?2, description = ?3",
            params![
                bench.checksum().as_str(),
                bench.name,
                bench.description.as_deref()
            ],
        )?;
        Ok(())
    }

    /// Record a measurement for (benchmark, revision).
    ///
    /// Without `overwrite` an existing row is a [`StoreError::Conflict`];
    /// with it the row is replaced, which is how retries supersede a
    /// first attempt's failure record.
    pub fn write_result(
        &self,
        checksum: &Checksum,
        revision: &str,
        timestamp: DateTime<Utc>,
        record: &MeasurementRecord,
        overwrite: bool,
    ) -> StoreResult<()> {
        let sql = if overwrite {
            "INSERT OR REPLACE INTO results (checksum, revision, timestamp, ncalls, timing, traceback)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        } else {
            "INSERT INTO results (checksum, revision, timestamp, ncalls, timing, traceback)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        };
        let outcome = self.conn.execute(
            sql,
            params![
                checksum.as_str(),
                revision,
                timestamp.to_rfc3339(),
                record.ncalls,
                record.timing,
                record.traceback.as_deref()
            ],
        );
        match outcome {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict {
                    checksum: checksum.as_str().to_string(),
                    revision: revision.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Checksums of every benchmark with a result at `revision`.
    pub fn rev_results(&self, revision: &str) -> StoreResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT checksum FROM results WHERE revision = ?1")?;
        let rows = stmt.query_map(params![revision], |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }

    /// A benchmark's full series, ordered by commit timestamp.
    pub fn benchmark_series(&self, checksum: &Checksum) -> StoreResult<Vec<SeriesPoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT revision, timestamp, ncalls, timing, traceback
             FROM results WHERE checksum = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![checksum.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut series = Vec::new();
        for row in rows {
            let (revision, stamp, ncalls, timing, traceback) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&stamp)?.with_timezone(&Utc);
            series.push(SeriesPoint {
                revision,
                timestamp,
                record: MeasurementRecord {
                    ncalls,
                    timing,
                    traceback,
                },
            });
        }
        Ok(series)
    }

    /// All registered benchmarks.
    pub fn benchmarks(&self) -> StoreResult<Vec<StoredBenchmark>> {
        let mut stmt = self
            .conn
            .prepare("SELECT checksum, name, description FROM benchmarks ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredBenchmark {
                checksum: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Look up a registered benchmark by checksum.
    pub fn benchmark(&self, checksum: &Checksum) -> StoreResult<Option<StoredBenchmark>> {
        let row = self
            .conn
            .query_row(
                "SELECT checksum, name, description FROM benchmarks WHERE checksum = ?1",
                params![checksum.as_str()],
                |row| {
                    Ok(StoredBenchmark {
                        checksum: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// The set of blacklisted revisions.
    pub fn blacklist(&self) -> StoreResult<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT revision FROM blacklist")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }

    /// Blacklist a revision. Idempotent; the first reason recorded wins.
    pub fn add_to_blacklist(&self, revision: &str, reason: &str) -> StoreResult<()> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO blacklist (revision, reason) VALUES (?1, ?2)",
            params![revision, reason],
        )?;
        if inserted > 0 {
            tracing::warn!(revision, reason, "revision blacklisted");
        }
        Ok(())
    }

    /// Remove a revision from the blacklist. Returns whether a row was
    /// deleted.
    pub fn remove_from_blacklist(&self, revision: &str) -> StoreResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM blacklist WHERE revision = ?1",
            params![revision],
        )?;
        Ok(deleted > 0)
    }

    /// Delete benchmarks (and their results) whose checksum is not in
    /// `keep`. Returns the number of benchmarks removed.
    pub fn prune_unregistered(&self, keep: &[Checksum]) -> StoreResult<usize> {
        let keep: HashSet<&str> = keep.iter().map(|c| c.as_str()).collect();
        let stale: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT checksum FROM benchmarks")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut stale = Vec::new();
            for row in rows {
                let checksum = row?;
                if !keep.contains(checksum.as_str()) {
                    stale.push(checksum);
                }
            }
            stale
        };
        for checksum in &stale {
            self.conn.execute(
                "DELETE FROM results WHERE checksum = ?1",
                params![checksum],
            )?;
            self.conn.execute(
                "DELETE FROM benchmarks WHERE checksum = ?1",
                params![checksum],
            )?;
        }
        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "pruned unregistered benchmarks");
        }
        Ok(stale.len())
    }

    /// Delete the result for (benchmark, revision). Returns whether a
    /// row was deleted.
    pub fn delete_result(&self, checksum: &Checksum, revision: &str) -> StoreResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM results WHERE checksum = ?1 AND revision = ?2",
            params![checksum.as_str(), revision],
        )?;
        Ok(deleted > 0)
    }

    /// Delete every failure record, so the next pass retries them.
    /// Returns the number of rows removed.
    pub fn delete_error_results(&self) -> StoreResult<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM results WHERE timing IS NULL", [])?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bench(name: &str, code: &str) -> Benchmark {
        Benchmark::new(name, "suite", "setup()", code)
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn register_is_idempotent_and_updates_name() {
        let db = BenchmarkDb::open_in_memory().unwrap();
        let b = bench("first_name", "work()");
        db.register_benchmark(&b).unwrap();

        let renamed = bench("second_name", "work()");
        assert_eq!(b.checksum(), renamed.checksum());
        db.register_benchmark(&renamed).unwrap();

        let all = db.benchmarks().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "second_name");
    }

    #[test]
    fn duplicate_result_conflicts_unless_overwriting() {
        let db = BenchmarkDb::open_in_memory().unwrap();
        let b = bench("dup", "work()");
        db.register_benchmark(&b).unwrap();
        let checksum = b.checksum();

        let failed = MeasurementRecord::failure("boom");
        db.write_result(&checksum, "r1", ts(1), &failed, false)
            .unwrap();

        let again = db.write_result(&checksum, "r1", ts(1), &failed, false);
        assert!(matches!(again, Err(StoreError::Conflict { .. })));

        let fixed = MeasurementRecord::success(1000, 1.5);
        db.write_result(&checksum, "r1", ts(1), &fixed, true)
            .unwrap();

        let series = db.benchmark_series(&checksum).unwrap();
        assert_eq!(series.len(), 1);
        assert!(series[0].record.succeeded());
        assert_eq!(series[0].record.timing, Some(1.5));
    }

    #[test]
    fn series_is_ordered_by_timestamp() {
        let db = BenchmarkDb::open_in_memory().unwrap();
        let b = bench("ordered", "work()");
        db.register_benchmark(&b).unwrap();
        let checksum = b.checksum();

        // Insert newest first to prove ordering comes from the query.
        db.write_result(&checksum, "r3", ts(3), &MeasurementRecord::success(10, 3.0), false)
            .unwrap();
        db.write_result(&checksum, "r1", ts(1), &MeasurementRecord::success(10, 1.0), false)
            .unwrap();
        db.write_result(&checksum, "r2", ts(2), &MeasurementRecord::success(10, 2.0), false)
            .unwrap();

        let series = db.benchmark_series(&checksum).unwrap();
        let revisions: Vec<&str> = series.iter().map(|p| p.revision.as_str()).collect();
        assert_eq!(revisions, vec!["r1", "r2", "r3"]);
        assert_eq!(series[0].timestamp, ts(1));
    }

    #[test]
    fn rev_results_reports_covered_benchmarks() {
        let db = BenchmarkDb::open_in_memory().unwrap();
        let a = bench("a", "a()");
        let b = bench("b", "b()");
        db.register_benchmark(&a).unwrap();
        db.register_benchmark(&b).unwrap();

        db.write_result(&a.checksum(), "r1", ts(1), &MeasurementRecord::success(1, 1.0), false)
            .unwrap();

        let covered = db.rev_results("r1").unwrap();
        assert!(covered.contains(a.checksum().as_str()));
        assert!(!covered.contains(b.checksum().as_str()));
        assert!(db.rev_results("r2").unwrap().is_empty());
    }

    #[test]
    fn blacklist_roundtrip() {
        let db = BenchmarkDb::open_in_memory().unwrap();
        db.add_to_blacklist("bad", "build failed").unwrap();
        db.add_to_blacklist("bad", "later reason").unwrap();

        let list = db.blacklist().unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.contains("bad"));

        assert!(db.remove_from_blacklist("bad").unwrap());
        assert!(!db.remove_from_blacklist("bad").unwrap());
        assert!(db.blacklist().unwrap().is_empty());
    }

    #[test]
    fn prune_removes_stale_benchmarks_and_results() {
        let db = BenchmarkDb::open_in_memory().unwrap();
        let keep = bench("keep", "keep()");
        let drop = bench("drop", "drop_me()");
        db.register_benchmark(&keep).unwrap();
        db.register_benchmark(&drop).unwrap();
        db.write_result(&drop.checksum(), "r1", ts(1), &MeasurementRecord::success(1, 1.0), false)
            .unwrap();

        let removed = db.prune_unregistered(&[keep.checksum()]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.benchmarks().unwrap().len(), 1);
        assert!(db.benchmark_series(&drop.checksum()).unwrap().is_empty());
    }

    #[test]
    fn delete_error_results_keeps_timings() {
        let db = BenchmarkDb::open_in_memory().unwrap();
        let b = bench("mixed", "work()");
        db.register_benchmark(&b).unwrap();
        let checksum = b.checksum();

        db.write_result(&checksum, "ok", ts(1), &MeasurementRecord::success(1, 1.0), false)
            .unwrap();
        db.write_result(&checksum, "bad", ts(2), &MeasurementRecord::failure("x"), false)
            .unwrap();

        assert_eq!(db.delete_error_results().unwrap(), 1);
        let series = db.benchmark_series(&checksum).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].revision, "ok");
    }

    #[test]
    fn file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        let b = bench("persist", "work()");
        {
            let db = BenchmarkDb::open(&path).unwrap();
            db.register_benchmark(&b).unwrap();
            db.write_result(&b.checksum(), "r1", ts(1), &MeasurementRecord::success(5, 0.5), false)
                .unwrap();
        }
        let db = BenchmarkDb::open(&path).unwrap();
        let series = db.benchmark_series(&b.checksum()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].record.ncalls, Some(5));
    }
}
