//! CLI Entry Point
//!
//! Benchmark binaries call [`run_cli`] from `main`. Besides worker mode
//! (entered by the hidden `--velo-worker` flag the supervisor passes),
//! every command is read-only database inspection or maintenance: the
//! pass itself is driven programmatically through
//! [`crate::runner::BenchmarkRunner`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use regex::Regex;
use velobench_core::{Checksum, FragmentRuntime};
use velobench_stats::RegressionCheck;
use velobench_store::BenchmarkDb;

use crate::config::VeloConfig;
use crate::report::check_benchmark;
use crate::worker::worker_main;

/// VeloBench CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "velobench")]
#[command(author, version, about = "VeloBench - benchmarking across revision history")]
pub struct Cli {
    /// Subcommand; defaults to listing benchmarks
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the results database (overrides velo.toml)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: run as a worker process (used by the supervisor)
    #[arg(long, hide = true)]
    pub velo_worker: bool,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered benchmarks
    List {
        /// Filter benchmark names by regex
        #[arg(default_value = ".*")]
        filter: String,
    },
    /// Check stored series for sustained slowdowns
    Check {
        /// Filter benchmark names by regex
        #[arg(default_value = ".*")]
        filter: String,

        /// Rolling window width in revisions
        #[arg(long, default_value = "10")]
        window: usize,

        /// ANOVA significance threshold
        #[arg(long, default_value = "0.01")]
        significance: f64,

        /// Per-revision localization threshold
        #[arg(long, default_value = "0.001")]
        commit_significance: f64,
    },
    /// Show or edit the revision blacklist
    Blacklist {
        /// Remove this revision from the blacklist
        #[arg(long)]
        remove: Option<String>,
    },
    /// Delete failure rows so the next pass retries them
    ClearErrors,
    /// Print a default velo.toml
    InitConfig,
}

/// Run the CLI, entering worker mode when the supervisor asks for it.
///
/// Returns the process exit code. In worker mode that is the number of
/// failed benchmarks; otherwise zero on success.
pub fn run_cli(runtime: &dyn FragmentRuntime) -> anyhow::Result<i32> {
    let cli = Cli::parse();

    // Worker mode skips logging setup: stderr belongs to the
    // supervisor's passthrough.
    if cli.velo_worker {
        return Ok(worker_main(runtime));
    }

    let filter_level = if cli.verbose {
        "velobench=debug"
    } else {
        "velobench=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter_level).init();

    let config = VeloConfig::discover().unwrap_or_default();
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.db_path));

    match cli.command {
        None | Some(Commands::List { .. }) => {
            let filter = match &cli.command {
                Some(Commands::List { filter }) => filter.as_str(),
                _ => ".*",
            };
            let re = Regex::new(filter)?;
            let db = BenchmarkDb::open(&db_path)?;
            for bench in db.benchmarks()? {
                if re.is_match(&bench.name) {
                    match &bench.description {
                        Some(description) => {
                            println!("{}  {}  ({})", bench.checksum, bench.name, description)
                        }
                        None => println!("{}  {}", bench.checksum, bench.name),
                    }
                }
            }
        }
        Some(Commands::Check {
            filter,
            window,
            significance,
            commit_significance,
        }) => {
            let re = Regex::new(&filter)?;
            let db = BenchmarkDb::open(&db_path)?;
            let check = RegressionCheck {
                window,
                significance,
                commit_significance,
            };

            let mut flagged = 0;
            for bench in db.benchmarks()? {
                if !re.is_match(&bench.name) {
                    continue;
                }
                let checksum = Checksum::from_hex(&bench.checksum);
                if let Some(report) = check_benchmark(&db, &checksum, &check)? {
                    flagged += 1;
                    println!(
                        "{}: {:+.1}% since {} (p = {:.2e})",
                        bench.name,
                        report.regression.slowdown_percent,
                        report
                            .earliest_notworse
                            .as_deref()
                            .unwrap_or(&report.target_revision),
                        report.regression.statistic,
                    );
                }
            }
            if flagged == 0 {
                println!("no sustained slowdowns detected");
            } else {
                return Ok(1);
            }
        }
        Some(Commands::Blacklist { remove }) => {
            let db = BenchmarkDb::open(&db_path)?;
            match remove {
                Some(revision) => {
                    if db.remove_from_blacklist(&revision)? {
                        println!("removed {revision} from the blacklist");
                    } else {
                        println!("{revision} was not blacklisted");
                    }
                }
                None => {
                    let mut revisions: Vec<String> = db.blacklist()?.into_iter().collect();
                    revisions.sort();
                    for revision in revisions {
                        println!("{revision}");
                    }
                }
            }
        }
        Some(Commands::ClearErrors) => {
            let db = BenchmarkDb::open(&db_path)?;
            let removed = db.delete_error_results()?;
            println!("deleted {removed} failure rows");
        }
        Some(Commands::InitConfig) => {
            print!("{}", VeloConfig::default_toml());
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn worker_flag_parses_hidden() {
        let cli = Cli::parse_from(["velobench", "--velo-worker"]);
        assert!(cli.velo_worker);
        assert!(cli.command.is_none());
    }

    #[test]
    fn check_flags_override_defaults() {
        let cli = Cli::parse_from([
            "velobench",
            "check",
            "suite.*",
            "--window",
            "5",
            "--significance",
            "0.05",
        ]);
        match cli.command {
            Some(Commands::Check {
                filter,
                window,
                significance,
                commit_significance,
            }) => {
                assert_eq!(filter, "suite.*");
                assert_eq!(window, 5);
                assert!((significance - 0.05).abs() < 1e-12);
                assert!((commit_significance - 0.001).abs() < 1e-12);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
