//! Fragment Runtime Seam
//!
//! A benchmark stores its setup, statement, and cleanup as text; how that
//! text becomes something callable is a runtime concern. The orchestration
//! and caching layers only ever talk to [`FragmentRuntime`], so the same
//! pipeline can drive a scripting engine, a compiled plugin, or - as
//! [`ClosureRuntime`] does - plain registered Rust closures.

use std::collections::HashMap;
use std::sync::Arc;

use crate::benchmark::Benchmark;

/// Lifecycle stage a benchmark failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The setup fragment raised.
    Setup,
    /// The prerequisite fragment raised; the benchmark is not worthwhile.
    Prereq,
    /// The timed statement itself raised.
    Benchmark,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Setup => "setup",
            Stage::Prereq => "prereq",
            Stage::Benchmark => "benchmark",
        })
    }
}

/// Failure raised by a fragment runtime, tagged with the stage it
/// occurred in.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage} stage failed: {message}")]
pub struct FragmentError {
    /// Stage the failure is attributed to.
    pub stage: Stage,
    /// Human-readable failure description (traceback text where available).
    pub message: String,
}

impl FragmentError {
    /// Create an error for an arbitrary stage.
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    /// Shorthand for a setup-stage failure.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(Stage::Setup, message)
    }

    /// Shorthand for a prereq-stage failure.
    pub fn prereq(message: impl Into<String>) -> Self {
        Self::new(Stage::Prereq, message)
    }

    /// Shorthand for a benchmark-stage failure.
    pub fn benchmark(message: impl Into<String>) -> Self {
        Self::new(Stage::Benchmark, message)
    }
}

/// Materializes stored code fragments into callable units.
///
/// `load` runs the benchmark's setup fragment and prerequisite check and
/// returns a unit whose `call` executes the timed statement once. Failures
/// carry the stage they occurred in so they can be recorded verbatim.
pub trait FragmentRuntime: Send + Sync {
    /// Prepare `bench` for timing: run setup, check the prerequisite, and
    /// return the callable unit for its statement.
    fn load(&self, bench: &Benchmark) -> Result<Box<dyn BenchUnit + '_>, FragmentError>;
}

/// A prepared benchmark: one `call` executes the timed statement once.
pub trait BenchUnit {
    /// Execute the timed statement once.
    fn call(&mut self) -> Result<(), FragmentError>;

    /// Run the cleanup fragment. Invoked exactly once after timing,
    /// whether timing succeeded or not.
    fn cleanup(&mut self) -> Result<(), FragmentError> {
        Ok(())
    }
}

type Handler = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A [`FragmentRuntime`] backed by registered closures.
///
/// Fragment text is used as the lookup key: registering a closure under
/// the exact statement text of a benchmark makes that benchmark runnable.
/// Setup, prereq, and cleanup fragments run their registered closure when
/// one exists and are no-ops otherwise (those fragments may be prose that
/// only matters for the content checksum). A statement with no registered
/// closure fails at the setup stage.
#[derive(Default)]
pub struct ClosureRuntime {
    handlers: HashMap<String, Handler>,
}

impl ClosureRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` as the executable form of `fragment`.
    pub fn register<F>(&mut self, fragment: impl Into<String>, f: F)
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.handlers.insert(fragment.into(), Arc::new(f));
    }

    fn handler(&self, fragment: &str) -> Option<Handler> {
        self.handlers.get(fragment).cloned()
    }

    /// Run `fragment`'s closure if one is registered; absent handlers are
    /// no-ops for non-statement fragments.
    fn run_optional(&self, fragment: &str, stage: Stage) -> Result<(), FragmentError> {
        if fragment.is_empty() {
            return Ok(());
        }
        match self.handler(fragment) {
            Some(h) => h().map_err(|m| FragmentError::new(stage, m)),
            None => Ok(()),
        }
    }
}

impl FragmentRuntime for ClosureRuntime {
    fn load(&self, bench: &Benchmark) -> Result<Box<dyn BenchUnit + '_>, FragmentError> {
        self.run_optional(&bench.setup, Stage::Setup)?;
        if let Some(prereq) = &bench.prereq {
            self.run_optional(prereq, Stage::Prereq)?;
        }

        let statement = self.handler(&bench.code).ok_or_else(|| {
            FragmentError::setup(format!(
                "no closure registered for statement {:?}",
                bench.code
            ))
        })?;
        let cleanup = if bench.cleanup.is_empty() {
            None
        } else {
            self.handler(&bench.cleanup)
        };

        Ok(Box::new(ClosureUnit { statement, cleanup }))
    }
}

struct ClosureUnit {
    statement: Handler,
    cleanup: Option<Handler>,
}

impl BenchUnit for ClosureUnit {
    fn call(&mut self) -> Result<(), FragmentError> {
        (self.statement)().map_err(FragmentError::benchmark)
    }

    fn cleanup(&mut self) -> Result<(), FragmentError> {
        match self.cleanup.take() {
            Some(h) => h().map_err(FragmentError::benchmark),
            None => Ok(()),
        }
    }
}
