#![warn(missing_docs)]
//! VeloBench Core - Benchmark Model and Timing Engine
//!
//! This crate provides the units of measurement work and the machinery
//! to time them:
//! - `Benchmark`: an immutable description of one measurement (setup,
//!   timed statement, cleanup), identified by a content checksum rather
//!   than by name
//! - `FragmentRuntime` / `BenchUnit`: the seam that turns stored code
//!   fragments into something callable
//! - `measure`: the adaptive best-of timing loop

mod benchmark;
mod fragment;
mod timing;

pub use benchmark::{Benchmark, Checksum, RunResult};
pub use fragment::{BenchUnit, ClosureRuntime, FragmentError, FragmentRuntime, Stage};
pub use timing::{measure, TimeUnit, Timing, TimingOptions, DEFAULT_TARGET_DURATION};
