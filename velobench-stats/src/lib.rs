#![warn(missing_docs)]
//! VeloBench Statistical Engine
//!
//! Provides regression detection over timing series collected across a
//! revision history:
//! - Rolling means to smooth per-revision noise
//! - One-way ANOVA to gate detection on overall significance
//! - One-sided t tests to localize the offending revision
//!
//! The distribution functions (regularized incomplete beta, t and F
//! survival functions) are implemented directly so the crate carries no
//! numerical dependencies.

mod detect;
mod inference;
mod rolling;

pub use detect::{Regression, RegressionCheck};
pub use inference::{f_sf, inc_beta, ln_gamma, one_way_anova, t_sf, Anova};
pub use rolling::rolling_mean;

/// Default rolling window width, in revisions
pub const DEFAULT_WINDOW: usize = 10;

/// Default ANOVA significance threshold for flagging a series
pub const DEFAULT_SIGNIFICANCE: f64 = 0.01;

/// Default per-revision t-test threshold for localizing a slowdown
pub const DEFAULT_COMMIT_SIGNIFICANCE: f64 = 0.001;
