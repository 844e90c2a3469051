//! Sustained Regression Detection
//!
//! Flags a timing series whose recent revisions are consistently slower
//! than its best historical stretch, then localizes the first revision
//! at which the slowdown appears.

use crate::inference::{one_way_anova, t_sf};
use crate::rolling::rolling_mean;
use crate::{DEFAULT_COMMIT_SIGNIFICANCE, DEFAULT_SIGNIFICANCE, DEFAULT_WINDOW};

/// Parameters for regression detection.
#[derive(Debug, Clone, Copy)]
pub struct RegressionCheck {
    /// Rolling window width, in revisions
    pub window: usize,
    /// ANOVA threshold for flagging the series at all
    pub significance: f64,
    /// t-test threshold for pinning the slowdown to a revision
    pub commit_significance: f64,
}

impl Default for RegressionCheck {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            significance: DEFAULT_SIGNIFICANCE,
            commit_significance: DEFAULT_COMMIT_SIGNIFICANCE,
        }
    }
}

/// A detected sustained slowdown.
///
/// Indices address the original input series.
#[derive(Debug, Clone)]
pub struct Regression {
    /// Index of the fastest rolling-window position
    pub reference_index: usize,
    /// Rolling mean at the fastest stretch
    pub reference_timing: f64,
    /// Index of the last point in the series
    pub target_index: usize,
    /// Rolling mean at the end of the series
    pub target_timing: f64,
    /// Percent slowdown of the latest point relative to the reference
    pub slowdown_percent: f64,
    /// Latest revision measurably faster than the recent window, if any
    pub latest_better: Option<usize>,
    /// First revision no longer faster than the recent window, if any
    pub earliest_notworse: Option<usize>,
    /// ANOVA p-value that triggered the detection
    pub statistic: f64,
}

impl RegressionCheck {
    /// Check a timing series for a sustained slowdown.
    ///
    /// Returns `None` when the series is too short, when the recent
    /// window is not significantly different from the best stretch, or
    /// when the series is perfectly flat.
    pub fn check(&self, timings: &[f64]) -> Option<Regression> {
        let w = self.window;
        if w < 2 || timings.len() < w {
            return None;
        }

        // Drop the leading positions with incomplete windows so that
        // rolling means and raw values index the same points.
        let offset = w - 1;
        let values = &timings[offset..];
        let means: Vec<f64> = rolling_mean(timings, w)[offset..]
            .iter()
            .map(|m| m.unwrap_or(f64::NAN))
            .collect();
        let n = values.len();

        let min_idx = means
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)?;

        // Reference group: raw values around the fastest stretch. The
        // reported reference timing is the rolling mean itself.
        let half = w / 2;
        let ref_lo = min_idx.saturating_sub(half);
        let ref_hi = (min_idx + half).min(n).max(ref_lo + 1);
        let reference = &values[ref_lo..ref_hi];
        let reference_timing = means[min_idx];

        // Target group: the most recent window, shortened when fewer
        // trimmed points remain.
        let target = &values[n.saturating_sub(w)..];
        let tw = target.len();
        let target_mean = target.iter().sum::<f64>() / tw as f64;

        let anova = one_way_anova(reference, target)?;
        if anova.p > self.significance {
            return None;
        }

        // Localize: one-sided one-sample t-test of each earlier point
        // against the target group.
        let target_var = target
            .iter()
            .map(|&v| (v - target_mean).powi(2))
            .sum::<f64>()
            / (tw - 1) as f64;
        let se = (target_var / tw as f64).sqrt();
        let df = (tw - 1) as f64;

        let mut latest_better = None;
        for (i, &v) in values.iter().enumerate().take(n - tw) {
            let p = if se == 0.0 {
                if v < target_mean {
                    0.0
                } else {
                    1.0
                }
            } else {
                t_sf((target_mean - v) / se, df)
            };
            if p <= self.commit_significance {
                latest_better = Some(i);
            }
        }

        let last = *timings.last()?;
        Some(Regression {
            reference_index: min_idx + offset,
            reference_timing,
            target_index: timings.len() - 1,
            target_timing: target_mean,
            slowdown_percent: 100.0 * (last - reference_timing) / reference_timing,
            latest_better: latest_better.map(|i| i + offset),
            earliest_notworse: latest_better.map(|i| i + 1 + offset),
            statistic: anova.p,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_series_is_clean() {
        let timings = vec![1.0; 30];
        assert!(RegressionCheck::default().check(&timings).is_none());
    }

    #[test]
    fn short_series_is_skipped() {
        let timings = vec![1.0, 2.0, 3.0];
        assert!(RegressionCheck::default().check(&timings).is_none());
    }

    #[test]
    fn step_change_is_localized() {
        let mut timings = vec![1.0; 20];
        timings.extend(vec![2.0; 10]);

        let regression = RegressionCheck::default()
            .check(&timings)
            .expect("step change should be flagged");

        assert!((regression.slowdown_percent - 100.0).abs() < 1e-9);
        assert!((regression.target_timing - 2.0).abs() < 1e-9);
        assert!((regression.reference_timing - 1.0).abs() < 1e-9);
        // Index 19 is the last fast revision, 20 the first slow one.
        assert_eq!(regression.latest_better, Some(19));
        assert_eq!(regression.earliest_notworse, Some(20));
        assert_eq!(regression.target_index, 29);
        assert!(regression.statistic <= 0.01);
    }

    #[test]
    fn noisy_but_stable_series_is_clean() {
        // Alternating jitter around a constant mean
        let timings: Vec<f64> = (0..40)
            .map(|i| 1.0 + if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();
        assert!(RegressionCheck::default().check(&timings).is_none());
    }

    #[test]
    fn speedup_is_not_a_regression() {
        let mut timings = vec![2.0; 20];
        timings.extend(vec![1.0; 10]);
        // The fastest window is at the end, so the target and reference
        // stretches coincide and no slowdown is reported.
        let check = RegressionCheck::default();
        if let Some(r) = check.check(&timings) {
            assert!(r.slowdown_percent <= 0.0);
        }
    }

    #[test]
    fn window_length_series_is_clean() {
        // Exactly one window of history leaves a single trimmed point.
        let mut timings = vec![1.0; 9];
        timings.push(5.0);
        assert!(RegressionCheck::default().check(&timings).is_none());
    }

    #[test]
    fn step_between_one_and_two_windows_is_handled() {
        // 15 points leave a 6-point tail after trimming, shorter than
        // the window itself.
        let mut timings = vec![1.0; 5];
        timings.extend(vec![2.0; 10]);
        assert!(RegressionCheck::default().check(&timings).is_none());
    }

    #[test]
    fn reference_timing_is_the_rolling_mean_minimum() {
        // The raw points around the fastest stretch average 0.75, but
        // the fastest rolling mean is 1.0.
        let timings = vec![
            1.0, 1.0, 1.5, 0.5, 1.0, 1.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0,
        ];
        let check = RegressionCheck {
            window: 4,
            ..Default::default()
        };
        let regression = check.check(&timings).expect("slowdown should be flagged");
        assert!((regression.reference_timing - 1.0).abs() < 1e-9);
        assert!((regression.slowdown_percent - 200.0).abs() < 1e-9);
    }

    #[test]
    fn modest_step_is_localized_despite_target_noise() {
        // t = 0.6 / sqrt(var / 4) = 14.7 at 3 degrees of freedom,
        // p well under the per-revision threshold.
        let mut timings = vec![2.4; 8];
        timings.extend([3.0, 3.1, 2.9, 3.0]);
        let check = RegressionCheck {
            window: 4,
            ..Default::default()
        };
        let regression = check.check(&timings).expect("step should be flagged");
        assert_eq!(regression.latest_better, Some(7));
        assert_eq!(regression.earliest_notworse, Some(8));
    }

    #[test]
    fn custom_window_applies() {
        let mut timings = vec![1.0; 8];
        timings.extend(vec![3.0; 4]);
        let check = RegressionCheck {
            window: 4,
            ..Default::default()
        };
        let regression = check.check(&timings).expect("flagged with narrow window");
        assert!((regression.slowdown_percent - 200.0).abs() < 1e-9);
    }
}
