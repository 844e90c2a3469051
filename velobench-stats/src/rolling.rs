//! Rolling Window Means
//!
//! Smooths a timing series so single noisy revisions do not dominate
//! regression detection.

/// Compute the trailing rolling mean of `values` over `window` points.
///
/// The result has the same length as the input. Positions with fewer
/// than `window` trailing points are `None`, matching the convention
/// that the first complete window ends at index `window - 1`.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i + 1 > window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            out.push(Some(sum / window as f64));
        } else {
            out.push(None);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_positions_are_incomplete() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let means = rolling_mean(&values, 3);
        assert_eq!(means.len(), 5);
        assert_eq!(means[0], None);
        assert_eq!(means[1], None);
        assert_eq!(means[2], Some(2.0));
        assert_eq!(means[3], Some(3.0));
        assert_eq!(means[4], Some(4.0));
    }

    #[test]
    fn window_of_one_is_identity() {
        let values = [3.5, 1.5, 2.5];
        let means = rolling_mean(&values, 1);
        assert_eq!(means, vec![Some(3.5), Some(1.5), Some(2.5)]);
    }

    #[test]
    fn window_wider_than_series_yields_nothing() {
        let values = [1.0, 2.0];
        let means = rolling_mean(&values, 5);
        assert_eq!(means, vec![None, None]);
    }
}
