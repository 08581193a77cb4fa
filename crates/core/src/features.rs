//! Per-day feature rows derived from an ordered close/volume series.
//!
//! Row `t` only reads bars `0..=t`, so perturbing a later bar never changes an
//! earlier row.

use crate::domain::price::PriceBar;
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use serde::Serialize;

/// Number of lagged closes carried by each row.
pub const LAG_DEPTH: usize = 3;

/// Width of the model input vector produced by [`FeatureRow::vector`].
pub const FEATURE_COUNT: usize = 5 + LAG_DEPTH;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: f64,
    pub daily_return: f64,
    pub rolling_mean: f64,
    pub rolling_std: f64,
    /// `lags[k]` is the close `k + 1` sessions before `date`.
    pub lags: [f64; LAG_DEPTH],
}

impl FeatureRow {
    pub fn vector(&self) -> [f64; FEATURE_COUNT] {
        [
            self.close,
            self.volume,
            self.daily_return,
            self.rolling_mean,
            self.rolling_std,
            self.lags[0],
            self.lags[1],
            self.lags[2],
        ]
    }
}

pub fn min_window() -> usize {
    LAG_DEPTH.max(2)
}

/// Builds one row per bar that has at least `window` prior observations.
/// Output length is exactly `bars.len() - window`.
pub fn build_features(bars: &[PriceBar], window: usize) -> Result<Vec<FeatureRow>> {
    check_window(window)?;
    if bars.len() < window + 1 {
        return Err(PipelineError::InsufficientHistory {
            required: window + 1,
            available: bars.len(),
        });
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let rows = (window..bars.len())
        .map(|t| row_at(&closes, t, window, bars[t].date, bars[t].volume))
        .collect();
    Ok(rows)
}

/// Row for the last element of `closes`, used when a forecast step appends a
/// predicted close and needs the next input vector.
pub fn latest_row(
    closes: &[f64],
    window: usize,
    date: NaiveDate,
    volume: f64,
) -> Result<FeatureRow> {
    check_window(window)?;
    if closes.len() < window + 1 {
        return Err(PipelineError::InsufficientHistory {
            required: window + 1,
            available: closes.len(),
        });
    }
    Ok(row_at(closes, closes.len() - 1, window, date, volume))
}

fn check_window(window: usize) -> Result<()> {
    if window < min_window() {
        return Err(PipelineError::invalid(format!(
            "feature window must be at least {} (got {window})",
            min_window()
        )));
    }
    Ok(())
}

// Caller guarantees t >= window >= LAG_DEPTH.
fn row_at(closes: &[f64], t: usize, window: usize, date: NaiveDate, volume: f64) -> FeatureRow {
    let close = closes[t];
    let prev = closes[t - 1];
    let trailing = &closes[t + 1 - window..=t];
    let (mean, std) = mean_std(trailing);

    let mut lags = [0.0; LAG_DEPTH];
    for (k, lag) in lags.iter_mut().enumerate() {
        *lag = closes[t - 1 - k];
    }

    FeatureRow {
        date,
        close,
        volume,
        daily_return: (close - prev) / prev,
        rolling_mean: mean,
        rolling_std: std,
        lags,
    }
}

/// Mean and population standard deviation.
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn bars_from(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                date: start + chrono::Duration::days(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1_000.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn computes_return_mean_std_and_lags() {
        let bars = bars_from(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let rows = build_features(&bars, 3).unwrap();
        assert_eq!(rows.len(), 2);

        let r = &rows[0];
        assert_eq!(r.date, bars[3].date);
        assert_relative_eq!(r.daily_return, 1.0 / 12.0, epsilon = 1e-12);
        assert_relative_eq!(r.rolling_mean, 12.0, epsilon = 1e-12);
        assert_relative_eq!(r.rolling_std, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(r.lags, [12.0, 11.0, 10.0]);
        assert_eq!(r.volume, 1_003.0);
    }

    #[test]
    fn fails_with_insufficient_history() {
        let bars = bars_from(&[1.0, 2.0, 3.0]);
        assert_eq!(
            build_features(&bars, 3),
            Err(PipelineError::InsufficientHistory {
                required: 4,
                available: 3
            })
        );
    }

    #[test]
    fn rejects_window_shorter_than_lag_depth() {
        let bars = bars_from(&[1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(
            build_features(&bars, 2),
            Err(PipelineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn latest_row_matches_batch_row() {
        let closes = [5.0, 6.0, 8.0, 7.0, 9.0, 10.0];
        let bars = bars_from(&closes);
        let rows = build_features(&bars, 4).unwrap();
        let last = latest_row(&closes, 4, bars[5].date, bars[5].volume).unwrap();
        assert_eq!(rows.last().unwrap(), &last);
    }

    proptest! {
        #[test]
        fn row_count_is_n_minus_window(
            closes in prop::collection::vec(1.0f64..500.0, 4..80),
            window in 3usize..40,
        ) {
            prop_assume!(window + 1 <= closes.len());
            let bars = bars_from(&closes);
            let rows = build_features(&bars, window).unwrap();
            prop_assert_eq!(rows.len(), closes.len() - window);
            for row in &rows {
                prop_assert!(bars.iter().any(|b| b.date == row.date));
            }
        }

        #[test]
        fn perturbing_a_bar_never_changes_earlier_rows(
            closes in prop::collection::vec(1.0f64..500.0, 25..60),
            pick in 0usize..1000,
            bump in 0.5f64..50.0,
        ) {
            let window = 5;
            let bars = bars_from(&closes);
            let t = pick % bars.len();
            let mut perturbed = bars.clone();
            perturbed[t].close += bump;
            perturbed[t].volume += bump;

            let before = build_features(&bars, window).unwrap();
            let after = build_features(&perturbed, window).unwrap();
            let cutoff = bars[t].date;
            for (a, b) in before.iter().zip(after.iter()) {
                if a.date < cutoff {
                    prop_assert_eq!(a, b);
                }
            }
        }
    }
}
