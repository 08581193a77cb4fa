//! Next-day close regression and the iterative multi-step forecast built on it.
//!
//! Steps beyond the first feed the previous prediction back in as the newest
//! close, so model error compounds with the horizon. That is expected: the
//! far end of a 30-day forecast is much less reliable than the first step,
//! and the per-step confidence reflects only tree disagreement, not this drift.

pub mod forest;

use crate::domain::contract::MAX_HORIZON;
use crate::domain::forecast::{Forecast, ForecastPoint};
use crate::domain::price::PriceSeries;
use crate::error::{PipelineError, Result};
use crate::features::{build_features, latest_row, mean_std, FeatureRow};
use crate::time::us_market::MarketCalendar;
use forest::{ForestConfig, RandomForest};

/// Rolling window used for the mean/std features.
pub const FEATURE_WINDOW: usize = 20;

/// Below this many (row, next close) pairs the model is not trained.
pub const MIN_TRAINING_ROWS: usize = 30;

pub const DEFAULT_SEED: u64 = 42;

// Relative tree spread of 10% maps to confidence 0.5.
const DISPERSION_SCALE: f64 = 10.0;
const INTERVAL_Z: f64 = 1.96;

#[derive(Debug, Clone)]
pub struct ForecastParams {
    pub horizon: usize,
    /// Number of trailing bars the model is trained on.
    pub lookback: usize,
    pub window: usize,
    pub forest: ForestConfig,
}

impl ForecastParams {
    pub fn new(horizon: usize, lookback: usize, seed: u64) -> Self {
        Self {
            horizon,
            lookback,
            window: FEATURE_WINDOW,
            forest: ForestConfig {
                seed,
                ..ForestConfig::default()
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.horizon == 0 || self.horizon > MAX_HORIZON {
            return Err(PipelineError::invalid(format!(
                "horizon must be between 1 and {MAX_HORIZON} (got {})",
                self.horizon
            )));
        }
        if self.lookback < self.window + 1 {
            return Err(PipelineError::invalid(format!(
                "lookback must be at least {} bars (got {})",
                self.window + 1,
                self.lookback
            )));
        }
        Ok(())
    }
}

/// A trained next-close regressor plus the feature window it was trained with.
pub struct NextCloseModel {
    forest: RandomForest,
    window: usize,
}

impl NextCloseModel {
    /// Trains on every row except the most recent, each paired with the close
    /// of the row that follows it.
    pub fn train(rows: &[FeatureRow], window: usize, config: ForestConfig) -> Result<Self> {
        let pairs = rows.len().saturating_sub(1);
        if pairs < MIN_TRAINING_ROWS {
            return Err(PipelineError::ModelTrainingError(format!(
                "need at least {MIN_TRAINING_ROWS} training rows, got {pairs}"
            )));
        }

        let x: Vec<Vec<f64>> = rows[..pairs].iter().map(|r| r.vector().to_vec()).collect();
        let y: Vec<f64> = rows[1..].iter().map(|r| r.close).collect();

        let (_, target_std) = mean_std(&y);
        if target_std <= f64::EPSILON {
            return Err(PipelineError::ModelTrainingError(
                "target has zero variance (constant price series)".to_string(),
            ));
        }

        let started = std::time::Instant::now();
        let forest = RandomForest::fit(config, &x, &y)?;
        tracing::debug!(
            rows = pairs,
            trees = forest.trees().len(),
            elapsed_ms = started.elapsed().as_millis(),
            "next-close model trained"
        );

        Ok(Self { forest, window })
    }

    pub fn predict(&self, row: &FeatureRow) -> (f64, f64) {
        self.forest.predict_with_spread(&row.vector())
    }
}

pub fn forecast(
    series: &PriceSeries,
    params: &ForecastParams,
    calendar: &MarketCalendar,
) -> Result<Forecast> {
    params.validate()?;

    let recent = series.tail(params.lookback);
    let rows = build_features(recent.bars(), params.window)?;
    let model = NextCloseModel::train(&rows, params.window, params.forest.clone())?;

    let last_bar = recent
        .last()
        .ok_or_else(|| PipelineError::data_unavailable(series.ticker(), "empty series"))?;
    let dates = calendar.next_trading_days(last_bar.date, params.horizon);

    let mut closes = recent.closes();
    let mut current = rows
        .last()
        .cloned()
        .ok_or_else(|| PipelineError::data_unavailable(series.ticker(), "no feature rows"))?;

    let mut points = Vec::with_capacity(params.horizon);
    for date in dates {
        let (predicted, spread) = model.predict(&current);
        points.push(ForecastPoint {
            date,
            predicted_close: predicted,
            lower: predicted - INTERVAL_Z * spread,
            upper: predicted + INTERVAL_Z * spread,
            confidence: spread_confidence(predicted, spread),
        });

        closes.push(predicted);
        current = latest_row(&closes, model.window, date, last_bar.volume)?;
    }

    let confidence = points.iter().map(|p| p.confidence).sum::<f64>() / points.len() as f64;

    Ok(Forecast {
        ticker: series.ticker().to_string(),
        horizon: params.horizon,
        lookback: recent.len(),
        generated_for: last_bar.date,
        points,
        confidence,
    })
}

fn spread_confidence(predicted: f64, spread: f64) -> f64 {
    if predicted.abs() <= f64::EPSILON {
        return 0.0;
    }
    let relative = spread / predicted.abs();
    (1.0 / (1.0 + DISPERSION_SCALE * relative)).clamp(0.0, 1.0)
}
