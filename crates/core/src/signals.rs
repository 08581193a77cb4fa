use crate::domain::price::PriceSeries;
use crate::domain::recommendation::{Category, Indicators, Recommendation};
use crate::error::{PipelineError, Result};

pub const OSCILLATOR_WINDOW: usize = 14;
pub const SHORT_MA_WINDOW: usize = 20;
pub const LONG_MA_WINDOW: usize = 50;

pub const OVERBOUGHT: f64 = 70.0;
pub const OVERSOLD: f64 = 30.0;
const NEUTRAL: f64 = 50.0;

/// Bars needed before every indicator has a value at the latest bar.
pub fn required_bars() -> usize {
    LONG_MA_WINDOW.max(SHORT_MA_WINDOW).max(OSCILLATOR_WINDOW + 1)
}

/// Simple moving average of the trailing `period` values.
pub fn sma(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }
    Some(data[data.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Relative-strength oscillator over the trailing `period` changes, using the
/// plain average of gains and of losses. A window with no losses reads 100.
pub fn oscillator(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period + 1 {
        return None;
    }

    let tail = &data[data.len() - period - 1..];
    let (mut gains, mut losses) = (0.0, 0.0);
    for w in tail.windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
}

/// First-match rule table over the indicator snapshot.
pub fn classify(indicators: &Indicators) -> Category {
    let osc = indicators.oscillator;
    if osc > OVERBOUGHT {
        Category::Sell
    } else if osc < OVERSOLD {
        Category::Buy
    } else if indicators.short_ma > indicators.long_ma {
        Category::Buy
    } else if indicators.short_ma < indicators.long_ma {
        Category::Sell
    } else {
        Category::Hold
    }
}

/// Distance of the oscillator from the neutral midpoint, scaled to [0, 1].
pub fn confidence(oscillator: f64) -> f64 {
    ((oscillator - NEUTRAL).abs() / NEUTRAL).clamp(0.0, 1.0)
}

pub fn target_price(category: Category, price: f64) -> f64 {
    let factor = match category {
        Category::Buy => 1.10,
        Category::Sell => 0.90,
        Category::Hold => 1.05,
    };
    (price * factor * 100.0).round() / 100.0
}

pub fn indicators(closes: &[f64]) -> Result<Indicators> {
    let required = required_bars();
    let insufficient = || PipelineError::InsufficientHistory {
        required,
        available: closes.len(),
    };
    if closes.len() < required {
        return Err(insufficient());
    }

    Ok(Indicators {
        oscillator: oscillator(closes, OSCILLATOR_WINDOW).ok_or_else(insufficient)?,
        short_ma: sma(closes, SHORT_MA_WINDOW).ok_or_else(insufficient)?,
        long_ma: sma(closes, LONG_MA_WINDOW).ok_or_else(insufficient)?,
    })
}

pub fn recommend(series: &PriceSeries) -> Result<Recommendation> {
    let closes = series.closes();
    let indicators = indicators(&closes)?;
    let last = series.last().ok_or_else(|| PipelineError::InsufficientHistory {
        required: required_bars(),
        available: 0,
    })?;

    let category = classify(&indicators);
    Ok(Recommendation {
        ticker: series.ticker().to_string(),
        as_of_date: last.date,
        category,
        confidence: confidence(indicators.oscillator),
        current_price: last.close,
        target_price: target_price(category, last.close),
        indicators,
    })
}
