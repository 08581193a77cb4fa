//! Typed request records and the validation step that runs at the boundary,
//! before anything reaches the pipeline.

use crate::error::{PipelineError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_DAYS: i64 = 30;
pub const DEFAULT_HORIZON: i64 = 7;
pub const MAX_HORIZON: usize = 30;
pub const DEFAULT_LOOKBACK: i64 = 90;
pub const MAX_LOOKBACK: usize = 2_000;
const MAX_TICKER_LEN: usize = 15;

/// Upper-cases and trims a ticker, rejecting anything that cannot be a symbol.
pub fn normalize_ticker(raw: &str) -> Result<String> {
    let ticker = raw.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(PipelineError::invalid("ticker must be non-empty"));
    }
    if ticker.len() > MAX_TICKER_LEN {
        return Err(PipelineError::invalid(format!(
            "ticker is too long ({} > {MAX_TICKER_LEN})",
            ticker.len()
        )));
    }
    if !ticker
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
    {
        return Err(PipelineError::invalid(format!(
            "ticker contains invalid characters: {ticker}"
        )));
    }
    Ok(ticker)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl HistoryRequest {
    /// Fills in defaults relative to `today` and returns an inclusive range.
    pub fn validate_and_into_range(self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        let end = self.end_date.unwrap_or(today);
        let start = self
            .start_date
            .unwrap_or(end - Duration::days(DEFAULT_HISTORY_DAYS));
        if start > end {
            return Err(PipelineError::invalid(format!(
                "start_date {start} is after end_date {end}"
            )));
        }
        Ok((start, end))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(default = "default_horizon")]
    pub days: i64,
    #[serde(default)]
    pub lookback_days: Option<i64>,
}

fn default_horizon() -> i64 {
    DEFAULT_HORIZON
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictParams {
    pub horizon: usize,
    pub lookback: usize,
}

impl PredictRequest {
    pub fn validate_and_into_params(self) -> Result<PredictParams> {
        if self.days <= 0 || self.days as usize > MAX_HORIZON {
            return Err(PipelineError::invalid(format!(
                "days must be between 1 and {MAX_HORIZON} (got {})",
                self.days
            )));
        }

        let lookback = self.lookback_days.unwrap_or(DEFAULT_LOOKBACK);
        if lookback <= 0 || lookback as usize > MAX_LOOKBACK {
            return Err(PipelineError::invalid(format!(
                "lookback_days must be between 1 and {MAX_LOOKBACK} (got {lookback})"
            )));
        }

        Ok(PredictParams {
            horizon: self.days as usize,
            lookback: lookback as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn normalizes_tickers() {
        assert_eq!(normalize_ticker(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_ticker("brk.b").unwrap(), "BRK.B");
        assert!(normalize_ticker("   ").is_err());
        assert!(normalize_ticker("AA PL").is_err());
        assert!(normalize_ticker("DROP;TABLE").is_err());
    }

    #[test]
    fn history_defaults_to_last_thirty_days() {
        let today = d(2025, 6, 30);
        let (start, end) = HistoryRequest::default()
            .validate_and_into_range(today)
            .unwrap();
        assert_eq!(end, today);
        assert_eq!(start, d(2025, 5, 31));
    }

    #[test]
    fn history_rejects_inverted_range() {
        let req = HistoryRequest {
            start_date: Some(d(2025, 6, 30)),
            end_date: Some(d(2025, 6, 1)),
        };
        assert!(matches!(
            req.validate_and_into_range(d(2025, 7, 1)),
            Err(PipelineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn predict_request_accepts_defaults() {
        let req: PredictRequest = serde_json::from_value(json!({})).unwrap();
        let params = req.validate_and_into_params().unwrap();
        assert_eq!(params, PredictParams { horizon: 7, lookback: 90 });
    }

    #[test]
    fn predict_request_rejects_non_positive_horizon() {
        for days in [0, -3, 31] {
            let req = PredictRequest { days, lookback_days: None };
            assert!(matches!(
                req.validate_and_into_params(),
                Err(PipelineError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn predict_request_rejects_wrong_types() {
        let res = serde_json::from_value::<PredictRequest>(json!({"days": "seven"}));
        assert!(res.is_err());
    }
}
