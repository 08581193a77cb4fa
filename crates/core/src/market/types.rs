use crate::domain::price::PriceBar;
use crate::time::us_market::session_date;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
    #[serde(default)]
    pub error: Option<ChartError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartError {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

impl ChartError {
    pub fn is_not_found(&self) -> bool {
        self.code.eq_ignore_ascii_case("Not Found")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResult {
    /// Absent when the range has no sessions.
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: ChartIndicators,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartIndicators {
    #[serde(default)]
    pub quote: Vec<QuoteColumns>,
}

/// Column arrays aligned with `timestamp`. Halted sessions show up as nulls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteColumns {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
}

impl ChartResult {
    /// Rows with every column present and a session date inside
    /// `[start, end]`. A missing volume counts as zero. When several rows
    /// fall on one session date (a live row next to the daily one) the
    /// later row wins.
    pub fn into_bars(self, start: NaiveDate, end: NaiveDate) -> Vec<PriceBar> {
        let quote = self.indicators.quote.into_iter().next().unwrap_or_default();
        let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

        let mut out = Vec::with_capacity(self.timestamp.len());
        for (i, &ts) in self.timestamp.iter().enumerate() {
            let Some(date) = DateTime::from_timestamp(ts, 0).and_then(|t| session_date(t).ok())
            else {
                continue;
            };
            if date < start || date > end {
                continue;
            }
            let (Some(open), Some(high), Some(low), Some(close)) = (
                at(&quote.open, i),
                at(&quote.high, i),
                at(&quote.low, i),
                at(&quote.close, i),
            ) else {
                continue;
            };
            out.push(PriceBar {
                date,
                open,
                high,
                low,
                close,
                volume: at(&quote.volume, i).unwrap_or(0.0),
            });
        }

        out.reverse();
        out.sort_by_key(|b| b.date);
        out.dedup_by_key(|b| b.date);
        out
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
    fn parses_chart_and_skips_null_rows() {
        // 2024-03-04 and 2024-03-05 14:30 UTC session opens, plus a halted day.
        let v = json!({
            "chart": {
                "result": [{
                    "meta": {"symbol": "AAPL"},
                    "timestamp": [1709562600, 1709649000, 1709735400],
                    "indicators": {"quote": [{
                        "open": [175.0, 170.8, null],
                        "high": [176.2, 172.0, null],
                        "low": [173.5, 169.6, null],
                        "close": [175.1, 170.1, null],
                        "volume": [81510100, 95132400, null]
                    }]}
                }],
                "error": null
            }
        });

        let parsed: ChartResponse = serde_json::from_value(v).unwrap();
        let result = parsed.chart.result.unwrap().into_iter().next().unwrap();
        let bars = result.into_bars(d(2024, 3, 1), d(2024, 3, 31));

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, d(2024, 3, 4));
        assert_eq!(bars[1].date, d(2024, 3, 5));
        assert_eq!(bars[1].close, 170.1);
        assert_eq!(bars[0].volume, 81_510_100.0);
    }

    #[test]
    fn clips_to_requested_range() {
        let v = json!({
            "timestamp": [1709562600, 1709649000],
            "indicators": {"quote": [{
                "open": [1.0, 2.0], "high": [1.0, 2.0], "low": [1.0, 2.0],
                "close": [1.0, 2.0], "volume": [10, 20]
            }]}
        });
        let result: ChartResult = serde_json::from_value(v).unwrap();
        let bars = result.into_bars(d(2024, 3, 5), d(2024, 3, 5));
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 2.0);
    }

    #[test]
    fn same_session_rows_keep_the_later_one() {
        // 14:30 and 19:00 UTC on 2024-03-04 are both the 03-04 ET session.
        let v = json!({
            "timestamp": [1709562600, 1709578800, 1709649000],
            "indicators": {"quote": [{
                "open": [175.0, 175.0, 170.8], "high": [176.2, 177.0, 172.0],
                "low": [173.5, 173.5, 169.6], "close": [175.1, 176.4, 170.1],
                "volume": [81510100, 90000000, 95132400]
            }]}
        });
        let result: ChartResult = serde_json::from_value(v).unwrap();
        let bars = result.into_bars(d(2024, 3, 1), d(2024, 3, 31));

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, d(2024, 3, 4));
        assert_eq!(bars[0].close, 176.4);
        assert_eq!(bars[1].date, d(2024, 3, 5));
        assert!(crate::domain::price::PriceSeries::new("AAPL", bars).is_ok());
    }

    #[test]
    fn parses_provider_error() {
        let v = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        let parsed: ChartResponse = serde_json::from_value(v).unwrap();
        assert!(parsed.chart.result.is_none());
        assert!(parsed.chart.error.unwrap().is_not_found());
    }

    #[test]
    fn empty_range_has_no_timestamps() {
        let v = json!({"indicators": {"quote": [{}]}});
        let result: ChartResult = serde_json::from_value(v).unwrap();
        assert!(result.into_bars(d(2024, 1, 1), d(2024, 12, 31)).is_empty());
    }
}
