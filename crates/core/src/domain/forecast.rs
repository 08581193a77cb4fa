use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_close: f64,
    pub lower: f64,
    pub upper: f64,
    /// 1.0 when every tree agrees, falling towards 0 as their spread widens.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub ticker: String,
    pub horizon: usize,
    pub lookback: usize,
    /// Date of the last observed bar the forecast starts from.
    pub generated_for: NaiveDate,
    pub points: Vec<ForecastPoint>,
    pub confidence: f64,
}
