use crate::config::Settings;
use crate::domain::price::PriceBar;
use crate::error::{PipelineError, Result};
use crate::market::types::ChartResponse;
use crate::market::MarketDataProvider;
use anyhow::Context;
use chrono::{Duration, NaiveDate};
use reqwest::StatusCode;

const CHART_PATH: &str = "/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; stockpulse/0.1)";

/// Daily bars from the public chart endpoint. One request per fetch; failures
/// are reported as `DataUnavailable` and never retried.
#[derive(Debug, Clone)]
pub struct YahooChartProvider {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartProvider {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.data_provider_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url: settings.data_provider_base_url.clone(),
        })
    }

    fn url(&self, ticker: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            CHART_PATH,
            ticker
        )
    }
}

/// `period1`/`period2` as unix seconds. `period2` is midnight UTC after `end`
/// so the last session is covered.
fn period_bounds(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    let midnight = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or_default()
    };
    (midnight(start), midnight(end + Duration::days(1)))
}

/// Maps a raw chart response to bars, or to the matching pipeline error.
fn bars_from_response(
    ticker: &str,
    status: StatusCode,
    body: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriceBar>> {
    let parsed = serde_json::from_str::<ChartResponse>(body);

    if let Ok(resp) = &parsed {
        if let Some(err) = &resp.chart.error {
            let detail = format!("provider error {}: {}", err.code, err.description);
            return Err(if err.is_not_found() {
                PipelineError::not_found(ticker, detail)
            } else {
                PipelineError::data_unavailable(ticker, detail)
            });
        }
    }

    if status == StatusCode::NOT_FOUND {
        return Err(PipelineError::not_found(ticker, "unknown ticker"));
    }
    if !status.is_success() {
        return Err(PipelineError::data_unavailable(
            ticker,
            format!("provider HTTP {status}"),
        ));
    }

    let resp = parsed.map_err(|e| {
        PipelineError::data_unavailable(ticker, format!("malformed provider response: {e}"))
    })?;

    let result = resp
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| PipelineError::not_found(ticker, "provider returned no chart result"))?;

    Ok(result.into_bars(start, end))
}

#[async_trait::async_trait]
impl MarketDataProvider for YahooChartProvider {
    fn provider_name(&self) -> &'static str {
        "yahoo_chart"
    }

    async fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>> {
        let (period1, period2) = period_bounds(start, end);
        let t0 = std::time::Instant::now();

        let res = self
            .http
            .get(self.url(ticker))
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::data_unavailable(ticker, format!("request failed: {e}")))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            PipelineError::data_unavailable(ticker, format!("failed to read provider response: {e}"))
        })?;

        let bars = bars_from_response(ticker, status, &body, start, end)?;
        tracing::debug!(
            ticker,
            %start,
            %end,
            %status,
            bars = bars.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "chart fetch"
        );
        Ok(bars)
    }
}
