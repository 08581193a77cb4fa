//! Request-level operations shared by the HTTP API and the worker. Each
//! operation validates its inputs, performs at most one bounded data fetch and
//! then runs the pure pipeline stages inline.

use crate::discovery::{self, catalog::MetadataCatalog};
use crate::domain::contract::{normalize_ticker, PredictParams};
use crate::domain::discovery::{
    BrowseCriteria, Exchange, IndustryInfo, Page, SearchSuggestion, SectorInfo, TickerMetadata,
};
use crate::domain::forecast::Forecast;
use crate::domain::price::PriceSeries;
use crate::domain::recommendation::Recommendation;
use crate::error::{PipelineError, Result};
use crate::forecast::{forecast, ForecastParams};
use crate::market::MarketDataProvider;
use crate::signals;
use crate::telemetry::{OtelMetrics, PipelineMetrics};
use crate::time::us_market::MarketCalendar;
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Calendar days fetched for a recommendation; comfortably more than the 50
/// trading days the long average needs.
pub const RECOMMENDATION_CALENDAR_DAYS: i64 = 120;

// Extra calendar days on top of lookback * 3/2 to cover long holiday runs.
const LOOKBACK_SLACK_DAYS: i64 = 14;

/// Calendar range to fetch so that roughly `lookback` trading days come back.
pub fn lookback_calendar_days(lookback: usize) -> i64 {
    (lookback as i64 * 3 + 1) / 2 + LOOKBACK_SLACK_DAYS
}

pub struct StockService {
    provider: Arc<dyn MarketDataProvider>,
    calendar: MarketCalendar,
    fetch_timeout: std::time::Duration,
    seed: u64,
    metrics: Arc<dyn PipelineMetrics>,
}

impl StockService {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        calendar: MarketCalendar,
        fetch_timeout: std::time::Duration,
        seed: u64,
    ) -> Self {
        Self {
            provider,
            calendar,
            fetch_timeout,
            seed,
            metrics: Arc::new(OtelMetrics::from_global()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Fetches `[start, end]` and wraps it in a validated series. An empty
    /// range is reported as not found.
    async fn load_series(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries> {
        let t0 = Instant::now();
        let fetched = tokio::time::timeout(self.fetch_timeout, self.provider.fetch(ticker, start, end))
            .await
            .unwrap_or_else(|_| {
                Err(PipelineError::data_unavailable(
                    ticker,
                    format!("provider timed out after {}s", self.fetch_timeout.as_secs()),
                ))
            });
        self.metrics.provider_request(
            self.provider.provider_name(),
            ticker,
            fetched.is_ok(),
            t0.elapsed(),
        );
        let bars = fetched?;

        tracing::info!(
            provider = self.provider.provider_name(),
            bars = bars.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "fetch done"
        );

        if bars.is_empty() {
            return Err(PipelineError::not_found(
                ticker,
                format!("no price data between {start} and {end}"),
            ));
        }
        PriceSeries::new(ticker, bars)
    }

    pub async fn get_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries> {
        let ticker = normalize_ticker(ticker)?;
        if start > end {
            return Err(PipelineError::invalid(format!(
                "start_date {start} is after end_date {end}"
            )));
        }

        let span = tracing::info_span!("get_history", ticker = %ticker, %start, %end);
        self.load_series(&ticker, start, end).instrument(span).await
    }

    /// Forecasts `params.horizon` trading days past the last bar on or before `as_of`.
    pub async fn predict(&self, ticker: &str, params: PredictParams, as_of: NaiveDate) -> Result<Forecast> {
        let ticker = normalize_ticker(ticker)?;
        let span = tracing::info_span!(
            "predict",
            ticker = %ticker,
            horizon = params.horizon,
            lookback = params.lookback
        );

        let t0 = Instant::now();
        let out = async {
            let start = as_of - Duration::days(lookback_calendar_days(params.lookback));
            let series = self.load_series(&ticker, start, as_of).await?;

            let forecast_params = ForecastParams::new(params.horizon, params.lookback, self.seed);
            let t_model = Instant::now();
            let out = forecast(&series, &forecast_params, &self.calendar);
            match &out {
                Ok(fc) => tracing::info!(
                    points = fc.points.len(),
                    confidence = fc.confidence,
                    model_ms = t_model.elapsed().as_millis(),
                    elapsed_ms = t0.elapsed().as_millis(),
                    "forecast done"
                ),
                Err(err) => tracing::warn!(kind = err.kind(), error = %err, "forecast failed"),
            }
            out
        }
        .instrument(span)
        .await;

        self.metrics.prediction(
            &ticker,
            params.horizon,
            out.as_ref().ok().map(|fc| fc.confidence),
            t0.elapsed(),
        );
        out
    }

    pub async fn recommend(&self, ticker: &str, as_of: NaiveDate) -> Result<Recommendation> {
        let ticker = normalize_ticker(ticker)?;
        let span = tracing::info_span!("recommend", ticker = %ticker);

        let t0 = Instant::now();
        let out = async {
            let start = as_of - Duration::days(RECOMMENDATION_CALENDAR_DAYS);
            let series = self.load_series(&ticker, start, as_of).await?;
            let rec = signals::recommend(&series)?;
            tracing::info!(
                category = ?rec.category,
                confidence = rec.confidence,
                elapsed_ms = t0.elapsed().as_millis(),
                "recommendation done"
            );
            Ok::<_, PipelineError>(rec)
        }
        .instrument(span)
        .await;

        self.metrics.recommendation(
            &ticker,
            out.as_ref().ok().map(|rec| rec.category),
            t0.elapsed(),
        );
        out
    }
}

pub struct DiscoveryService {
    catalog: Arc<dyn MetadataCatalog>,
}

impl DiscoveryService {
    pub fn new(catalog: Arc<dyn MetadataCatalog>) -> Self {
        Self { catalog }
    }

    fn entries(&self, criteria: &BrowseCriteria) -> Result<Vec<TickerMetadata>> {
        self.catalog.lookup(criteria).map_err(|e| {
            tracing::error!(source = self.catalog.source_name(), error = %e, "catalog lookup failed");
            PipelineError::data_unavailable("catalog", format!("{e:#}"))
        })
    }

    /// Ranked search, optionally restricted to one listing venue.
    pub fn search(&self, query: &str, exchange: Option<Exchange>, limit: usize) -> Result<Vec<TickerMetadata>> {
        let entries = self.entries(&BrowseCriteria {
            exchange,
            ..Default::default()
        })?;
        discovery::search(&entries, query, limit)
    }

    pub fn suggest(&self, query: &str, limit: usize) -> Result<Vec<SearchSuggestion>> {
        let entries = self.entries(&BrowseCriteria::default())?;
        discovery::suggest(&entries, query, limit)
    }

    pub fn browse(&self, criteria: &BrowseCriteria, offset: usize, limit: usize) -> Result<Page<TickerMetadata>> {
        criteria.validate()?;
        let entries = self.entries(criteria)?;
        discovery::browse(&entries, criteria, offset, limit)
    }

    pub fn sectors(&self) -> Result<Vec<SectorInfo>> {
        let entries = self.entries(&BrowseCriteria::default())?;
        Ok(discovery::sectors(&entries))
    }

    pub fn industries(&self, sector: Option<&str>) -> Result<Vec<IndustryInfo>> {
        let entries = self.entries(&BrowseCriteria::default())?;
        Ok(discovery::industries(&entries, sector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::catalog::StaticCatalog;
    use crate::domain::price::PriceBar;
    use crate::domain::recommendation::Category;
    use crate::telemetry::testing::RecordingMetrics;

    /// Serves a fixed ramp of trading-day bars ending 2024-06-28.
    struct RampProvider {
        bars: Vec<PriceBar>,
    }

    impl RampProvider {
        fn new(n: usize) -> Self {
            let cal = MarketCalendar::default();
            let first = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
            let mut dates = cal.next_trading_days(first, 400);
            let end = NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
            dates.retain(|d| *d <= end);
            let dates = &dates[dates.len() - n..];
            let bars = dates
                .iter()
                .enumerate()
                .map(|(i, &date)| {
                    let c = 100.0 + i as f64 * 0.5 + (i as f64 * 0.7).sin() * 2.0;
                    PriceBar {
                        date,
                        open: c,
                        high: c + 1.0,
                        low: c - 1.0,
                        close: c,
                        volume: 1_000_000.0 + i as f64,
                    }
                })
                .collect();
            Self { bars }
        }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for RampProvider {
        fn provider_name(&self) -> &'static str {
            "ramp"
        }

        async fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>> {
            if ticker != "RAMP" {
                return Err(PipelineError::not_found(ticker, "unknown ticker"));
            }
            Ok(self
                .bars
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .cloned()
                .collect())
        }
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl MarketDataProvider for SlowProvider {
        fn provider_name(&self) -> &'static str {
            "slow"
        }

        async fn fetch(&self, _: &str, _: NaiveDate, _: NaiveDate) -> Result<Vec<PriceBar>> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn service(provider: Arc<dyn MarketDataProvider>) -> StockService {
        StockService::new(
            provider,
            MarketCalendar::default(),
            std::time::Duration::from_millis(200),
            42,
        )
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
    }

    #[test]
    fn lookback_range_has_slack() {
        assert_eq!(lookback_calendar_days(90), 149);
        assert_eq!(lookback_calendar_days(1), 16);
    }

    #[tokio::test]
    async fn history_normalizes_ticker_and_clips_range() {
        let svc = service(Arc::new(RampProvider::new(250)));
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let series = svc.get_history(" ramp ", start, as_of()).await.unwrap();
        assert_eq!(series.ticker(), "RAMP");
        assert!(series.bars().iter().all(|b| b.date >= start && b.date <= as_of()));
        assert!(!series.is_empty());
    }

    #[tokio::test]
    async fn history_rejects_inverted_range() {
        let svc = service(Arc::new(RampProvider::new(250)));
        let start = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let err = svc.get_history("RAMP", start, as_of()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn empty_range_is_not_found() {
        let svc = service(Arc::new(RampProvider::new(250)));
        let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2030, 2, 1).unwrap();
        let err = svc.get_history("RAMP", start, end).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn slow_provider_times_out_as_unavailable() {
        let svc = service(Arc::new(SlowProvider));
        let err = svc.recommend("RAMP", as_of()).await.unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { not_found: false, .. }));
    }

    #[tokio::test]
    async fn predict_returns_requested_horizon() {
        let svc = service(Arc::new(RampProvider::new(250)));
        let params = PredictParams {
            horizon: 5,
            lookback: 90,
        };
        let fc = svc.predict("RAMP", params, as_of()).await.unwrap();
        assert_eq!(fc.points.len(), 5);
        assert_eq!(fc.generated_for, as_of());
        assert!(fc.points.iter().all(|p| p.date > as_of()));
    }

    #[tokio::test]
    async fn recommend_uses_enough_history() {
        let svc = service(Arc::new(RampProvider::new(250)));
        let rec = svc.recommend("ramp", as_of()).await.unwrap();
        assert_eq!(rec.ticker, "RAMP");
        assert_eq!(rec.as_of_date, as_of());
        assert!((0.0..=1.0).contains(&rec.confidence));
        assert!(matches!(rec.category, Category::Buy | Category::Hold | Category::Sell));
    }

    #[tokio::test]
    async fn short_history_is_insufficient_for_recommendation() {
        let svc = service(Arc::new(RampProvider::new(20)));
        let err = svc.recommend("RAMP", as_of()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientHistory {
                required: 50,
                available: 20
            }
        ));
    }

    #[tokio::test]
    async fn fetches_and_requests_are_recorded() {
        let metrics = Arc::new(RecordingMetrics::default());
        let svc = service(Arc::new(RampProvider::new(250))).with_metrics(metrics.clone());

        svc.recommend("RAMP", as_of()).await.unwrap();
        let params = PredictParams {
            horizon: 3,
            lookback: 90,
        };
        svc.predict("RAMP", params, as_of()).await.unwrap();
        svc.get_history("NOPE", as_of(), as_of()).await.unwrap_err();

        let calls = metrics.provider_calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("RAMP".to_string(), true),
                ("RAMP".to_string(), true),
                ("NOPE".to_string(), false),
            ]
        );

        let recs = metrics.recommendations.lock().unwrap();
        assert_eq!(recs.len(), 1);
        assert!(recs[0].1.is_some());

        let preds = metrics.predictions.lock().unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].1, 3);
        assert!(preds[0].2.is_some());
    }

    #[tokio::test]
    async fn timeouts_and_failed_recommendations_are_recorded() {
        let metrics = Arc::new(RecordingMetrics::default());
        let svc = service(Arc::new(SlowProvider)).with_metrics(metrics.clone());

        svc.recommend("RAMP", as_of()).await.unwrap_err();

        assert_eq!(
            *metrics.provider_calls.lock().unwrap(),
            vec![("RAMP".to_string(), false)]
        );
        assert_eq!(
            *metrics.recommendations.lock().unwrap(),
            vec![("RAMP".to_string(), None)]
        );
    }

    #[test]
    fn discovery_over_embedded_catalog() {
        let catalog = StaticCatalog::embedded().unwrap();
        let size = catalog.len();
        let svc = DiscoveryService::new(Arc::new(catalog));

        let hits = svc.search("aapl", None, 5).unwrap();
        assert_eq!(hits[0].symbol, "AAPL");

        let nyse = svc.search("a", Some(Exchange::Nyse), 100).unwrap();
        assert!(!nyse.is_empty());
        assert!(nyse.iter().all(|e| e.exchange.as_deref() == Some("NYSE")));

        let total: usize = svc.sectors().unwrap().iter().map(|s| s.stock_count).sum();
        assert_eq!(total, size);

        let page = svc.browse(&BrowseCriteria::default(), 0, 10).unwrap();
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.total, size);
    }
}
