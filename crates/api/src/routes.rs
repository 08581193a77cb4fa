use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use stockpulse_core::domain::contract::{HistoryRequest, PredictRequest};
use stockpulse_core::domain::discovery::{
    BrowseCriteria, Exchange, IndustryInfo, MarketCapBucket, Page, SearchSuggestion, SectorInfo, SortKey,
    TickerMetadata,
};
use stockpulse_core::domain::forecast::Forecast;
use stockpulse_core::domain::price::PriceBar;
use stockpulse_core::domain::recommendation::Recommendation;
use stockpulse_core::error::PipelineError;
use stockpulse_core::service::{DiscoveryService, StockService};
use stockpulse_core::time::us_market::today_et;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

#[derive(Clone)]
pub struct AppState {
    /// `None` when the price source failed to initialise (degraded mode).
    pub stocks: Option<Arc<StockService>>,
    pub discovery: Arc<DiscoveryService>,
    /// Pins "today" instead of reading the clock.
    pub as_of: Option<NaiveDate>,
}

impl AppState {
    fn today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| {
            let now = Utc::now();
            today_et(now).unwrap_or_else(|_| now.date_naive())
        })
    }

    fn stocks(&self) -> ApiResult<&StockService> {
        self.stocks
            .as_deref()
            .ok_or_else(|| ApiError::Unavailable("price data source is not configured".to_string()))
    }
}

pub fn router(state: AppState) -> Router {
    let stocks = Router::new()
        .route("/:ticker", get(get_history))
        .route("/:ticker/predict", post(predict))
        .route("/:ticker/recommendation", get(recommendation));

    let discovery = Router::new()
        .route("/search", get(search))
        .route("/search/suggestions", get(suggestions))
        .route("/browse", get(browse))
        .route("/browse/sectors", get(sectors))
        .route("/browse/sectors/:sector", get(sector_stocks))
        .route("/browse/industries", get(industries))
        .route("/browse/industries/:industry", get(industry_stocks))
        .route("/browse/market-cap/:category", get(market_cap_stocks))
        .route("/browse/price-range", get(price_range_stocks));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/stocks", stocks)
        .nest("/api/discovery", discovery)
        .with_state(state)
        .layer(middleware::from_fn(process_time))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn process_time(req: Request, next: Next) -> Response {
    let t0 = Instant::now();
    let mut res = next.run(req).await;
    if let Ok(v) = HeaderValue::from_str(&format!("{:.6}", t0.elapsed().as_secs_f64())) {
        res.headers_mut().insert(PROCESS_TIME_HEADER, v);
    }
    res
}

async fn healthz() -> &'static str {
    "ok"
}

fn bounded_limit(limit: Option<usize>, default: usize, max: usize) -> ApiResult<usize> {
    let limit = limit.unwrap_or(default);
    if limit == 0 || limit > max {
        return Err(PipelineError::invalid(format!("limit must be between 1 and {max} (got {limit})")).into());
    }
    Ok(limit)
}

/// Listing endpoints answer 404 rather than an empty array.
fn found<T>(items: Vec<T>, what: impl FnOnce() -> String) -> ApiResult<Json<Vec<T>>> {
    if items.is_empty() {
        return Err(ApiError::NoMatches(what()));
    }
    Ok(Json(items))
}

fn parse_market(market: Option<&str>) -> Result<Option<Exchange>, PipelineError> {
    market.map(str::parse::<Exchange>).transpose()
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    ticker: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    count: usize,
    bars: Vec<PriceBar>,
}

async fn get_history(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    query: Result<Query<HistoryRequest>, QueryRejection>,
) -> ApiResult<Json<HistoryResponse>> {
    let Query(req) = query?;
    let (start, end) = req.validate_and_into_range(state.today())?;
    let series = state.stocks()?.get_history(&ticker, start, end).await?;

    Ok(Json(HistoryResponse {
        ticker: series.ticker().to_string(),
        start_date: start,
        end_date: end,
        count: series.len(),
        bars: series.into_bars(),
    }))
}

async fn predict(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<Json<Forecast>> {
    let Json(req) = body?;
    let params = req.validate_and_into_params()?;
    let forecast = state
        .stocks()?
        .predict(&ticker, params, state.today())
        .await?;
    Ok(Json(forecast))
}

async fn recommendation(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> ApiResult<Json<Recommendation>> {
    let rec = state.stocks()?.recommend(&ticker, state.today()).await?;
    Ok(Json(rec))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
    limit: Option<usize>,
    market: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Vec<TickerMetadata>>> {
    let Query(p) = params?;
    let limit = bounded_limit(p.limit, 20, 100)?;
    let market = parse_market(p.market.as_deref())?;
    let query = p.query.unwrap_or_default();
    let hits = state.discovery.search(&query, market, limit)?;
    found(hits, || format!("no stocks found matching '{}'", query.trim()))
}

async fn suggestions(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Vec<SearchSuggestion>>> {
    let Query(p) = params?;
    let limit = bounded_limit(p.limit, 10, 20)?;
    let query = p.query.unwrap_or_default();
    Ok(Json(state.discovery.suggest(&query, limit)?))
}

#[derive(Debug, Deserialize)]
struct BrowseParams {
    sector: Option<String>,
    industry: Option<String>,
    market_cap: Option<String>,
    market: Option<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    query: Option<String>,
    sort: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

impl BrowseParams {
    fn into_criteria(self) -> Result<BrowseCriteria, PipelineError> {
        Ok(BrowseCriteria {
            sector: self.sector,
            industry: self.industry,
            market_cap: self.market_cap.as_deref().map(str::parse::<MarketCapBucket>).transpose()?,
            exchange: parse_market(self.market.as_deref())?,
            min_price: self.min_price,
            max_price: self.max_price,
            query: self.query,
            sort: self
                .sort
                .as_deref()
                .map(str::parse::<SortKey>)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

async fn browse(
    State(state): State<AppState>,
    params: Result<Query<BrowseParams>, QueryRejection>,
) -> ApiResult<Json<Page<TickerMetadata>>> {
    let Query(p) = params?;
    let limit = bounded_limit(p.limit, 50, 500)?;
    let offset = p.offset.unwrap_or(0);
    let criteria = p.into_criteria()?;
    Ok(Json(state.discovery.browse(&criteria, offset, limit)?))
}

async fn sectors(State(state): State<AppState>) -> ApiResult<Json<Vec<SectorInfo>>> {
    Ok(Json(state.discovery.sectors()?))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct IndustriesParams {
    sector: Option<String>,
}

async fn industries(
    State(state): State<AppState>,
    params: Result<Query<IndustriesParams>, QueryRejection>,
) -> ApiResult<Json<Vec<IndustryInfo>>> {
    let Query(p) = params?;
    Ok(Json(state.discovery.industries(p.sector.as_deref())?))
}

fn browse_items(
    state: &AppState,
    criteria: BrowseCriteria,
    limit: usize,
    what: impl FnOnce() -> String,
) -> ApiResult<Json<Vec<TickerMetadata>>> {
    found(state.discovery.browse(&criteria, 0, limit)?.items, what)
}

async fn sector_stocks(
    State(state): State<AppState>,
    Path(sector): Path<String>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Json<Vec<TickerMetadata>>> {
    let Query(p) = params?;
    let limit = bounded_limit(p.limit, 50, 200)?;
    let criteria = BrowseCriteria {
        sector: Some(sector.clone()),
        ..Default::default()
    };
    browse_items(&state, criteria, limit, || format!("no stocks found in sector '{sector}'"))
}

async fn industry_stocks(
    State(state): State<AppState>,
    Path(industry): Path<String>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Json<Vec<TickerMetadata>>> {
    let Query(p) = params?;
    let limit = bounded_limit(p.limit, 50, 200)?;
    let criteria = BrowseCriteria {
        industry: Some(industry.clone()),
        ..Default::default()
    };
    browse_items(&state, criteria, limit, || format!("no stocks found in industry '{industry}'"))
}

async fn market_cap_stocks(
    State(state): State<AppState>,
    Path(category): Path<String>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Json<Vec<TickerMetadata>>> {
    let Query(p) = params?;
    let limit = bounded_limit(p.limit, 100, 500)?;
    let bucket: MarketCapBucket = category.parse()?;
    let criteria = BrowseCriteria {
        market_cap: Some(bucket),
        ..Default::default()
    };
    browse_items(&state, criteria, limit, || {
        format!("no stocks found in the {} category", bucket.as_str())
    })
}

#[derive(Debug, Deserialize)]
struct PriceRangeParams {
    min_price: Option<f64>,
    max_price: Option<f64>,
    limit: Option<usize>,
}

async fn price_range_stocks(
    State(state): State<AppState>,
    params: Result<Query<PriceRangeParams>, QueryRejection>,
) -> ApiResult<Json<Vec<TickerMetadata>>> {
    let Query(p) = params?;
    let limit = bounded_limit(p.limit, 100, 500)?;
    let (lo, hi) = (p.min_price.unwrap_or(0.0), p.max_price.unwrap_or(1000.0));
    let criteria = BrowseCriteria {
        min_price: Some(lo),
        max_price: Some(hi),
        sort: SortKey::Price,
        ..Default::default()
    };
    browse_items(&state, criteria, limit, || {
        format!("no stocks found between ${lo:.2} and ${hi:.2}")
    })
}
