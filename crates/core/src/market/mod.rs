pub mod types;
pub mod yahoo;

use crate::domain::price::PriceBar;
use crate::error::Result;
use chrono::NaiveDate;

/// Source of daily bars. `start` and `end` are inclusive; an empty vector
/// means the source knows the ticker but has no sessions in range.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>>;
}
