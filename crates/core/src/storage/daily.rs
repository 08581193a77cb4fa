use crate::domain::price::PriceBar;
use crate::error::{PipelineError, Result};
use crate::market::MarketDataProvider;
use anyhow::Context;
use chrono::NaiveDate;

/// Writes `bars` for one ticker in batches of `batch_size`, all in one
/// transaction. Existing `(ticker, date)` rows are overwritten.
pub async fn upsert_daily_bars(
    pool: &sqlx::PgPool,
    ticker: &str,
    bars: &[PriceBar],
    source: &str,
    batch_size: usize,
) -> anyhow::Result<u64> {
    anyhow::ensure!(batch_size >= 1, "batch_size must be >= 1");
    anyhow::ensure!(!ticker.trim().is_empty(), "ticker must be non-empty");
    if bars.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut affected: u64 = 0;
    for (batch_idx, chunk) in bars.chunks(batch_size).enumerate() {
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO daily (ticker, date, open, high, low, close, volume, source) ",
        );
        qb.push_values(chunk, |mut b, bar| {
            b.push_bind(ticker)
                .push_bind(bar.date)
                .push_bind(bar.open)
                .push_bind(bar.high)
                .push_bind(bar.low)
                .push_bind(bar.close)
                .push_bind(bar.volume)
                .push_bind(source);
        });
        qb.push(
            " ON CONFLICT (ticker, date) DO UPDATE \
               SET open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                   close = EXCLUDED.close, volume = EXCLUDED.volume, source = EXCLUDED.source, \
                   updated_at = now()",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("batch upsert daily failed for {ticker}"))?;
        affected += res.rows_affected();

        tracing::debug!(
            ticker,
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "daily batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

/// Serves history from the `daily` table filled by the worker.
#[derive(Debug, Clone)]
pub struct PgDailyStore {
    pool: sqlx::PgPool,
}

impl PgDailyStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn select_range(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<PriceBar>> {
        let rows = sqlx::query_as::<_, (NaiveDate, f64, f64, f64, f64, f64)>(
            "SELECT date, open, high, low, close, volume \
             FROM daily \
             WHERE ticker = $1 AND date BETWEEN $2 AND $3 \
             ORDER BY date ASC",
        )
        .persistent(false)
        .bind(ticker)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("select daily failed")?;

        Ok(rows
            .into_iter()
            .map(|(date, open, high, low, close, volume)| PriceBar {
                date,
                open,
                high,
                low,
                close,
                volume,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for PgDailyStore {
    fn provider_name(&self) -> &'static str {
        "postgres_daily"
    }

    async fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>> {
        self.select_range(ticker, start, end)
            .await
            .map_err(|e| PipelineError::data_unavailable(ticker, format!("{e:#}")))
    }
}
