use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stockpulse_core::config::Settings;
use stockpulse_core::domain::contract::normalize_ticker;
use stockpulse_core::domain::price::PriceSeries;
use stockpulse_core::market::yahoo::YahooChartProvider;
use stockpulse_core::market::MarketDataProvider;
use stockpulse_core::storage::daily::upsert_daily_bars;
use stockpulse_core::storage::ingest_runs::{record_ingest_run, IngestRun, RunKind, RunStatus};
use stockpulse_core::time::us_market::MarketCalendar;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod csv_load;

const CSV_SOURCE: &str = "csv";
const DEFAULT_BACKFILL_DAYS: i64 = 365;

#[derive(Debug, Parser)]
#[command(name = "stockpulse_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load every *.csv / *.txt price file in a directory into `daily`.
    LoadCsv {
        #[arg(long)]
        dir: PathBuf,

        /// Parse and report without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Fetch one ticker from the HTTP provider and upsert it into `daily`.
    Backfill {
        #[arg(long)]
        ticker: String,

        /// First date (YYYY-MM-DD). Defaults to one year before `end`.
        #[arg(long)]
        start: Option<String>,

        /// Last date (YYYY-MM-DD). Defaults to the latest closed US session.
        #[arg(long)]
        end: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let res = match args.command {
        Command::LoadCsv { dir, dry_run } => load_csv(&settings, &dir, dry_run).await,
        Command::Backfill {
            ticker,
            start,
            end,
            dry_run,
        } => backfill(&settings, &ticker, start.as_deref(), end.as_deref(), dry_run).await,
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker run failed");
    }
    res
}

async fn connect_db(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;
    stockpulse_core::storage::migrate(&pool).await?;
    Ok(pool)
}

async fn load_csv(settings: &Settings, dir: &std::path::Path, dry_run: bool) -> anyhow::Result<()> {
    let started_at = Utc::now();
    let files = csv_load::price_files(dir)?;
    anyhow::ensure!(!files.is_empty(), "no price files found in {}", dir.display());

    let parsed = csv_load::parse_files(&files)?;
    tracing::info!(
        files = files.len(),
        tickers = parsed.bars.len(),
        rows = parsed.rows(),
        skipped = parsed.skipped,
        dry_run,
        "price files parsed"
    );
    if dry_run {
        return Ok(());
    }

    let pool = connect_db(settings).await?;

    let mut written: u64 = 0;
    let mut failed_tickers: Vec<String> = Vec::new();
    for (ticker, bars) in &parsed.bars {
        match upsert_daily_bars(&pool, ticker, bars, CSV_SOURCE, settings.daily_upsert_batch).await {
            Ok(n) => written += n,
            Err(err) => {
                tracing::warn!(ticker = %ticker, error = %format!("{err:#}"), "ticker load failed");
                failed_tickers.push(ticker.clone());
            }
        }
    }

    let skipped = parsed.skipped
        + parsed
            .bars
            .iter()
            .filter(|(t, _)| failed_tickers.contains(t))
            .map(|(_, b)| b.len() as u64)
            .sum::<u64>();
    let status = RunStatus::from_counts(written, skipped);
    let error = (!failed_tickers.is_empty()).then(|| format!("failed tickers: {}", failed_tickers.join(",")));

    let run_id = record_ingest_run(
        &pool,
        &IngestRun {
            kind: RunKind::LoadCsv,
            source: CSV_SOURCE,
            ticker: None,
            started_at,
            status,
            rows_written: written,
            rows_skipped: skipped,
            error: error.as_deref(),
            details: Some(serde_json::json!({
                "dir": dir.display().to_string(),
                "files": files.len(),
                "tickers": parsed.bars.len(),
            })),
        },
    )
    .await?;

    tracing::info!(%run_id, status = status.as_str(), written, skipped, "csv load finished");
    Ok(())
}

fn parse_date_arg(name: &str, value: Option<&str>) -> anyhow::Result<Option<NaiveDate>> {
    value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .with_context(|| format!("--{name} must be YYYY-MM-DD"))
}

async fn backfill(
    settings: &Settings,
    ticker: &str,
    start: Option<&str>,
    end: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let started_at = Utc::now();
    let ticker = normalize_ticker(ticker)?;
    let calendar = MarketCalendar::from_env();

    let end = match parse_date_arg("end", end)? {
        Some(d) => d,
        None => calendar.resolve_as_of_date(None, started_at)?,
    };
    let start = parse_date_arg("start", start)?.unwrap_or(end - Duration::days(DEFAULT_BACKFILL_DAYS));
    anyhow::ensure!(start <= end, "--start {start} is after --end {end}");

    let provider = YahooChartProvider::from_settings(settings)?;
    let fetched = provider
        .fetch(&ticker, start, end)
        .await
        .and_then(|bars| PriceSeries::new(&ticker, bars));

    let pool = if dry_run { None } else { Some(connect_db(settings).await?) };

    let series = match fetched {
        Ok(series) => series,
        Err(err) => {
            if let Some(pool) = &pool {
                let msg = err.to_string();
                record_ingest_run(
                    pool,
                    &IngestRun {
                        kind: RunKind::Backfill,
                        source: provider.provider_name(),
                        ticker: Some(&ticker),
                        started_at,
                        status: RunStatus::Failed,
                        rows_written: 0,
                        rows_skipped: 0,
                        error: Some(&msg),
                        details: Some(serde_json::json!({"start": start, "end": end})),
                    },
                )
                .await?;
            }
            return Err(anyhow::Error::new(err).context(format!("backfill {ticker} failed")));
        }
    };

    tracing::info!(%ticker, %start, %end, bars = series.len(), dry_run, "bars fetched");
    let Some(pool) = pool else {
        return Ok(());
    };

    let written = upsert_daily_bars(
        &pool,
        &ticker,
        series.bars(),
        provider.provider_name(),
        settings.daily_upsert_batch,
    )
    .await?;

    let run_id = record_ingest_run(
        &pool,
        &IngestRun {
            kind: RunKind::Backfill,
            source: provider.provider_name(),
            ticker: Some(&ticker),
            started_at,
            status: RunStatus::Success,
            rows_written: written,
            rows_skipped: 0,
            error: None,
            details: Some(serde_json::json!({"start": start, "end": end})),
        },
    )
    .await?;

    tracing::info!(%run_id, %ticker, written, "backfill finished");
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let args = Args::try_parse_from([
            "stockpulse_worker",
            "backfill",
            "--ticker",
            "aapl",
            "--start",
            "2024-01-01",
            "--dry-run",
        ])
        .unwrap();
        match args.command {
            Command::Backfill {
                ticker,
                start,
                end,
                dry_run,
            } => {
                assert_eq!(ticker, "aapl");
                assert_eq!(start.as_deref(), Some("2024-01-01"));
                assert!(end.is_none());
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = Args::try_parse_from(["stockpulse_worker", "load-csv", "--dir", "/tmp/prices"]).unwrap();
        assert!(matches!(args.command, Command::LoadCsv { dry_run: false, .. }));
    }

    #[test]
    fn rejects_bad_date_args() {
        assert!(parse_date_arg("start", Some("01/02/2024")).is_err());
        assert_eq!(parse_date_arg("end", None).unwrap(), None);
    }
}
