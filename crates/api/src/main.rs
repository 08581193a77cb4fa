use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use stockpulse_core::config::{MarketDataSource, Settings};
use stockpulse_core::discovery::catalog::StaticCatalog;
use stockpulse_core::market::yahoo::YahooChartProvider;
use stockpulse_core::market::MarketDataProvider;
use stockpulse_core::service::{DiscoveryService, StockService};
use stockpulse_core::storage::daily::PgDailyStore;
use stockpulse_core::time::us_market::MarketCalendar;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod error;
mod routes;

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

    let catalog = StaticCatalog::load(settings.catalog_path.as_deref())?;
    tracing::info!(entries = catalog.len(), "ticker catalog loaded");
    let discovery = Arc::new(DiscoveryService::new(Arc::new(catalog)));

    let stocks = match build_provider(&settings).await {
        Ok(provider) => {
            tracing::info!(provider = provider.provider_name(), "price source ready");
            Some(Arc::new(StockService::new(
                provider,
                MarketCalendar::from_env(),
                settings.data_provider_timeout(),
                settings.model_seed,
            )))
        }
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "price source unavailable; starting API in degraded mode");
            None
        }
    };

    let app = routes::router(routes::AppState {
        stocks,
        discovery,
        as_of: None,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn build_provider(settings: &Settings) -> anyhow::Result<Arc<dyn MarketDataProvider>> {
    match settings.market_data_source {
        MarketDataSource::Yahoo => Ok(Arc::new(YahooChartProvider::from_settings(settings)?)),
        MarketDataSource::Database => {
            let pool = connect_db(settings).await?;
            Ok(Arc::new(PgDailyStore::new(pool)))
        }
    }
}

async fn connect_db(settings: &Settings) -> anyhow::Result<PgPool> {
    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("db connect failed")?;
    stockpulse_core::storage::migrate(&pool).await?;
    Ok(pool)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
