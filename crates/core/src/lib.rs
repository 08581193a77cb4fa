pub mod discovery;
pub mod domain;
pub mod error;
pub mod features;
pub mod forecast;
pub mod market;
pub mod service;
pub mod signals;
pub mod storage;
pub mod telemetry;
pub mod time;

pub mod config {
    use anyhow::Context;
    use std::str::FromStr;

    pub const DEFAULT_DATA_PROVIDER_BASE_URL: &str = "https://query1.finance.yahoo.com";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_PORT: u16 = 8000;
    const DEFAULT_UPSERT_BATCH: usize = 200;

    /// Where the pipeline reads daily bars from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum MarketDataSource {
        #[default]
        Yahoo,
        Database,
    }

    impl FromStr for MarketDataSource {
        type Err = anyhow::Error;

        fn from_str(s: &str) -> anyhow::Result<Self> {
            match s.trim().to_ascii_lowercase().as_str() {
                "yahoo" | "http" => Ok(Self::Yahoo),
                "database" | "db" | "postgres" => Ok(Self::Database),
                other => anyhow::bail!("unknown MARKET_DATA_SOURCE: {other} (expected yahoo|database)"),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub port: u16,
        pub market_data_source: MarketDataSource,
        pub data_provider_base_url: String,
        pub data_provider_timeout_secs: u64,
        pub catalog_path: Option<String>,
        pub model_seed: u64,
        pub daily_upsert_batch: usize,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                database_url: None,
                sentry_dsn: None,
                port: DEFAULT_PORT,
                market_data_source: MarketDataSource::default(),
                data_provider_base_url: DEFAULT_DATA_PROVIDER_BASE_URL.to_string(),
                data_provider_timeout_secs: DEFAULT_TIMEOUT_SECS,
                catalog_path: None,
                model_seed: crate::forecast::DEFAULT_SEED,
                daily_upsert_batch: DEFAULT_UPSERT_BATCH,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let defaults = Self::default();

            let market_data_source = match non_empty_var("MARKET_DATA_SOURCE") {
                Some(s) => s.parse()?,
                None => defaults.market_data_source,
            };

            let daily_upsert_batch =
                parsed_var("DAILY_UPSERT_BATCH")?.unwrap_or(defaults.daily_upsert_batch);
            anyhow::ensure!(daily_upsert_batch >= 1, "DAILY_UPSERT_BATCH must be >= 1");

            let data_provider_timeout_secs = parsed_var("DATA_PROVIDER_TIMEOUT_SECS")?
                .unwrap_or(defaults.data_provider_timeout_secs);
            anyhow::ensure!(
                data_provider_timeout_secs >= 1,
                "DATA_PROVIDER_TIMEOUT_SECS must be >= 1"
            );

            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                port: parsed_var("PORT")?.unwrap_or(defaults.port),
                market_data_source,
                data_provider_base_url: non_empty_var("DATA_PROVIDER_BASE_URL")
                    .unwrap_or(defaults.data_provider_base_url),
                data_provider_timeout_secs,
                catalog_path: non_empty_var("CATALOG_PATH"),
                model_seed: parsed_var("MODEL_SEED")?.unwrap_or(defaults.model_seed),
                daily_upsert_batch,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn data_provider_timeout(&self) -> std::time::Duration {
            std::time::Duration::from_secs(self.data_provider_timeout_secs)
        }
    }

    fn non_empty_var(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|s| !s.trim().is_empty())
    }

    fn parsed_var<T>(name: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        non_empty_var(name)
            .map(|s| s.trim().parse::<T>())
            .transpose()
            .with_context(|| format!("{name} is not valid"))
    }

}
