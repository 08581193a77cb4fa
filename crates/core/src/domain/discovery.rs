use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMetadata {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub market_cap: f64,
    pub price: f64,
    #[serde(default)]
    pub exchange: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Ticker,
    Name,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSuggestion {
    pub symbol: String,
    pub name: String,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorInfo {
    pub name: String,
    pub stock_count: usize,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryInfo {
    pub name: String,
    pub sector: String,
    pub stock_count: usize,
    pub description: String,
}

const BILLION: f64 = 1.0e9;

/// Market capitalisation buckets. Lower bounds are inclusive, upper bounds exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketCapBucket {
    LargeCap,
    MidCap,
    SmallCap,
    MicroCap,
}

impl MarketCapBucket {
    pub const ALL: [MarketCapBucket; 4] = [
        MarketCapBucket::LargeCap,
        MarketCapBucket::MidCap,
        MarketCapBucket::SmallCap,
        MarketCapBucket::MicroCap,
    ];

    pub fn bounds(self) -> (f64, Option<f64>) {
        match self {
            Self::LargeCap => (10.0 * BILLION, None),
            Self::MidCap => (2.0 * BILLION, Some(10.0 * BILLION)),
            Self::SmallCap => (0.3 * BILLION, Some(2.0 * BILLION)),
            Self::MicroCap => (0.0, Some(0.3 * BILLION)),
        }
    }

    pub fn of(market_cap: f64) -> Self {
        Self::ALL
            .into_iter()
            .find(|b| b.contains(market_cap))
            .unwrap_or(Self::MicroCap)
    }

    pub fn contains(self, market_cap: f64) -> bool {
        let (lo, hi) = self.bounds();
        market_cap >= lo && hi.map_or(true, |hi| market_cap < hi)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LargeCap => "large-cap",
            Self::MidCap => "mid-cap",
            Self::SmallCap => "small-cap",
            Self::MicroCap => "micro-cap",
        }
    }
}

impl FromStr for MarketCapBucket {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                PipelineError::invalid(format!(
                    "unknown market cap category '{s}', expected one of: large-cap, mid-cap, small-cap, micro-cap"
                ))
            })
    }
}

/// US listing venues the catalog knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nyse,
    Nasdaq,
    Amex,
}

impl Exchange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nyse => "NYSE",
            Self::Nasdaq => "NASDAQ",
            Self::Amex => "AMEX",
        }
    }

    /// Whether a catalog `exchange` value names this venue.
    pub fn lists(self, exchange: Option<&str>) -> bool {
        exchange.is_some_and(|e| e.trim().eq_ignore_ascii_case(self.as_str()))
    }
}

impl FromStr for Exchange {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NYSE" => Ok(Self::Nyse),
            "NASDAQ" => Ok(Self::Nasdaq),
            "AMEX" => Ok(Self::Amex),
            _ => Err(PipelineError::invalid(format!(
                "unknown market '{s}', expected one of: NYSE, NASDAQ, AMEX"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Largest first.
    #[default]
    MarketCap,
    /// Most expensive first.
    Price,
    Symbol,
    Name,
}

impl FromStr for SortKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market_cap" | "market-cap" => Ok(Self::MarketCap),
            "price" => Ok(Self::Price),
            "symbol" => Ok(Self::Symbol),
            "name" => Ok(Self::Name),
            other => Err(PipelineError::invalid(format!("unknown sort key '{other}'"))),
        }
    }
}

/// Filter criteria for browsing the catalog. Every field is optional; an
/// empty criteria matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseCriteria {
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<MarketCapBucket>,
    pub exchange: Option<Exchange>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub query: Option<String>,
    pub sort: SortKey,
}

impl BrowseCriteria {
    pub fn validate(&self) -> Result<()> {
        for (label, v) in [("min_price", self.min_price), ("max_price", self.max_price)] {
            if let Some(v) = v {
                if !v.is_finite() || v < 0.0 {
                    return Err(PipelineError::invalid(format!("{label} must be >= 0 (got {v})")));
                }
            }
        }
        if let (Some(lo), Some(hi)) = (self.min_price, self.max_price) {
            if lo > hi {
                return Err(PipelineError::invalid(
                    "min_price cannot be greater than max_price",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_half_open() {
        assert_eq!(MarketCapBucket::of(10.0 * BILLION), MarketCapBucket::LargeCap);
        assert_eq!(MarketCapBucket::of(9.99 * BILLION), MarketCapBucket::MidCap);
        assert_eq!(MarketCapBucket::of(2.0 * BILLION), MarketCapBucket::MidCap);
        assert_eq!(MarketCapBucket::of(0.3 * BILLION), MarketCapBucket::SmallCap);
        assert_eq!(MarketCapBucket::of(1.0e6), MarketCapBucket::MicroCap);
    }

    #[test]
    fn parses_bucket_names() {
        assert_eq!("Mid-Cap".parse::<MarketCapBucket>().unwrap(), MarketCapBucket::MidCap);
        assert!("giant-cap".parse::<MarketCapBucket>().is_err());
    }

    #[test]
    fn parses_exchange_names() {
        assert_eq!(" nasdaq ".parse::<Exchange>().unwrap(), Exchange::Nasdaq);
        assert!(matches!("LSE".parse::<Exchange>(), Err(PipelineError::InvalidRequest(_))));
        assert!(Exchange::Nyse.lists(Some("nyse")));
        assert!(!Exchange::Nyse.lists(None));
    }

    #[test]
    fn rejects_inverted_price_range() {
        let criteria = BrowseCriteria {
            min_price: Some(50.0),
            max_price: Some(10.0),
            ..Default::default()
        };
        assert!(matches!(
            criteria.validate(),
            Err(PipelineError::InvalidRequest(_))
        ));
    }
}
