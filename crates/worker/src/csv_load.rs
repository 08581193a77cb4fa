use anyhow::Context;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use stockpulse_core::domain::contract::normalize_ticker;
use stockpulse_core::domain::price::PriceBar;

const DAILY_PERIOD: &str = "D";

/// Bars grouped per ticker, plus how many rows were dropped.
#[derive(Debug, Default)]
pub struct ParsedPrices {
    pub bars: BTreeMap<String, Vec<PriceBar>>,
    pub skipped: u64,
}

impl ParsedPrices {
    pub fn rows(&self) -> usize {
        self.bars.values().map(Vec::len).sum()
    }

    /// Later files win on overlapping dates.
    fn merge(&mut self, other: ParsedPrices) {
        for (ticker, bars) in other.bars {
            let merged = self.bars.entry(ticker).or_default();
            let mut combined = std::mem::take(merged);
            combined.extend(bars);
            *merged = latest_per_date(combined);
        }
        self.skipped += other.skipped;
    }
}

/// `*.csv` and `*.txt` files directly under `dir`, sorted by name.
pub fn price_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir {} failed", dir.display()))? {
        let path = entry?.path();
        let is_price_file = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("txt"));
        if path.is_file() && is_price_file {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub fn parse_file(path: &Path) -> anyhow::Result<ParsedPrices> {
    let file = std::fs::File::open(path).with_context(|| format!("open {} failed", path.display()))?;
    parse_prices(file).with_context(|| format!("parse {} failed", path.display()))
}

pub fn parse_files(paths: &[PathBuf]) -> anyhow::Result<ParsedPrices> {
    let mut out = ParsedPrices::default();
    for path in paths {
        out.merge(parse_file(path)?);
    }
    Ok(out)
}

/// Reads `ticker,per,date,time,open,high,low,close,vol` rows. Headers may be
/// written as `<TICKER>` etc. Rows that are not daily or do not parse are
/// skipped with a warning; a missing column fails the whole file.
pub fn parse_prices<R: Read>(reader: R) -> anyhow::Result<ParsedPrices> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .context("missing header row")?
        .iter()
        .map(|h| h.trim_matches(|c| c == '<' || c == '>').to_ascii_lowercase())
        .collect();
    let col = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("missing column {name}"))
    };
    let cols = Columns {
        ticker: col("ticker")?,
        per: col("per").ok(),
        date: col("date")?,
        open: col("open")?,
        high: col("high")?,
        low: col("low")?,
        close: col("close")?,
        vol: col("vol").ok(),
    };

    let mut out = ParsedPrices::default();
    for (line, record) in rdr.records().enumerate() {
        let parsed = record
            .map_err(anyhow::Error::from)
            .and_then(|r| cols.parse(&r));
        match parsed {
            Ok(Some((ticker, bar))) => out.bars.entry(ticker).or_default().push(bar),
            Ok(None) => {}
            Err(err) => {
                out.skipped += 1;
                tracing::warn!(line = line + 2, error = %err, "skipping price row");
            }
        }
    }

    for bars in out.bars.values_mut() {
        *bars = latest_per_date(std::mem::take(bars));
    }
    Ok(out)
}

/// Sorted by date with one bar per date; the last one pushed wins.
fn latest_per_date(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
    bars.reverse();
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}

struct Columns {
    ticker: usize,
    per: Option<usize>,
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    vol: Option<usize>,
}

impl Columns {
    /// `Ok(None)` for rows of another period (intraday files share the layout).
    fn parse(&self, r: &csv::StringRecord) -> anyhow::Result<Option<(String, PriceBar)>> {
        let field = |i: usize| r.get(i).context("row is too short");

        if let Some(per) = self.per {
            if !field(per)?.eq_ignore_ascii_case(DAILY_PERIOD) {
                return Ok(None);
            }
        }

        let ticker = normalize_ticker(strip_exchange_suffix(field(self.ticker)?))?;
        let date = parse_date(field(self.date)?)?;
        let num = |i: usize| -> anyhow::Result<f64> {
            let s = field(i)?;
            s.parse::<f64>().with_context(|| format!("bad number {s:?}"))
        };

        let close = num(self.close)?;
        anyhow::ensure!(close.is_finite() && close > 0.0, "non-positive close {close}");

        let volume = match self.vol {
            Some(i) => parse_volume(field(i)?)?,
            None => 0.0,
        };

        Ok(Some((
            ticker,
            PriceBar {
                date,
                open: num(self.open)?,
                high: num(self.high)?,
                low: num(self.low)?,
                close,
                volume,
            },
        )))
    }
}

/// `AAPL.US` -> `AAPL`. Class suffixes such as `BRK.B` are kept.
fn strip_exchange_suffix(raw: &str) -> &str {
    match raw.rsplit_once('.') {
        Some((head, "US" | "us")) => head,
        _ => raw,
    }
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .with_context(|| format!("bad date {s:?}"))
}

/// Volumes may carry thousands separators ("1,234,567") or be blank.
fn parse_volume(s: &str) -> anyhow::Result<f64> {
    let cleaned: String = s.chars().filter(|c| *c != ',' && *c != '_').collect();
    if cleaned.is_empty() {
        return Ok(0.0);
    }
    cleaned
        .parse::<f64>()
        .with_context(|| format!("bad volume {s:?}"))
}
