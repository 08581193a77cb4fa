//! Search, suggestion and browse over ticker metadata. Nothing here touches
//! the price pipeline.

pub mod catalog;

use crate::domain::discovery::{
    BrowseCriteria, IndustryInfo, MatchType, Page, SearchSuggestion, SectorInfo, SortKey,
    TickerMetadata,
};
use crate::error::{PipelineError, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const MAX_PAGE_LIMIT: usize = 500;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Match quality, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    ExactSymbol,
    SymbolPrefix,
    NamePrefix,
    SymbolSubstring,
    NameSubstring,
}

impl MatchRank {
    pub fn match_type(self) -> MatchType {
        match self {
            Self::ExactSymbol | Self::SymbolPrefix | Self::SymbolSubstring => MatchType::Ticker,
            Self::NamePrefix | Self::NameSubstring => MatchType::Name,
        }
    }
}

/// Case-insensitive rank of `entry` against an upper-cased query, if it matches.
pub fn match_rank(entry: &TickerMetadata, query_upper: &str) -> Option<MatchRank> {
    let symbol = entry.symbol.to_uppercase();
    let name = entry.name.to_uppercase();

    if symbol == query_upper {
        Some(MatchRank::ExactSymbol)
    } else if symbol.starts_with(query_upper) {
        Some(MatchRank::SymbolPrefix)
    } else if name.starts_with(query_upper) {
        Some(MatchRank::NamePrefix)
    } else if symbol.contains(query_upper) {
        Some(MatchRank::SymbolSubstring)
    } else if name.contains(query_upper) {
        Some(MatchRank::NameSubstring)
    } else {
        None
    }
}

fn normalized_query(query: &str) -> Result<String> {
    let q = query.trim();
    if q.is_empty() {
        return Err(PipelineError::invalid(
            "query must be at least 1 character long",
        ));
    }
    Ok(q.to_uppercase())
}

fn check_limit(limit: usize, max: usize) -> Result<()> {
    if limit == 0 || limit > max {
        return Err(PipelineError::invalid(format!(
            "limit must be between 1 and {max} (got {limit})"
        )));
    }
    Ok(())
}

fn compare_by(key: SortKey, a: &TickerMetadata, b: &TickerMetadata) -> Ordering {
    let primary = match key {
        SortKey::MarketCap => b.market_cap.total_cmp(&a.market_cap),
        SortKey::Price => b.price.total_cmp(&a.price),
        SortKey::Symbol => a.symbol.cmp(&b.symbol),
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    };
    primary.then_with(|| a.symbol.cmp(&b.symbol))
}

fn ranked<'a>(
    entries: &'a [TickerMetadata],
    query_upper: &str,
) -> Vec<(MatchRank, &'a TickerMetadata)> {
    let mut out: Vec<_> = entries
        .iter()
        .filter_map(|e| match_rank(e, query_upper).map(|r| (r, e)))
        .collect();
    out.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| compare_by(SortKey::MarketCap, a, b)));
    out
}

/// Ranked free-text search: exact symbol, then prefixes, then substrings.
pub fn search(entries: &[TickerMetadata], query: &str, limit: usize) -> Result<Vec<TickerMetadata>> {
    check_limit(limit, MAX_SEARCH_LIMIT)?;
    let q = normalized_query(query)?;
    Ok(ranked(entries, &q)
        .into_iter()
        .take(limit)
        .map(|(_, e)| e.clone())
        .collect())
}

/// Autocomplete suggestions. An empty query yields no suggestions.
pub fn suggest(entries: &[TickerMetadata], query: &str, limit: usize) -> Result<Vec<SearchSuggestion>> {
    check_limit(limit, MAX_SEARCH_LIMIT)?;
    let Ok(q) = normalized_query(query) else {
        return Ok(Vec::new());
    };
    Ok(ranked(entries, &q)
        .into_iter()
        .take(limit)
        .map(|(rank, e)| SearchSuggestion {
            symbol: e.symbol.clone(),
            name: e.name.clone(),
            match_type: rank.match_type(),
        })
        .collect())
}

pub fn matches_criteria(entry: &TickerMetadata, criteria: &BrowseCriteria) -> bool {
    if let Some(sector) = &criteria.sector {
        if !entry.sector.eq_ignore_ascii_case(sector.trim()) {
            return false;
        }
    }
    if let Some(industry) = &criteria.industry {
        if !entry.industry.eq_ignore_ascii_case(industry.trim()) {
            return false;
        }
    }
    if let Some(bucket) = criteria.market_cap {
        if !bucket.contains(entry.market_cap) {
            return false;
        }
    }
    if criteria
        .exchange
        .is_some_and(|x| !x.lists(entry.exchange.as_deref()))
    {
        return false;
    }
    if criteria.min_price.is_some_and(|lo| entry.price < lo) {
        return false;
    }
    if criteria.max_price.is_some_and(|hi| entry.price > hi) {
        return false;
    }
    true
}

/// Filters, sorts and paginates. `total` counts every match, not just the page.
pub fn browse(
    entries: &[TickerMetadata],
    criteria: &BrowseCriteria,
    offset: usize,
    limit: usize,
) -> Result<Page<TickerMetadata>> {
    check_limit(limit, MAX_PAGE_LIMIT)?;
    criteria.validate()?;

    let query = match criteria.query.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => Some(q.to_uppercase()),
        _ => None,
    };

    let mut matched: Vec<(Option<MatchRank>, &TickerMetadata)> = Vec::new();
    for entry in entries.iter().filter(|e| matches_criteria(e, criteria)) {
        match &query {
            Some(q) => {
                if let Some(rank) = match_rank(entry, q) {
                    matched.push((Some(rank), entry));
                }
            }
            None => matched.push((None, entry)),
        }
    }

    matched.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| compare_by(criteria.sort, a, b)));

    let total = matched.len();
    let items = matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(_, e)| e.clone())
        .collect();

    Ok(Page {
        items,
        total,
        offset,
        limit,
    })
}

pub fn sectors(entries: &[TickerMetadata]) -> Vec<SectorInfo> {
    let mut counts = BTreeMap::<&str, usize>::new();
    for e in entries {
        *counts.entry(e.sector.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(name, stock_count)| SectorInfo {
            name: name.to_string(),
            stock_count,
            description: format!("Companies in the {} sector", name.to_lowercase()),
        })
        .collect()
}

pub fn industries(entries: &[TickerMetadata], sector: Option<&str>) -> Vec<IndustryInfo> {
    let mut counts = BTreeMap::<(&str, &str), usize>::new();
    for e in entries {
        if sector.is_some_and(|s| !e.sector.eq_ignore_ascii_case(s.trim())) {
            continue;
        }
        *counts
            .entry((e.sector.as_str(), e.industry.as_str()))
            .or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((sector, name), stock_count)| IndustryInfo {
            name: name.to_string(),
            sector: sector.to_string(),
            stock_count,
            description: format!("Companies in {name}"),
        })
        .collect()
}
