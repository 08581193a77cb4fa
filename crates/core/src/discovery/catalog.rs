use crate::discovery::matches_criteria;
use crate::domain::discovery::{BrowseCriteria, TickerMetadata};
use anyhow::Context;
use std::collections::HashSet;
use std::path::Path;

const EMBEDDED_CATALOG: &str = include_str!("../../data/catalog.json");

/// Read-only source of ticker metadata.
pub trait MetadataCatalog: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Entries passing the structured part of `criteria` (sector, industry,
    /// bucket, price range). Free-text matching is left to the caller.
    fn lookup(&self, criteria: &BrowseCriteria) -> anyhow::Result<Vec<TickerMetadata>>;
}

#[derive(Debug, Clone)]
pub struct StaticCatalog {
    entries: Vec<TickerMetadata>,
}

impl StaticCatalog {
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_json(EMBEDDED_CATALOG).context("embedded catalog is invalid")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid catalog file {}", path.display()))
    }

    /// Uses `path` when given, the embedded catalog otherwise.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_path(Path::new(p)),
            None => Self::embedded(),
        }
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let entries: Vec<TickerMetadata> =
            serde_json::from_str(text).context("catalog is not a JSON array of ticker metadata")?;
        Self::new(entries)
    }

    pub fn new(entries: Vec<TickerMetadata>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(entries.len());
        for mut e in entries {
            e.symbol = e.symbol.trim().to_ascii_uppercase();
            anyhow::ensure!(!e.symbol.is_empty(), "catalog symbol must be non-empty");
            anyhow::ensure!(!e.name.trim().is_empty(), "catalog name must be non-empty ({})", e.symbol);
            anyhow::ensure!(
                e.market_cap.is_finite() && e.market_cap >= 0.0,
                "catalog market_cap must be >= 0 ({})",
                e.symbol
            );
            anyhow::ensure!(
                e.price.is_finite() && e.price >= 0.0,
                "catalog price must be >= 0 ({})",
                e.symbol
            );
            anyhow::ensure!(seen.insert(e.symbol.clone()), "duplicate catalog symbol {}", e.symbol);
            out.push(e);
        }
        Ok(Self { entries: out })
    }

    pub fn entries(&self) -> &[TickerMetadata] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetadataCatalog for StaticCatalog {
    fn source_name(&self) -> &'static str {
        "static"
    }

    fn lookup(&self, criteria: &BrowseCriteria) -> anyhow::Result<Vec<TickerMetadata>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| matches_criteria(e, criteria))
            .cloned()
            .collect())
    }
}
