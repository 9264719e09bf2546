//! Product reference matcher.
//!
//! Resolves free-text product descriptions to catalog entries through an
//! ordered chain of strategies; the first strategy that yields a hit wins.
//! The index is immutable once built and shared behind an `Arc`; the
//! `ProductMatcher` owns the cache and rebuilds it on demand.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::normalizer::{normalize, NormalizeMode};
use super::similarity::{best_of_measures, partial_ratio, weighted_ratio};
use crate::config::MatcherConfig;
use crate::db::{Database, DbResult};
use crate::models::ProductCatalogEntry;

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ExactVariant,
    GroupFuzzy,
    GlobalFuzzy,
    CharacterSimilarity,
    Containment,
    NoisySubstring,
    /// First member of the input's core group; best effort, not a confident match
    GroupFallback,
}

impl MatchStrategy {
    pub fn is_confident(&self) -> bool {
        !matches!(self, MatchStrategy::GroupFallback)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::ExactVariant => "exact_variant",
            MatchStrategy::GroupFuzzy => "group_fuzzy",
            MatchStrategy::GlobalFuzzy => "global_fuzzy",
            MatchStrategy::CharacterSimilarity => "character_similarity",
            MatchStrategy::Containment => "containment",
            MatchStrategy::NoisySubstring => "noisy_substring",
            MatchStrategy::GroupFallback => "group_fallback",
        }
    }
}

/// A resolved catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductMatch {
    pub catalog_id: i64,
    pub unit_price: f64,
    /// Catalog display name
    pub name: String,
    /// Similarity score 0..=100
    pub score: u8,
    pub strategy: MatchStrategy,
}

/// Normalized forms of the input text.
#[derive(Debug, Clone)]
pub struct Query {
    pub core: String,
    pub variant: String,
    /// Variant with everything but `[a-z0-9]` removed
    pub stripped: String,
}

impl Query {
    pub fn new(text: &str) -> Self {
        let variant = normalize(text, NormalizeMode::Variant);
        Self {
            core: normalize(text, NormalizeMode::Core),
            stripped: strip_to_ascii_alnum(&variant),
            variant,
        }
    }
}

/// Strategy hit: index of the entry and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub entry: usize,
    pub score: u8,
}

/// Uniform strategy signature.
pub type Strategy = fn(&Query, &ProductIndex, &MatcherConfig) -> Option<Hit>;

/// The cascade, in precedence order.
pub const STRATEGIES: &[(MatchStrategy, Strategy)] = &[
    (MatchStrategy::ExactVariant, exact_variant),
    (MatchStrategy::GroupFuzzy, group_fuzzy),
    (MatchStrategy::GlobalFuzzy, global_fuzzy),
    (MatchStrategy::CharacterSimilarity, character_similarity),
    (MatchStrategy::Containment, containment),
    (MatchStrategy::NoisySubstring, noisy_substring),
    (MatchStrategy::GroupFallback, group_fallback),
];

#[derive(Debug, Clone)]
struct IndexedEntry {
    entry: ProductCatalogEntry,
    variant: String,
    stripped: String,
}

/// Catalog grouped by core name, variants within a group in catalog order.
#[derive(Debug, Clone)]
pub struct ProductIndex {
    entries: Vec<IndexedEntry>,
    groups: IndexMap<String, Vec<usize>>,
    config: MatcherConfig,
}

impl ProductIndex {
    /// Build from catalog entries. Entries whose core name is empty are skipped.
    pub fn build(catalog: &[ProductCatalogEntry], config: MatcherConfig) -> Self {
        let mut entries = Vec::with_capacity(catalog.len());
        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();

        for item in catalog {
            let core = normalize(&item.name, NormalizeMode::Core);
            if core.is_empty() {
                tracing::debug!(name = %item.name, "catalog entry has no core name, not indexed");
                continue;
            }
            let variant = normalize(&item.name, NormalizeMode::Variant);
            groups.entry(core).or_default().push(entries.len());
            entries.push(IndexedEntry {
                entry: item.clone(),
                stripped: strip_to_ascii_alnum(&variant),
                variant,
            });
        }

        let shared_groups = groups.values().filter(|g| g.len() > 1).count();
        tracing::debug!(
            entries = entries.len(),
            groups = groups.len(),
            shared_groups,
            "built product index"
        );

        Self { entries, groups, config }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry indices of a core group.
    pub fn group(&self, core: &str) -> Option<&[usize]> {
        self.groups.get(core).map(|g| g.as_slice())
    }

    /// Catalog entry by index.
    pub fn entry(&self, index: usize) -> Option<&ProductCatalogEntry> {
        self.entries.get(index).map(|e| &e.entry)
    }

    fn variant(&self, index: usize) -> &str {
        &self.entries[index].variant
    }

    /// Run the cascade. `None` means NOT_FOUND.
    pub fn resolve(&self, text: &str) -> Option<ProductMatch> {
        if self.entries.is_empty() {
            return None;
        }

        let query = Query::new(text);
        if query.core.is_empty() {
            return None;
        }

        for (strategy, run) in STRATEGIES {
            if let Some(hit) = run(&query, self, &self.config) {
                let entry = &self.entries[hit.entry].entry;
                if !strategy.is_confident() {
                    tracing::warn!(
                        target: "rx_revenue::anomaly",
                        kind = "best_effort_product_match",
                        input = %text,
                        matched = %entry.name,
                        catalog_id = entry.id,
                        "no strategy matched, defaulting to first product of the core group"
                    );
                } else {
                    tracing::debug!(
                        input = %text,
                        matched = %entry.name,
                        score = hit.score,
                        strategy = strategy.as_str(),
                        "product resolved"
                    );
                }
                return Some(ProductMatch {
                    catalog_id: entry.id,
                    unit_price: entry.unit_price,
                    name: entry.name.clone(),
                    score: hit.score,
                    strategy: *strategy,
                });
            }
        }

        None
    }
}

/// Exact variant inside the core group.
fn exact_variant(query: &Query, index: &ProductIndex, _config: &MatcherConfig) -> Option<Hit> {
    index
        .group(&query.core)?
        .iter()
        .find(|&&i| index.variant(i) == query.variant)
        .map(|&entry| Hit { entry, score: 100 })
}

/// Weighted fuzzy score inside the core group, high cut-off then low.
fn group_fuzzy(query: &Query, index: &ProductIndex, config: &MatcherConfig) -> Option<Hit> {
    let group = index.group(&query.core)?;
    let best = best_weighted(query, index, group.iter().copied())?;
    tiered(best, config.group_high, config.group_low, "group")
}

/// Weighted fuzzy score over the whole catalog; only when the input has no core group.
fn global_fuzzy(query: &Query, index: &ProductIndex, config: &MatcherConfig) -> Option<Hit> {
    if index.group(&query.core).is_some() {
        return None;
    }
    let best = best_weighted(query, index, 0..index.entries.len())?;
    tiered(best, config.global_high, config.global_low, "global")
}

/// Max of ratio, partial ratio and token-sort ratio over the whole catalog.
fn character_similarity(query: &Query, index: &ProductIndex, config: &MatcherConfig) -> Option<Hit> {
    let mut best: Option<Hit> = None;
    for (i, indexed) in index.entries.iter().enumerate() {
        let score = best_of_measures(&query.variant, &indexed.variant);
        if score >= config.character_threshold && best.map_or(true, |b| score > b.score) {
            best = Some(Hit { entry: i, score });
        }
    }
    best
}

/// One variant contains the other, covering enough of the shorter.
fn containment(query: &Query, index: &ProductIndex, config: &MatcherConfig) -> Option<Hit> {
    let input = &query.variant;
    let input_len = input.chars().count();
    if input_len < config.containment_min_len {
        return None;
    }

    index.entries.iter().enumerate().find_map(|(i, indexed)| {
        let variant = &indexed.variant;
        let variant_len = variant.chars().count();
        if variant_len < config.containment_min_len {
            return None;
        }
        let overlap = if variant.contains(input.as_str()) {
            input_len
        } else if input.contains(variant.as_str()) {
            variant_len
        } else {
            return None;
        };
        let min_len = input_len.min(variant_len);
        if (overlap as f64) < min_len as f64 * config.containment_coverage {
            return None;
        }
        let score = (overlap * 100 / input_len.max(variant_len)) as u8;
        Some(Hit { entry: i, score })
    })
}

/// Alphanumeric-only containment, longest overlap first; else partial ratio.
fn noisy_substring(query: &Query, index: &ProductIndex, config: &MatcherConfig) -> Option<Hit> {
    let input = &query.stripped;
    if input.len() < config.noisy_min_len {
        return None;
    }

    let mut longest: Option<(usize, usize)> = None;
    let mut fuzzy: Option<Hit> = None;

    for (i, indexed) in index.entries.iter().enumerate() {
        let variant = &indexed.stripped;
        if variant.len() < config.noisy_min_len {
            continue;
        }
        let overlap = if input.contains(variant.as_str()) {
            Some(variant.len())
        } else if variant.contains(input.as_str()) {
            Some(input.len())
        } else {
            None
        };

        match overlap {
            Some(len) => {
                if longest.map_or(true, |(_, best)| len > best) {
                    longest = Some((i, len));
                }
            }
            None => {
                let score = partial_ratio(variant, input);
                if score >= config.noisy_partial_threshold && fuzzy.map_or(true, |b| score > b.score) {
                    fuzzy = Some(Hit { entry: i, score });
                }
            }
        }
    }

    longest.map(|(entry, _)| Hit { entry, score: 100 }).or(fuzzy)
}

/// First member of the core group.
fn group_fallback(query: &Query, index: &ProductIndex, _config: &MatcherConfig) -> Option<Hit> {
    index
        .group(&query.core)?
        .first()
        .map(|&entry| Hit { entry, score: 0 })
}

fn best_weighted(query: &Query, index: &ProductIndex, candidates: impl Iterator<Item = usize>) -> Option<Hit> {
    let mut best: Option<Hit> = None;
    for i in candidates {
        let score = weighted_ratio(&query.variant, index.variant(i));
        if best.map_or(true, |b| score > b.score) {
            best = Some(Hit { entry: i, score });
        }
    }
    best
}

/// High-precision cut-off first, then the lower one.
fn tiered(best: Hit, high: u8, low: u8, scope: &'static str) -> Option<Hit> {
    if best.score >= high {
        tracing::trace!(scope, score = best.score, tier = "high", "fuzzy candidate accepted");
        Some(best)
    } else if best.score >= low {
        tracing::trace!(scope, score = best.score, tier = "low", "fuzzy candidate accepted");
        Some(best)
    } else {
        None
    }
}

fn strip_to_ascii_alnum(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit()).collect()
}

/// Owner of the cached product index.
#[derive(Debug)]
pub struct ProductMatcher {
    config: MatcherConfig,
    cache: RwLock<Option<Arc<ProductIndex>>>,
}

impl Default for ProductMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl ProductMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(None),
        }
    }

    /// Rebuild the index from the catalog table and cache it.
    pub fn rebuild(&self, db: &Database) -> DbResult<Arc<ProductIndex>> {
        let catalog = db.list_catalog_entries()?;
        Ok(self.install(&catalog))
    }

    /// Build the index from in-memory entries and cache it.
    pub fn install(&self, catalog: &[ProductCatalogEntry]) -> Arc<ProductIndex> {
        let index = Arc::new(ProductIndex::build(catalog, self.config.clone()));
        let mut slot = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::clone(&index));
        index
    }

    /// Drop the cached index; the next lookup rebuilds it.
    pub fn invalidate(&self) {
        let mut slot = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// The cached index, if any.
    pub fn current(&self) -> Option<Arc<ProductIndex>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The cached index, building it first if needed.
    pub fn index_or_build(&self, db: &Database) -> DbResult<Arc<ProductIndex>> {
        match self.current() {
            Some(index) => Ok(index),
            None => self.rebuild(db),
        }
    }

    /// Resolve one product text against the cached index.
    pub fn resolve(&self, db: &Database, text: &str) -> DbResult<Option<ProductMatch>> {
        Ok(self.index_or_build(db)?.resolve(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(names: &[(i64, &str, f64)]) -> ProductIndex {
        let catalog: Vec<ProductCatalogEntry> = names
            .iter()
            .map(|(id, name, price)| ProductCatalogEntry::new(*id, *name, *price))
            .collect();
        ProductIndex::build(&catalog, MatcherConfig::default())
    }

    #[test]
    fn test_exact_variant_after_normalization() {
        let idx = index(&[(3, "FLOK 10", 20.0), (7, "FLOK 20", 37.23)]);
        let m = idx.resolve("FLOK-20").unwrap();
        assert_eq!(m.catalog_id, 7);
        assert_eq!(m.unit_price, 37.23);
        assert_eq!(m.strategy, MatchStrategy::ExactVariant);
    }

    #[test]
    fn test_group_fuzzy_prefers_highest_score() {
        let idx = index(&[(1, "AZITHRAL 250", 60.0), (2, "AZITHRAL 500", 110.0)]);
        let m = idx.resolve("AZITHRAL 5000").unwrap();
        assert_eq!(m.catalog_id, 2);
        assert_eq!(m.strategy, MatchStrategy::GroupFuzzy);
        assert_eq!(m.score, 92);
    }

    #[test]
    fn test_global_fuzzy_when_no_group() {
        let idx = index(&[(4, "PANTOCID 40", 90.0), (5, "CROCIN 500", 15.0)]);
        let m = idx.resolve("PANTOCIDE 40").unwrap();
        assert_eq!(m.catalog_id, 4);
        assert_eq!(m.strategy, MatchStrategy::GlobalFuzzy);
    }

    #[test]
    fn test_group_fallback_is_not_confident() {
        let idx = index(&[(5, "CROCIN 500", 15.0)]);
        let m = idx.resolve("CROCIN 99999999999").unwrap();
        assert_eq!(m.catalog_id, 5);
        assert_eq!(m.strategy, MatchStrategy::GroupFallback);
        assert!(!m.strategy.is_confident());
    }

    #[test]
    fn test_not_found() {
        let idx = index(&[(5, "CROCIN 500", 15.0)]);
        assert!(idx.resolve("ZZZZ").is_none());
        assert!(idx.resolve("").is_none());
        assert!(idx.resolve("(123)").is_none());
    }

    #[test]
    fn test_empty_catalog_is_not_found() {
        let idx = index(&[]);
        assert!(idx.is_empty());
        assert!(idx.resolve("FLOK 20").is_none());
    }

    #[test]
    fn test_containment_strategy_directly() {
        let idx = index(&[(8, "Montair LC Kid", 120.0)]);
        let query = Query::new("Montair LC");
        let config = MatcherConfig::default();
        let hit = containment(&query, &idx, &config).unwrap();
        assert_eq!(hit.entry, 0);
        assert!(hit.score > 0);
    }

    #[test]
    fn test_noisy_substring_prefers_longest_overlap() {
        let idx = index(&[(1, "DQRIT", 10.0), (2, "DQRIT TAB", 12.0)]);
        let query = Query::new("SSDADQRITTAB 100X10");
        let hit = noisy_substring(&query, &idx, &MatcherConfig::default()).unwrap();
        assert_eq!(idx.entry(hit.entry).unwrap().id, 2);
    }

    #[test]
    fn test_matcher_cache_lifecycle() {
        let matcher = ProductMatcher::default();
        assert!(matcher.current().is_none());

        matcher.install(&[ProductCatalogEntry::new(7, "FLOK 20", 37.23)]);
        let cached = matcher.current().unwrap();
        assert_eq!(cached.len(), 1);

        matcher.invalidate();
        assert!(matcher.current().is_none());
    }

    #[test]
    fn test_matcher_rebuilds_from_database() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_catalog_entry(&ProductCatalogEntry::new(7, "FLOK 20", 37.23)).unwrap();

        let matcher = ProductMatcher::default();
        let m = matcher.resolve(&db, "flok 20").unwrap().unwrap();
        assert_eq!(m.catalog_id, 7);
        assert!(matcher.current().is_some());
    }
}
