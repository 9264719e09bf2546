//! Per-run lookup structures.
//!
//! Built once from the full master-record and split-rule sets, then shared
//! read-only by every row of a run:
//! - `MasterIndex`: (identity, exact key) and (identity, catalog id) → masters
//! - `RuleBook`: split rule selection, including the prefix/suffix tie-break

use std::collections::{HashMap, HashSet};

use crate::models::{LookupKey, MasterRecord, SplitRule};
use crate::resolver::{IdentityCode, ProductIndex};

/// Master records keyed two ways.
#[derive(Debug, Default)]
pub struct MasterIndex {
    records: HashMap<i64, MasterRecord>,
    by_exact: HashMap<(IdentityCode, String), Vec<i64>>,
    by_catalog: HashMap<(IdentityCode, i64), Vec<i64>>,
}

impl MasterIndex {
    /// Index masters, in the order given.
    ///
    /// A master without a stored catalog id is keyed by the resolution of its
    /// product name; names are resolved once each.
    pub fn build(masters: Vec<MasterRecord>, products: &ProductIndex) -> Self {
        let mut index = Self::default();
        let mut resolved: HashMap<String, Option<i64>> = HashMap::new();

        for master in masters {
            let id = master.id;
            let identity = master.identity_code.clone();

            if !master.product_key.is_empty() {
                index
                    .by_exact
                    .entry((identity.clone(), master.product_key.clone()))
                    .or_default()
                    .push(id);
            }

            let catalog_id = match master.catalog_product_id {
                Some(catalog_id) => Some(catalog_id),
                None => *resolved
                    .entry(master.product_name.clone())
                    .or_insert_with(|| products.resolve(&master.product_name).map(|m| m.catalog_id)),
            };
            if let Some(catalog_id) = catalog_id {
                index.by_catalog.entry((identity, catalog_id)).or_default().push(id);
            }

            index.records.insert(id, master);
        }

        tracing::debug!(
            masters = index.records.len(),
            exact_keys = index.by_exact.len(),
            catalog_keys = index.by_catalog.len(),
            "built master index"
        );
        index
    }

    pub fn get(&self, id: i64) -> Option<&MasterRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Candidate masters for a key, oldest first.
    pub fn candidates(&self, identity: &IdentityCode, key: &LookupKey) -> Vec<&MasterRecord> {
        let ids = match key {
            LookupKey::Exact(product_key) => self.by_exact.get(&(identity.clone(), product_key.clone())),
            LookupKey::CatalogId(catalog_id) => self.by_catalog.get(&(identity.clone(), *catalog_id)),
        };
        ids.map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }
}

/// Split rules by key and by pharmacy.
#[derive(Debug, Default)]
pub struct RuleBook {
    rules: Vec<SplitRule>,
    by_key: HashMap<(IdentityCode, LookupKey), usize>,
    by_identity: HashMap<IdentityCode, Vec<usize>>,
}

impl RuleBook {
    pub fn new(rules: Vec<SplitRule>) -> Self {
        let mut book = Self::default();
        for (i, rule) in rules.iter().enumerate() {
            book.by_key
                .insert((rule.identity_code.clone(), rule.lookup_key.clone()), i);
            book.by_identity
                .entry(rule.identity_code.clone())
                .or_default()
                .push(i);
        }
        book.rules = rules;
        book
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule stored under exactly this key.
    pub fn get(&self, identity: &IdentityCode, key: &LookupKey) -> Option<&SplitRule> {
        self.by_key
            .get(&(identity.clone(), key.clone()))
            .map(|&i| &self.rules[i])
    }

    /// Pick the rule for a multi-candidate row.
    ///
    /// Order: the key that produced the candidates, then the other key, then
    /// any exact-keyed rule of the pharmacy whose product key is a prefix or
    /// suffix of the row's (or extends it) and whose masters intersect the
    /// candidates.
    pub fn select(
        &self,
        identity: &IdentityCode,
        primary: &LookupKey,
        alternate: Option<&LookupKey>,
        row_product_key: &str,
        candidate_ids: &[i64],
    ) -> Option<&SplitRule> {
        if let Some(rule) = self.get(identity, primary) {
            return Some(rule);
        }
        if let Some(rule) = alternate.and_then(|key| self.get(identity, key)) {
            return Some(rule);
        }
        if row_product_key.is_empty() {
            return None;
        }

        let candidates: HashSet<i64> = candidate_ids.iter().copied().collect();
        self.by_identity
            .get(identity)?
            .iter()
            .map(|&i| &self.rules[i])
            .find(|rule| match &rule.lookup_key {
                LookupKey::Exact(rule_key) => {
                    !rule_key.is_empty()
                        && keys_related(rule_key, row_product_key)
                        && rule.master_ids().any(|id| candidates.contains(&id))
                }
                LookupKey::CatalogId(_) => false,
            })
    }
}

/// Cosmetic pack-size differences: one key starts the other, or the rule key ends the row key.
fn keys_related(rule_key: &str, row_key: &str) -> bool {
    row_key.starts_with(rule_key) || rule_key.starts_with(row_key) || row_key.ends_with(rule_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::models::{ProductCatalogEntry, SplitShare};

    fn code(raw: &str) -> IdentityCode {
        IdentityCode::parse(raw).unwrap()
    }

    fn master(id: i64, identity: &str, product: &str, doctor: &str) -> MasterRecord {
        let mut m = MasterRecord::new(code(identity), product, doctor, 10.0);
        m.id = id;
        m
    }

    fn rule(id: i64, identity: &str, key: LookupKey, masters: &[i64]) -> SplitRule {
        let pct = 100.0 / masters.len() as f64;
        SplitRule {
            id,
            identity_code: code(identity),
            lookup_key: key,
            shares: masters
                .iter()
                .map(|&m| SplitShare {
                    master_record_id: m,
                    percentage: pct,
                })
                .collect(),
            updated_by: None,
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_exact_and_catalog_candidates() {
        let products = ProductIndex::build(
            &[ProductCatalogEntry::new(3, "BRETHNOL SYP", 45.0)],
            MatcherConfig::default(),
        );
        let index = MasterIndex::build(
            vec![
                master(1, "PHARMA", "BRETHNOL SYP 100ML", "A"),
                master(2, "PHARMA", "Brethnol Syp", "B"),
                master(3, "OTHER", "BRETHNOL SYP", "C"),
            ],
            &products,
        );

        let exact = index.candidates(&code("PHARMA"), &LookupKey::Exact("BRETHNOLSYP".into()));
        assert_eq!(exact.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);

        let by_catalog = index.candidates(&code("PHARMA"), &LookupKey::CatalogId(3));
        assert_eq!(by_catalog.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);

        assert!(index
            .candidates(&code("PHARMA"), &LookupKey::Exact("DOLO".into()))
            .is_empty());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_stored_catalog_id_wins() {
        let products = ProductIndex::build(&[], MatcherConfig::default());
        let mut m = master(1, "PHARMA", "Something else", "A");
        m.catalog_product_id = Some(9);
        let index = MasterIndex::build(vec![m], &products);

        assert_eq!(index.candidates(&code("PHARMA"), &LookupKey::CatalogId(9)).len(), 1);
    }

    #[test]
    fn test_rule_selection_order() {
        let book = RuleBook::new(vec![
            rule(1, "PHARMA", LookupKey::Exact("DOLO650".into()), &[1, 2]),
            rule(2, "PHARMA", LookupKey::CatalogId(5), &[1, 2]),
        ]);
        let identity = code("PHARMA");

        let picked = book.select(&identity, &LookupKey::CatalogId(5), None, "DOLO650", &[1, 2]);
        assert_eq!(picked.map(|r| r.id), Some(2));

        let picked = book.select(
            &identity,
            &LookupKey::CatalogId(6),
            Some(&LookupKey::Exact("DOLO650".into())),
            "DOLO650",
            &[1, 2],
        );
        assert_eq!(picked.map(|r| r.id), Some(1));
    }

    #[test]
    fn test_tie_break_requires_related_key_and_shared_masters() {
        let book = RuleBook::new(vec![rule(
            1,
            "PHARMA",
            LookupKey::Exact("BRETHNOLSYP".into()),
            &[1, 2],
        )]);
        let identity = code("PHARMA");
        let primary = LookupKey::CatalogId(3);

        let picked = book.select(&identity, &primary, None, "BRETHNOLSYP100MLPACK", &[1, 2]);
        assert_eq!(picked.map(|r| r.id), Some(1));

        assert!(book.select(&identity, &primary, None, "BRETHNOLSYP100MLPACK", &[7, 8]).is_none());
        assert!(book.select(&identity, &primary, None, "ASTHALIN", &[1, 2]).is_none());
        assert!(book.select(&code("ELSEWHERE"), &primary, None, "BRETHNOLSYP", &[1, 2]).is_none());
    }

    #[test]
    fn test_keys_related() {
        assert!(keys_related("BRETHNOLSYP", "BRETHNOLSYP100ML"));
        assert!(keys_related("BRETHNOLSYP100ML", "BRETHNOLSYP"));
        assert!(keys_related("SYP", "BRETHNOLSYP"));
        assert!(!keys_related("DOLO", "CROCIN"));
    }
}
