//! Attribution of one persisted source row against a run's indices.
//!
//! Shared by reconciliation, retroactive reapplication and rule revert, so a
//! row is always allocated the same way whichever path re-derives it.

use std::sync::Arc;

use super::allocator::allocate;
use super::index::{MasterIndex, RuleBook};
use crate::config::EngineConfig;
use crate::db::{Database, DbResult};
use crate::models::{
    row_revenue, AllocationPolicy, AttributedResult, LookupKey, MasterRecord, SourceRow, SplitRule, SplitShare,
};
use crate::resolver::{IdentityCode, ProductIndex, ProductMatcher};

/// Immutable lookup data for one run. `Sync`, shared by planning threads.
#[derive(Debug)]
pub struct PlanContext {
    pub products: Arc<ProductIndex>,
    pub masters: MasterIndex,
    pub rules: RuleBook,
}

/// Results derived for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub policy: AllocationPolicy,
    pub split_rule_id: Option<i64>,
    pub results: Vec<AttributedResult>,
    /// Rule shares dropped because their master no longer exists
    pub shares_skipped: u64,
}

impl PlanContext {
    /// Load the catalog index, every master record and every split rule.
    pub fn load(db: &Database, matcher: &ProductMatcher, config: &EngineConfig) -> DbResult<Self> {
        let products = if config.rebuild_index_each_run {
            matcher.rebuild(db)?
        } else {
            matcher.index_or_build(db)?
        };
        let masters = MasterIndex::build(db.list_master_records()?, &products);
        let rules = RuleBook::new(db.list_split_rules()?);

        tracing::debug!(
            products = products.len(),
            masters = masters.len(),
            rules = rules.len(),
            "plan context loaded"
        );
        Ok(Self {
            products,
            masters,
            rules,
        })
    }

    /// Candidates of a row under its stored lookup key.
    pub fn candidates_for(&self, row: &SourceRow) -> Vec<&MasterRecord> {
        match (row.identity.code(), &row.lookup_key) {
            (Some(identity), Some(key)) => self.masters.candidates(identity, key),
            _ => Vec::new(),
        }
    }

    /// Rule that would allocate this row, if any.
    pub fn rule_for(&self, row: &SourceRow) -> Option<&SplitRule> {
        let identity = row.identity.code()?;
        let key = row.lookup_key.as_ref()?;
        let candidates = self.masters.candidates(identity, key);
        if candidates.len() < 2 {
            return None;
        }
        let ids: Vec<i64> = candidates.iter().map(|m| m.id).collect();
        self.rules
            .select(identity, key, alternate_key(row, key).as_ref(), &row.product_key, &ids)
    }

    /// Allocate a matched row. `None` when the row has no candidates left.
    ///
    /// Order: split rule (≥2 candidates), manual pin, single candidate, first
    /// candidate without a rule.
    pub fn attribute(&self, row: &SourceRow) -> Option<Attribution> {
        let identity = row.identity.code()?;
        let key = row.lookup_key.as_ref()?;
        let candidates = self.masters.candidates(identity, key);
        let mut shares_skipped = 0;

        if let (Some(rule), Some(first)) = (self.rule_for(row), candidates.first()) {
            let base_revenue = row_revenue(row.quantity, row.amount, first.unit_price);
            let (present, skipped) = self.present_shares(rule, row);
            shares_skipped = skipped;

            if !present.is_empty() {
                let results = allocate(row.quantity, base_revenue, &present)
                    .into_iter()
                    .filter_map(|a| {
                        let master = self.masters.get(a.master_record_id)?;
                        Some(build_result(
                            row,
                            identity,
                            master,
                            a.quantity,
                            a.revenue,
                            AllocationPolicy::SplitRule,
                            Some(rule.id),
                            Some(a.percentage),
                        ))
                    })
                    .collect();
                return Some(Attribution {
                    policy: AllocationPolicy::SplitRule,
                    split_rule_id: Some(rule.id),
                    results,
                    shares_skipped,
                });
            }
        }

        if let Some(pinned) = row.manual_master_id.and_then(|id| self.masters.get(id)) {
            return Some(single(row, identity, pinned, AllocationPolicy::Manual, shares_skipped));
        }

        match candidates.as_slice() {
            [] => None,
            [only] => Some(single(row, identity, only, AllocationPolicy::Single, shares_skipped)),
            [first, rest @ ..] => {
                tracing::warn!(
                    target: "rx_revenue::anomaly",
                    kind = "first_candidate_no_rule",
                    row_key = %row.row_key,
                    identity = %identity,
                    lookup_key = %key.to_storage(),
                    candidates = rest.len() + 1,
                    master_record_id = first.id,
                    "several master records match and no split rule applies, attributing to the first"
                );
                Some(single(
                    row,
                    identity,
                    first,
                    AllocationPolicy::FirstCandidateNoRule,
                    shares_skipped,
                ))
            }
        }
    }

    fn present_shares(&self, rule: &SplitRule, row: &SourceRow) -> (Vec<SplitShare>, u64) {
        let mut present = Vec::with_capacity(rule.shares.len());
        let mut skipped = 0;
        for share in &rule.shares {
            if self.masters.get(share.master_record_id).is_some() {
                present.push(*share);
            } else {
                skipped += 1;
                tracing::warn!(
                    target: "rx_revenue::anomaly",
                    kind = "missing_master",
                    rule_id = rule.id,
                    master_record_id = share.master_record_id,
                    row_key = %row.row_key,
                    "split rule references a deleted master record, share skipped"
                );
            }
        }
        (present, skipped)
    }
}

/// The key on the other side of exact ↔ catalog id.
fn alternate_key(row: &SourceRow, primary: &LookupKey) -> Option<LookupKey> {
    match primary {
        LookupKey::Exact(_) => row.catalog_product_id.map(LookupKey::CatalogId),
        LookupKey::CatalogId(_) if !row.product_key.is_empty() => Some(LookupKey::Exact(row.product_key.clone())),
        LookupKey::CatalogId(_) => None,
    }
}

fn single(
    row: &SourceRow,
    identity: &IdentityCode,
    master: &MasterRecord,
    policy: AllocationPolicy,
    shares_skipped: u64,
) -> Attribution {
    let revenue = row_revenue(row.quantity, row.amount, master.unit_price);
    Attribution {
        policy,
        split_rule_id: None,
        results: vec![build_result(row, identity, master, row.quantity, revenue, policy, None, None)],
        shares_skipped,
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn build_result(
    row: &SourceRow,
    identity: &IdentityCode,
    master: &MasterRecord,
    quantity: i64,
    revenue: f64,
    policy: AllocationPolicy,
    split_rule_id: Option<i64>,
    percentage: Option<f64>,
) -> AttributedResult {
    let facility_name = if master.facility_name.is_empty() {
        row.facility_text.clone()
    } else {
        master.facility_name.clone()
    };
    AttributedResult {
        id: 0,
        row_key: row.row_key.clone(),
        run_id: row.run_id.clone(),
        identity_code: identity.clone(),
        facility_name,
        product_name: master.product_name.clone(),
        quantity,
        revenue,
        master_record_id: Some(master.id),
        policy,
        split_rule_id,
        percentage,
    }
}
