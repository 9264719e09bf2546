//! Split rule models.

use serde::{Deserialize, Serialize};

use super::LookupKey;
use crate::resolver::IdentityCode;

/// One share of a split rule, as submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitEntry {
    pub master_record_id: i64,
    /// Percentage of the row; required
    pub percentage: Option<f64>,
}

impl SplitEntry {
    pub fn new(master_record_id: i64, percentage: f64) -> Self {
        Self {
            master_record_id,
            percentage: Some(percentage),
        }
    }
}

/// One share of a validated split rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SplitShare {
    pub master_record_id: i64,
    pub percentage: f64,
}

/// A split rule before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSplitRule {
    pub identity_code: IdentityCode,
    pub lookup_key: LookupKey,
    pub entries: Vec<SplitEntry>,
    /// Administrator making the change
    pub updated_by: Option<String>,
}

/// A persisted percentage allocation across master records sharing a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitRule {
    pub id: i64,
    pub identity_code: IdentityCode,
    pub lookup_key: LookupKey,
    /// Ordered shares; percentages sum to 100 within tolerance
    pub shares: Vec<SplitShare>,
    pub updated_by: Option<String>,
    pub updated_at: String,
}

impl SplitRule {
    /// Master records referenced by this rule, in order.
    pub fn master_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.shares.iter().map(|s| s.master_record_id)
    }
}

/// Outcome of a retroactive reapplication.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReapplyReport {
    pub rule_id: i64,
    /// Rows whose results were replaced
    pub rows_reprocessed: u64,
    /// Rows left untouched after an error
    pub rows_failed: u64,
    /// Rule shares skipped because their master record no longer exists
    pub shares_skipped: u64,
}
