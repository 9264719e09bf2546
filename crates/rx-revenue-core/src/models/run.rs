//! Reconciliation run summaries.

use serde::{Deserialize, Serialize};

/// Per-run counters emitted at the end of reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub rows_processed: u64,
    /// Rows that produced at least one result
    pub matched: u64,
    /// Matched rows with exactly one candidate
    pub single_matches: u64,
    /// Multi-candidate rows divided by a split rule
    pub split_allocated: u64,
    /// Multi-candidate rows given wholly to the first candidate
    pub first_candidate_no_rule: u64,
    pub unmatched: u64,
    /// Unmatched rows whose facility name was unusable
    pub invalid_identity: u64,
    /// Rows matched through the best-effort catalog fallback
    pub best_effort_product_matches: u64,
    pub results_written: u64,
}
