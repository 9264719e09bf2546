//! Attributed revenue results.

use serde::{Deserialize, Serialize};

use crate::resolver::IdentityCode;

/// How a result's quantity and revenue were decided.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Exactly one candidate master
    Single,
    /// Several candidates, divided by a split rule
    SplitRule,
    /// Several candidates, no rule: the whole row goes to the first candidate
    FirstCandidateNoRule,
    /// Mapped by hand from the unmatched queue
    Manual,
}

/// Revenue attributed to one master record for one invoice row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributedResult {
    /// Row id, 0 until persisted
    pub id: i64,
    /// Originating invoice row
    pub row_key: String,
    /// Owning run
    pub run_id: String,
    pub identity_code: IdentityCode,
    /// Facility text from the invoice
    pub facility_name: String,
    /// Product display name of the master record
    pub product_name: String,
    /// Quantity after allocation
    pub quantity: i64,
    /// Revenue after allocation
    pub revenue: f64,
    /// Master record this share belongs to; cleared if the master is deleted
    pub master_record_id: Option<i64>,
    pub policy: AllocationPolicy,
    /// Rule that produced a split share
    pub split_rule_id: Option<i64>,
    /// Percentage of the row for a split share
    pub percentage: Option<f64>,
}
