//! Unmatched invoice rows awaiting human resolution.

use serde::{Deserialize, Serialize};

use crate::resolver::{Identity, IdentityCode};

/// Review status of an unmatched row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedStatus {
    /// Awaiting review
    Pending,
    /// Mapped to a pharmacy by hand
    Mapped,
    /// Dismissed; terminal
    Ignored,
}

/// Why reconciliation produced no candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// Facility name cleaned down to nothing
    InvalidFacility,
    /// No exact master key and the catalog could not resolve the product
    ProductNotResolved,
    /// Product resolved but no master record exists for it at this pharmacy
    NoMasterRecord,
}

/// An invoice row for which no master record candidate was found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnmatchedRecord {
    /// Row id, 0 until persisted
    pub id: i64,
    pub run_id: String,
    /// Originating invoice row
    pub row_key: String,
    /// Facility text as written on the invoice
    pub facility_text: String,
    /// Identity derived from `facility_text`
    pub identity: Identity,
    pub product_text: String,
    pub quantity: i64,
    pub amount: Option<f64>,
    pub reason: UnmatchedReason,
    pub status: UnmatchedStatus,
    /// Pharmacy the row was mapped to
    pub mapped_to: Option<IdentityCode>,
}
