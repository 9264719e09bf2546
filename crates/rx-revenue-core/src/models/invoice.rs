//! Invoice input and persisted source rows.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolver::Identity;

/// A raw invoice row as supplied by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceRow {
    /// Pharmacy name as written on the invoice
    pub facility: String,
    /// Product text as written on the invoice
    pub product: String,
    /// Units sold; negative for returns
    pub quantity: i64,
    /// Invoiced amount; absent or zero means quantity × unit price
    pub amount: Option<f64>,
}

impl InvoiceRow {
    pub fn new(facility: impl Into<String>, product: impl Into<String>, quantity: i64, amount: Option<f64>) -> Self {
        Self {
            facility: facility.into(),
            product: product.into(),
            quantity,
            amount,
        }
    }

    /// Deterministic fingerprint of this row within a run.
    pub fn row_key(&self, run_id: &str, row_index: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(run_id.as_bytes());
        hasher.update([0u8]);
        hasher.update((row_index as u64).to_be_bytes());
        hasher.update(self.facility.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.product.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.quantity.to_be_bytes());
        match self.amount {
            Some(amount) => {
                hasher.update([1u8]);
                hasher.update(amount.to_bits().to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        hex::encode(hasher.finalize())
    }
}

/// Revenue of a row: the stated amount when present and non-zero, else quantity × price.
pub fn row_revenue(quantity: i64, amount: Option<f64>, unit_price: f64) -> f64 {
    match amount {
        Some(a) if a != 0.0 => a,
        _ => quantity as f64 * unit_price,
    }
}

/// Master lookup key a row was matched under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LookupKey {
    /// Exact product key
    Exact(String),
    /// Catalog product id
    CatalogId(i64),
}

impl LookupKey {
    /// Storage form: `EXACT|<key>` or `PID|<id>`.
    pub fn to_storage(&self) -> String {
        match self {
            LookupKey::Exact(key) => format!("EXACT|{}", key),
            LookupKey::CatalogId(id) => format!("PID|{}", id),
        }
    }

    /// Parse the storage form.
    pub fn from_storage(raw: &str) -> Option<Self> {
        let (kind, value) = raw.split_once('|')?;
        match kind {
            "EXACT" => Some(LookupKey::Exact(value.to_string())),
            "PID" => value.parse().ok().map(LookupKey::CatalogId),
            _ => None,
        }
    }
}

/// A persisted invoice row: the origin every result points back to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRow {
    /// Deterministic row fingerprint
    pub row_key: String,
    /// Owning run
    pub run_id: String,
    /// Position within the run's input
    pub row_index: i64,
    pub facility_text: String,
    pub product_text: String,
    pub quantity: i64,
    pub amount: Option<f64>,
    /// Identity the row is currently attributed to
    pub identity: Identity,
    /// Exact product key of `product_text`
    pub product_key: String,
    /// Key that produced the row's candidates; `None` while unmatched
    pub lookup_key: Option<LookupKey>,
    /// Catalog id from product resolution, if resolution ran and succeeded
    pub catalog_product_id: Option<i64>,
    /// Master chosen by hand in the unmatched workflow
    pub manual_master_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_key_is_deterministic() {
        let row = InvoiceRow::new("Gayathri Medicals", "FLOK 20", 10, None);
        assert_eq!(row.row_key("run-1", 0), row.row_key("run-1", 0));
        assert_ne!(row.row_key("run-1", 0), row.row_key("run-1", 1));
        assert_ne!(row.row_key("run-1", 0), row.row_key("run-2", 0));
        assert_eq!(row.row_key("run-1", 0).len(), 64);
    }

    #[test]
    fn test_row_key_distinguishes_absent_amount() {
        let with_zero = InvoiceRow::new("A", "B", 1, Some(0.0));
        let without = InvoiceRow::new("A", "B", 1, None);
        assert_ne!(with_zero.row_key("r", 0), without.row_key("r", 0));
    }

    #[test]
    fn test_row_revenue() {
        assert_eq!(row_revenue(10, Some(1000.0), 37.23), 1000.0);
        assert_eq!(row_revenue(10, Some(0.0), 2.5), 25.0);
        assert_eq!(row_revenue(4, None, 2.5), 10.0);
    }

    #[test]
    fn test_lookup_key_storage() {
        let exact = LookupKey::Exact("FLOK20".into());
        assert_eq!(exact.to_storage(), "EXACT|FLOK20");
        assert_eq!(LookupKey::from_storage("EXACT|FLOK20"), Some(exact));
        assert_eq!(LookupKey::from_storage("PID|7"), Some(LookupKey::CatalogId(7)));
        assert_eq!(LookupKey::from_storage("PID|x"), None);
        assert_eq!(LookupKey::from_storage("garbage"), None);
    }
}
