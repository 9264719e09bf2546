//! Master record models.

use serde::{Deserialize, Serialize};

use crate::resolver::{product_key, IdentityCode};

/// How a master record came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MasterSource {
    /// Loaded in bulk from the reference sheet
    BulkLoaded,
    /// Learned from a manual mapping of an unmatched row
    ManualMapping,
}

/// A reference tuple binding a pharmacy identity and product to a doctor.
///
/// Several records may share the same identity and product; those are
/// resolved by split rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterRecord {
    /// Row id, 0 until persisted
    pub id: i64,
    /// Canonical identity code of the pharmacy
    pub identity_code: IdentityCode,
    /// Pharmacy display name
    pub facility_name: String,
    /// Product display name
    pub product_name: String,
    /// Exact join key derived from `product_name`
    pub product_key: String,
    /// Catalog id, when known up front
    pub catalog_product_id: Option<i64>,
    /// Price per unit used when an invoice carries no amount
    pub unit_price: f64,
    pub doctor_id: String,
    pub doctor_name: String,
    pub rep_name: Option<String>,
    pub hq: Option<String>,
    pub area: Option<String>,
    pub source: MasterSource,
    /// Unmatched record whose mapping created this record
    pub origin_unmatched_id: Option<i64>,
}

impl MasterRecord {
    /// Create a bulk-loaded record; the product key is derived from the name.
    pub fn new(
        identity_code: IdentityCode,
        product_name: impl Into<String>,
        doctor_id: impl Into<String>,
        unit_price: f64,
    ) -> Self {
        let product_name = product_name.into();
        Self {
            id: 0,
            identity_code,
            facility_name: String::new(),
            product_key: product_key(&product_name),
            product_name,
            catalog_product_id: None,
            unit_price,
            doctor_id: doctor_id.into(),
            doctor_name: String::new(),
            rep_name: None,
            hq: None,
            area: None,
            source: MasterSource::BulkLoaded,
            origin_unmatched_id: None,
        }
    }

    /// Replace the product name and re-derive the key.
    pub fn set_product_name(&mut self, name: impl Into<String>) {
        self.product_name = name.into();
        self.product_key = product_key(&self.product_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_product_key() {
        let code = IdentityCode::parse("GAYATHRIME_RIMEDICALS").unwrap();
        let mut record = MasterRecord::new(code, "Brethnol Syp 100ml", "D1", 45.0);
        assert_eq!(record.product_key, "BRETHNOLSYP");
        assert_eq!(record.source, MasterSource::BulkLoaded);

        record.set_product_name("FLOK 20");
        assert_eq!(record.product_key, "FLOK20");
    }
}
