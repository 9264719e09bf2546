//! Product catalog models.

use serde::{Deserialize, Serialize};

/// One entry of the reference product catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductCatalogEntry {
    /// Numeric catalog id
    pub id: i64,
    /// Free-text product name, unique across the catalog
    pub name: String,
    /// Price per unit
    pub unit_price: f64,
}

impl ProductCatalogEntry {
    /// Create a catalog entry.
    pub fn new(id: i64, name: impl Into<String>, unit_price: f64) -> Self {
        Self {
            id,
            name: name.into(),
            unit_price,
        }
    }
}
