//! Split-rule validation and allocation.
//!
//! Quantities are truncated toward zero per share, so the shares of a row may
//! sum to less than the row's quantity in magnitude (returns included); revenue keeps its fractional part and always sums
//! to the row's revenue. No remainder is redistributed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{SplitEntry, SplitShare};

/// Absorbs binary representation error before truncating (e.g. 29.999999999).
const QUANTITY_EPSILON: f64 = 1e-9;

/// Split rule validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitRuleError {
    #[error("Split rule has no entries")]
    Empty,

    #[error("Missing percentage for master record {0}")]
    MissingPercentage(i64),

    #[error("Negative percentage {percentage} for master record {master_record_id}")]
    NegativePercentage { master_record_id: i64, percentage: f64 },

    #[error("Master record {0} appears more than once")]
    DuplicateMaster(i64),

    #[error("Percentages must sum to 100 (±{tolerance}), got {sum}")]
    BadSum { sum: f64, tolerance: f64 },
}

/// One master's share of an invoice row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub master_record_id: i64,
    pub quantity: i64,
    pub revenue: f64,
    pub percentage: f64,
}

/// Validate submitted entries into ordered shares.
pub fn validate_shares(entries: &[SplitEntry], tolerance: f64) -> Result<Vec<SplitShare>, SplitRuleError> {
    if entries.is_empty() {
        return Err(SplitRuleError::Empty);
    }

    let mut shares: Vec<SplitShare> = Vec::with_capacity(entries.len());
    for entry in entries {
        let percentage = match entry.percentage {
            Some(p) if p.is_finite() => p,
            _ => return Err(SplitRuleError::MissingPercentage(entry.master_record_id)),
        };
        if percentage < 0.0 {
            return Err(SplitRuleError::NegativePercentage {
                master_record_id: entry.master_record_id,
                percentage,
            });
        }
        if shares.iter().any(|s| s.master_record_id == entry.master_record_id) {
            return Err(SplitRuleError::DuplicateMaster(entry.master_record_id));
        }
        shares.push(SplitShare {
            master_record_id: entry.master_record_id,
            percentage,
        });
    }

    let sum: f64 = shares.iter().map(|s| s.percentage).sum();
    if (sum - 100.0).abs() > tolerance + QUANTITY_EPSILON {
        return Err(SplitRuleError::BadSum { sum, tolerance });
    }

    Ok(shares)
}

/// Divide a row across the shares of a rule.
pub fn allocate(quantity: i64, revenue: f64, shares: &[SplitShare]) -> Vec<Allocation> {
    shares
        .iter()
        .map(|share| {
            let ratio = share.percentage / 100.0;
            Allocation {
                master_record_id: share.master_record_id,
                quantity: truncate_quantity(quantity as f64 * ratio),
                revenue: revenue * ratio,
                percentage: share.percentage,
            }
        })
        .collect()
}

fn truncate_quantity(value: f64) -> i64 {
    (value + QUANTITY_EPSILON.copysign(value)).trunc() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(id: i64, pct: f64) -> SplitShare {
        SplitShare {
            master_record_id: id,
            percentage: pct,
        }
    }

    #[test]
    fn test_sixty_forty() {
        let allocations = allocate(10, 1000.0, &[share(1, 60.0), share(2, 40.0)]);
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].quantity, 6);
        assert!((allocations[0].revenue - 600.0).abs() < 1e-9);
        assert_eq!(allocations[1].quantity, 4);
        assert!((allocations[1].revenue - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_quantity_is_truncated() {
        let allocations = allocate(10, 100.0, &[share(1, 33.3), share(2, 33.3), share(3, 33.4)]);
        let quantities: Vec<i64> = allocations.iter().map(|a| a.quantity).collect();
        assert_eq!(quantities, vec![3, 3, 3]);
        let revenue: f64 = allocations.iter().map(|a| a.revenue).sum();
        assert!((revenue - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_return_quantity_truncates_toward_zero() {
        let allocations = allocate(-10, -100.0, &[share(1, 33.3), share(2, 33.3), share(3, 33.4)]);
        let quantities: Vec<i64> = allocations.iter().map(|a| a.quantity).collect();
        assert_eq!(quantities, vec![-3, -3, -3]);

        let allocations = allocate(-100, -50.0, &[share(1, 29.0), share(2, 71.0)]);
        assert_eq!(allocations[0].quantity, -29);
        assert_eq!(allocations[1].quantity, -71);
        let revenue: f64 = allocations.iter().map(|a| a.revenue).sum();
        assert!((revenue + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_products_are_not_under_truncated() {
        let allocations = allocate(100, 0.0, &[share(1, 29.0), share(2, 71.0)]);
        assert_eq!(allocations[0].quantity, 29);
        assert_eq!(allocations[1].quantity, 71);
    }

    #[test]
    fn test_validate_accepts_within_tolerance() {
        let entries = vec![SplitEntry::new(1, 60.05), SplitEntry::new(2, 40.0)];
        let shares = validate_shares(&entries, 0.1).unwrap();
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].master_record_id, 1);
    }

    #[test]
    fn test_validate_names_actual_sum() {
        let entries = vec![SplitEntry::new(1, 60.0), SplitEntry::new(2, 30.0)];
        let err = validate_shares(&entries, 0.1).unwrap_err();
        assert_eq!(err, SplitRuleError::BadSum { sum: 90.0, tolerance: 0.1 });
        assert!(err.to_string().contains("got 90"));
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        assert_eq!(validate_shares(&[], 0.1).unwrap_err(), SplitRuleError::Empty);

        let missing = vec![
            SplitEntry::new(1, 100.0),
            SplitEntry {
                master_record_id: 2,
                percentage: None,
            },
        ];
        assert_eq!(validate_shares(&missing, 0.1).unwrap_err(), SplitRuleError::MissingPercentage(2));

        let negative = vec![SplitEntry::new(1, 110.0), SplitEntry::new(2, -10.0)];
        assert!(matches!(
            validate_shares(&negative, 0.1).unwrap_err(),
            SplitRuleError::NegativePercentage { master_record_id: 2, .. }
        ));

        let duplicate = vec![SplitEntry::new(1, 50.0), SplitEntry::new(1, 50.0)];
        assert_eq!(validate_shares(&duplicate, 0.1).unwrap_err(), SplitRuleError::DuplicateMaster(1));

        let nan = vec![SplitEntry::new(1, f64::NAN)];
        assert_eq!(validate_shares(&nan, 0.1).unwrap_err(), SplitRuleError::MissingPercentage(1));
    }
}
