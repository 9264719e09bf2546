//! Property tests for identity coding and split allocation.

use proptest::prelude::*;

use rx_revenue_core::engine::{allocate, validate_shares, EngineError, SplitRuleService};
use rx_revenue_core::models::{LookupKey, MasterRecord, NewSplitRule, SplitEntry};
use rx_revenue_core::resolver::{derive_identity, Identity, IdentityCode, ProductMatcher};
use rx_revenue_core::{Database, EngineConfig};

/// Percentages summing to exactly 100, one per weight.
fn percentages(weights: &[u32]) -> Vec<f64> {
    let total: u32 = weights.iter().sum();
    let mut out: Vec<f64> = weights
        .iter()
        .map(|w| *w as f64 * 100.0 / total as f64)
        .collect();
    let head: f64 = out[..out.len() - 1].iter().sum();
    if let Some(last) = out.last_mut() {
        *last = 100.0 - head;
    }
    out
}

proptest! {
    #[test]
    fn identity_is_total_and_fixed_width(name in "\\PC{0,40}") {
        let identity = derive_identity(&name);
        prop_assert_eq!(&identity, &derive_identity(&name));

        match &identity {
            Identity::Invalid => prop_assert_eq!(identity.to_string(), "INVALID"),
            Identity::Valid(code) => {
                let display: Vec<char> = identity.to_string().chars().collect();
                prop_assert_eq!(display.len(), 21);
                prop_assert_eq!(display[10], '-');
                prop_assert_eq!(code.as_str().chars().nth(10), Some('_'));
            }
        }
    }

    #[test]
    fn display_form_parses_back(name in "[ -~]{1,40}") {
        if let Identity::Valid(code) = derive_identity(&name) {
            prop_assert_eq!(IdentityCode::parse(&code.display_form()), Some(code));
        }
    }

    #[test]
    fn allocation_preserves_revenue_and_never_overcounts_quantity(
        weights in prop::collection::vec(1u32..100, 1..6),
        quantity in -1000i64..1000,
        revenue in -1.0e6f64..1.0e6,
    ) {
        let entries: Vec<SplitEntry> = percentages(&weights)
            .into_iter()
            .enumerate()
            .map(|(i, pct)| SplitEntry::new(i as i64 + 1, pct))
            .collect();
        let shares = validate_shares(&entries, 0.1).unwrap();
        let allocations = allocate(quantity, revenue, &shares);

        prop_assert_eq!(allocations.len(), shares.len());
        let allocated_quantity: i64 = allocations.iter().map(|a| a.quantity).sum();
        prop_assert!(allocated_quantity.abs() <= quantity.abs());
        prop_assert!(allocations.iter().all(|a| a.quantity == 0 || a.quantity.signum() == quantity.signum()));

        let allocated_revenue: f64 = allocations.iter().map(|a| a.revenue).sum();
        prop_assert!((allocated_revenue - revenue).abs() <= 1e-6 * revenue.abs().max(1.0));
    }

    #[test]
    fn bad_sums_are_rejected_and_not_stored(a in 0.0f64..150.0, b in 0.0f64..150.0) {
        prop_assume!((a + b - 100.0).abs() > 0.11);

        let db = Database::open_in_memory().unwrap();
        let identity = IdentityCode::parse("PHARMA").unwrap();
        let first = db
            .insert_master_record(&MasterRecord::new(identity.clone(), "FLOK 20", "A", 1.0))
            .unwrap();
        let second = db
            .insert_master_record(&MasterRecord::new(identity.clone(), "FLOK 20", "B", 1.0))
            .unwrap();

        let matcher = ProductMatcher::default();
        let config = EngineConfig::default();
        let outcome = SplitRuleService::new(&db, &matcher, &config).create(&NewSplitRule {
            identity_code: identity,
            lookup_key: LookupKey::Exact("FLOK20".into()),
            entries: vec![SplitEntry::new(first, a), SplitEntry::new(second, b)],
            updated_by: None,
        });

        prop_assert!(matches!(outcome, Err(EngineError::SplitRule(_))));
        prop_assert!(db.list_split_rules().unwrap().is_empty());
    }
}
