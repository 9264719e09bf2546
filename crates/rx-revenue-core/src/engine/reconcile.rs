//! Invoice batch reconciliation.
//!
//! Each row moves through `RAW → CODED → RESOLVED_PRODUCT | PRODUCT_NOT_FOUND
//! → MATCHED | MULTI_MATCH_ALLOCATED | UNMATCHED`. Rows are planned in
//! parallel against an immutable [`PlanContext`], then written one chunk per
//! savepoint on the calling thread.

use std::time::Instant;

use rayon::prelude::*;

use super::plan::{Attribution, PlanContext};
use super::{EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::models::{
    AllocationPolicy, InvoiceRow, LookupKey, RunSummary, SourceRow, UnmatchedReason, UnmatchedRecord,
    UnmatchedStatus,
};
use crate::resolver::{derive_identity, product_key, ProductMatcher};

/// What a row turned into.
#[derive(Debug)]
enum Outcome {
    Attributed(Attribution),
    Unmatched(UnmatchedRecord),
}

#[derive(Debug)]
struct RowPlan {
    source: SourceRow,
    outcome: Outcome,
    best_effort: bool,
}

/// Runs invoice batches through the resolution pipeline.
pub struct Reconciler<'a> {
    db: &'a Database,
    matcher: &'a ProductMatcher,
    config: &'a EngineConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database, matcher: &'a ProductMatcher, config: &'a EngineConfig) -> Self {
        Self { db, matcher, config }
    }

    /// Reconcile a batch under `run_id`, replacing anything a previous run with
    /// the same id derived.
    ///
    /// A storage failure rolls back the chunk in flight and aborts; chunks
    /// already written stay.
    pub fn run(&self, run_id: &str, rows: &[InvoiceRow]) -> EngineResult<RunSummary> {
        if run_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("run id must not be empty".into()));
        }

        let started = Instant::now();
        let ctx = PlanContext::load(self.db, self.matcher, self.config)?;

        let cleared = self.db.clear_run(run_id)?;
        if cleared > 0 {
            tracing::info!(run_id, cleared, "cleared rows from previous analysis of this run");
        }

        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            ..Default::default()
        };
        let chunk_size = self.config.chunk_size.max(1);

        for (chunk_index, chunk) in rows.chunks(chunk_size).enumerate() {
            let offset = chunk_index * chunk_size;
            let plans: Vec<RowPlan> = chunk
                .par_iter()
                .enumerate()
                .map(|(i, row)| plan_row(&ctx, run_id, offset + i, row))
                .collect();

            self.db.with_savepoint(|db| -> EngineResult<()> {
                for plan in &plans {
                    write_plan(db, plan)?;
                }
                Ok(())
            })?;

            for plan in &plans {
                tally(&mut summary, plan);
            }
            tracing::debug!(run_id, chunk = chunk_index, rows = plans.len(), "chunk committed");
        }

        tracing::info!(
            target: "rx_revenue::summary",
            run_id = %summary.run_id,
            rows_processed = summary.rows_processed,
            matched = summary.matched,
            single_matches = summary.single_matches,
            split_allocated = summary.split_allocated,
            first_candidate_no_rule = summary.first_candidate_no_rule,
            unmatched = summary.unmatched,
            invalid_identity = summary.invalid_identity,
            best_effort_product_matches = summary.best_effort_product_matches,
            results_written = summary.results_written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconciliation finished"
        );
        Ok(summary)
    }
}

/// Code, resolve and allocate one row without touching storage.
fn plan_row(ctx: &PlanContext, run_id: &str, index: usize, row: &InvoiceRow) -> RowPlan {
    let identity = derive_identity(&row.facility);
    let mut source = SourceRow {
        row_key: row.row_key(run_id, index),
        run_id: run_id.to_string(),
        row_index: index as i64,
        facility_text: row.facility.clone(),
        product_text: row.product.clone(),
        quantity: row.quantity,
        amount: row.amount,
        identity: identity.clone(),
        product_key: product_key(&row.product),
        lookup_key: None,
        catalog_product_id: None,
        manual_master_id: None,
    };

    let Some(code) = identity.code() else {
        return unmatched(source, UnmatchedReason::InvalidFacility, false);
    };

    let exact = LookupKey::Exact(source.product_key.clone());
    let exact_candidates = if source.product_key.is_empty() {
        0
    } else {
        ctx.masters.candidates(code, &exact).len()
    };
    let mut best_effort = false;

    if exact_candidates > 0 {
        source.lookup_key = Some(exact);
        // Stored for every exact match so catalog-keyed rules can reach the
        // row on reapply. Not best effort: the exact key decided the match.
        source.catalog_product_id = ctx.products.resolve(&row.product).map(|p| p.catalog_id);
    } else {
        let Some(product) = ctx.products.resolve(&row.product) else {
            return unmatched(source, UnmatchedReason::ProductNotResolved, false);
        };
        best_effort = !product.strategy.is_confident();
        source.catalog_product_id = Some(product.catalog_id);

        let by_catalog = LookupKey::CatalogId(product.catalog_id);
        if ctx.masters.candidates(code, &by_catalog).is_empty() {
            return unmatched(source, UnmatchedReason::NoMasterRecord, best_effort);
        }
        source.lookup_key = Some(by_catalog);
    }

    match ctx.attribute(&source) {
        Some(attribution) => RowPlan {
            source,
            outcome: Outcome::Attributed(attribution),
            best_effort,
        },
        None => unmatched(source, UnmatchedReason::NoMasterRecord, best_effort),
    }
}

fn unmatched(mut source: SourceRow, reason: UnmatchedReason, best_effort: bool) -> RowPlan {
    source.lookup_key = None;
    let record = UnmatchedRecord {
        id: 0,
        run_id: source.run_id.clone(),
        row_key: source.row_key.clone(),
        facility_text: source.facility_text.clone(),
        identity: source.identity.clone(),
        product_text: source.product_text.clone(),
        quantity: source.quantity,
        amount: source.amount,
        reason,
        status: UnmatchedStatus::Pending,
        mapped_to: None,
    };
    tracing::debug!(row_key = %source.row_key, ?reason, "row unmatched");
    RowPlan {
        source,
        outcome: Outcome::Unmatched(record),
        best_effort,
    }
}

fn write_plan(db: &Database, plan: &RowPlan) -> EngineResult<()> {
    db.insert_source_row(&plan.source)?;
    match &plan.outcome {
        Outcome::Attributed(attribution) => {
            for result in &attribution.results {
                db.insert_result(result)?;
            }
        }
        Outcome::Unmatched(record) => {
            db.insert_unmatched(record)?;
        }
    }
    Ok(())
}

fn tally(summary: &mut RunSummary, plan: &RowPlan) {
    summary.rows_processed += 1;
    if plan.best_effort {
        summary.best_effort_product_matches += 1;
    }

    match &plan.outcome {
        Outcome::Attributed(attribution) => {
            summary.matched += 1;
            summary.results_written += attribution.results.len() as u64;
            match attribution.policy {
                AllocationPolicy::Single | AllocationPolicy::Manual => summary.single_matches += 1,
                AllocationPolicy::SplitRule => summary.split_allocated += 1,
                AllocationPolicy::FirstCandidateNoRule => summary.first_candidate_no_rule += 1,
            }
        }
        Outcome::Unmatched(record) => {
            summary.unmatched += 1;
            if record.reason == UnmatchedReason::InvalidFacility {
                summary.invalid_identity += 1;
            }
        }
    }
}
