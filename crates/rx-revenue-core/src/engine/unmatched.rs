//! Manual resolution of unmatched rows.
//!
//! `pending → mapped → pending` through map/unmap, `pending → ignored` is
//! terminal. Mapping teaches the catalogue: the row's product text is stored
//! as a learned master variant under the target and the original identity,
//! so the same row matches on its own next run.

use super::plan::build_result;
use super::{EngineError, EngineResult};
use crate::db::Database;
use crate::models::{
    row_revenue, AllocationPolicy, AttributedResult, LookupKey, MasterRecord, MasterSource, SourceRow,
    UnmatchedRecord, UnmatchedStatus,
};
use crate::resolver::{normalize, Identity, IdentityCode, NormalizeMode};

pub struct UnmatchedWorkflow<'a> {
    db: &'a Database,
}

impl<'a> UnmatchedWorkflow<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: i64) -> EngineResult<UnmatchedRecord> {
        self.db
            .get_unmatched(id)?
            .ok_or_else(|| EngineError::NotFound(format!("Unmatched record {}", id)))
    }

    /// Attribute an unmatched row to a pharmacy by hand.
    ///
    /// Re-mapping a mapped record replaces the previous mapping. Returns the
    /// single `manual` result written for the row.
    pub fn map(&self, id: i64, target: &str) -> EngineResult<AttributedResult> {
        let record = self.get(id)?;
        if record.status == UnmatchedStatus::Ignored {
            return Err(EngineError::InvalidState(format!(
                "Unmatched record {} is ignored",
                id
            )));
        }
        let target = IdentityCode::parse(target)
            .ok_or_else(|| EngineError::InvalidInput(format!("'{}' is not a valid identity code", target)))?;
        let row = self
            .db
            .get_source_row(&record.row_key)?
            .ok_or_else(|| EngineError::NotFound(format!("Source row {}", record.row_key)))?;

        let result = self.db.with_savepoint(|db| -> EngineResult<AttributedResult> {
            // Undo a previous mapping before choosing, its learned variants may go.
            db.delete_results_for_row(&row.row_key)?;
            db.delete_unreferenced_learned_masters(id)?;

            let masters = db.list_masters_by_identity(&target)?;
            let chosen = choose_master(&masters, &row).ok_or_else(|| {
                EngineError::NotFound(format!("No master records for identity {}", target.display_form()))
            })?;

            let key = if row.product_key.is_empty() {
                chosen.product_key.clone()
            } else {
                row.product_key.clone()
            };
            let pinned = SourceRow {
                identity: Identity::Valid(target.clone()),
                lookup_key: Some(LookupKey::Exact(key)),
                manual_master_id: Some(chosen.id),
                ..row.clone()
            };
            db.update_source_row_attribution(
                &pinned.row_key,
                &pinned.identity,
                pinned.lookup_key.as_ref(),
                pinned.manual_master_id,
            )?;

            let revenue = row_revenue(row.quantity, row.amount, chosen.unit_price);
            let mut result = build_result(
                &pinned,
                &target,
                chosen,
                row.quantity,
                revenue,
                AllocationPolicy::Manual,
                None,
                None,
            );
            result.id = db.insert_result(&result)?;

            let mut learned = learn_variant(db, id, &target, &row, chosen, &chosen.facility_name)?;
            if let Some(original) = record.identity.code().filter(|code| **code != target) {
                learned += learn_variant(db, id, original, &row, chosen, &row.facility_text)?;
            }

            db.update_unmatched_status(id, UnmatchedStatus::Mapped, Some(&target))?;
            tracing::info!(
                unmatched_id = id,
                target = %target.display_form(),
                master_record_id = chosen.id,
                learned,
                "unmatched row mapped"
            );
            Ok(result)
        })?;

        Ok(result)
    }

    /// Undo a mapping: the row goes back to pending with no results.
    pub fn unmap(&self, id: i64) -> EngineResult<()> {
        let record = self.get(id)?;
        if record.status != UnmatchedStatus::Mapped {
            return Err(EngineError::InvalidState(format!(
                "Unmatched record {} is not mapped",
                id
            )));
        }

        self.db.with_savepoint(|db| -> EngineResult<()> {
            db.delete_results_for_row(&record.row_key)?;
            db.update_source_row_attribution(&record.row_key, &record.identity, None, None)?;
            let (deleted, kept) = db.delete_unreferenced_learned_masters(id)?;
            db.update_unmatched_status(id, UnmatchedStatus::Pending, None)?;
            tracing::info!(unmatched_id = id, deleted, kept, "unmatched row unmapped");
            Ok(())
        })
    }

    /// Park a pending row for good. Ignoring twice is a no-op.
    pub fn ignore(&self, id: i64) -> EngineResult<()> {
        let record = self.get(id)?;
        match record.status {
            UnmatchedStatus::Ignored => Ok(()),
            UnmatchedStatus::Mapped => Err(EngineError::InvalidState(format!(
                "Unmatched record {} is mapped, unmap it first",
                id
            ))),
            UnmatchedStatus::Pending => {
                self.db.update_unmatched_status(id, UnmatchedStatus::Ignored, None)?;
                tracing::info!(unmatched_id = id, "unmatched row ignored");
                Ok(())
            }
        }
    }

    pub fn list(&self, status: Option<UnmatchedStatus>) -> EngineResult<Vec<UnmatchedRecord>> {
        Ok(self.db.list_unmatched(status)?)
    }

    pub fn list_for_run(&self, run_id: &str) -> EngineResult<Vec<UnmatchedRecord>> {
        Ok(self.db.list_unmatched_for_run(run_id)?)
    }

    /// Substring search over facility and product text.
    pub fn search(&self, term: &str, limit: usize) -> EngineResult<Vec<UnmatchedRecord>> {
        Ok(self.db.search_unmatched(term, limit)?)
    }

    /// `(pending, mapped, ignored)`.
    pub fn counts(&self) -> EngineResult<(u64, u64, u64)> {
        Ok(self.db.count_unmatched_by_status()?)
    }
}

/// Master with the row's product key, else its core name, else the first one.
fn choose_master<'m>(masters: &'m [MasterRecord], row: &SourceRow) -> Option<&'m MasterRecord> {
    if !row.product_key.is_empty() {
        if let Some(master) = masters.iter().find(|m| m.product_key == row.product_key) {
            return Some(master);
        }
    }

    let core = normalize(&row.product_text, NormalizeMode::Core);
    if !core.is_empty() {
        if let Some(master) = masters
            .iter()
            .find(|m| normalize(&m.product_name, NormalizeMode::Core) == core)
        {
            return Some(master);
        }
    }

    let first = masters.first()?;
    tracing::warn!(
        target: "rx_revenue::anomaly",
        kind = "product_mismatch",
        row_key = %row.row_key,
        product = %row.product_text,
        master_record_id = first.id,
        master_product = %first.product_name,
        "no master record at the target carries this product, using the first"
    );
    Some(first)
}

/// Store the row's product under `identity` for the chosen doctor, unless present.
fn learn_variant(
    db: &Database,
    unmatched_id: i64,
    identity: &IdentityCode,
    row: &SourceRow,
    chosen: &MasterRecord,
    facility_name: &str,
) -> EngineResult<u32> {
    if row.product_key.is_empty()
        || db
            .find_master_variant(identity, &row.product_key, &chosen.doctor_id)?
            .is_some()
    {
        return Ok(0);
    }

    let mut variant = MasterRecord {
        id: 0,
        identity_code: identity.clone(),
        facility_name: facility_name.to_string(),
        catalog_product_id: row.catalog_product_id,
        source: MasterSource::ManualMapping,
        origin_unmatched_id: Some(unmatched_id),
        ..chosen.clone()
    };
    variant.set_product_name(row.product_text.clone());
    let variant_id = db.insert_master_record(&variant)?;

    tracing::debug!(
        master_record_id = variant_id,
        identity = %identity,
        product_key = %variant.product_key,
        "learned master variant"
    );
    Ok(1)
}
