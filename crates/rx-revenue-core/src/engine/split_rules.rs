//! Split rule administration.
//!
//! Every change is applied retroactively: rows already persisted for the
//! rule's pharmacy are re-derived, each in its own savepoint, so one failing
//! row never blocks the rest of the batch.

use super::allocator::validate_shares;
use super::plan::{Attribution, PlanContext};
use super::{EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::models::{NewSplitRule, ReapplyReport, SourceRow, SplitEntry, SplitRule, SplitShare};
use crate::resolver::ProductMatcher;

pub struct SplitRuleService<'a> {
    db: &'a Database,
    matcher: &'a ProductMatcher,
    config: &'a EngineConfig,
}

impl<'a> SplitRuleService<'a> {
    pub fn new(db: &'a Database, matcher: &'a ProductMatcher, config: &'a EngineConfig) -> Self {
        Self { db, matcher, config }
    }

    /// Validate, store (replacing any rule on the same key) and reapply.
    ///
    /// Nothing is stored when validation fails.
    pub fn create(&self, draft: &NewSplitRule) -> EngineResult<(SplitRule, ReapplyReport)> {
        let shares = validate_shares(&draft.entries, self.config.split_tolerance)?;
        self.ensure_masters_exist(&shares)?;

        let id = self.db.upsert_split_rule(
            &draft.identity_code,
            &draft.lookup_key,
            &shares,
            draft.updated_by.as_deref(),
        )?;
        tracing::info!(
            rule_id = id,
            identity = %draft.identity_code,
            lookup_key = %draft.lookup_key.to_storage(),
            shares = shares.len(),
            "split rule saved"
        );

        let report = self.reapply(id)?;
        Ok((self.get(id)?, report))
    }

    /// Replace the shares of an existing rule and reapply.
    pub fn update(
        &self,
        id: i64,
        entries: &[SplitEntry],
        updated_by: Option<&str>,
    ) -> EngineResult<(SplitRule, ReapplyReport)> {
        let shares = validate_shares(entries, self.config.split_tolerance)?;
        self.get(id)?;
        self.ensure_masters_exist(&shares)?;

        self.db.update_split_rule_shares(id, &shares, updated_by)?;
        tracing::info!(rule_id = id, shares = shares.len(), "split rule updated");

        let report = self.reapply(id)?;
        Ok((self.get(id)?, report))
    }

    /// Delete a rule. With `revert`, rows it allocated are re-derived without it.
    pub fn delete(&self, id: i64, revert: bool) -> EngineResult<ReapplyReport> {
        self.get(id)?;
        let row_keys = if revert {
            self.db.list_row_keys_for_split_rule(id)?
        } else {
            Vec::new()
        };

        self.db.delete_split_rule(id)?;
        tracing::info!(rule_id = id, revert, rows = row_keys.len(), "split rule deleted");

        let mut report = ReapplyReport {
            rule_id: id,
            ..Default::default()
        };
        if row_keys.is_empty() {
            return Ok(report);
        }

        let ctx = self.context()?;
        for row_key in &row_keys {
            let Some(row) = self.db.get_source_row(row_key)? else {
                continue;
            };
            self.record(&mut report, &row, self.replace_row(&ctx, &row));
        }
        Ok(report)
    }

    /// Re-derive every persisted row this rule now allocates.
    pub fn reapply(&self, rule_id: i64) -> EngineResult<ReapplyReport> {
        let rule = self.get(rule_id)?;
        let ctx = self.context()?;
        let rows = self.db.list_matched_rows_for_identity(&rule.identity_code)?;

        let mut report = ReapplyReport {
            rule_id,
            ..Default::default()
        };
        for row in rows
            .iter()
            .filter(|row| ctx.rule_for(row).map(|r| r.id) == Some(rule_id))
        {
            self.record(&mut report, row, self.replace_row(&ctx, row));
        }

        tracing::info!(
            rule_id,
            rows_reprocessed = report.rows_reprocessed,
            rows_failed = report.rows_failed,
            shares_skipped = report.shares_skipped,
            "split rule reapplied"
        );
        Ok(report)
    }

    pub fn get(&self, id: i64) -> EngineResult<SplitRule> {
        self.db
            .get_split_rule(id)?
            .ok_or_else(|| EngineError::NotFound(format!("Split rule {}", id)))
    }

    pub fn list(&self) -> EngineResult<Vec<SplitRule>> {
        Ok(self.db.list_split_rules()?)
    }

    fn context(&self) -> EngineResult<PlanContext> {
        Ok(PlanContext::load(self.db, self.matcher, self.config)?)
    }

    fn ensure_masters_exist(&self, shares: &[SplitShare]) -> EngineResult<()> {
        let ids: Vec<i64> = shares.iter().map(|s| s.master_record_id).collect();
        let missing = self.db.missing_master_ids(&ids)?;
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("Master records {:?}", missing)))
        }
    }

    /// Swap a row's results for a fresh attribution, atomically.
    fn replace_row(&self, ctx: &PlanContext, row: &SourceRow) -> EngineResult<Attribution> {
        self.db.with_savepoint(|db| {
            db.delete_results_for_row(&row.row_key)?;
            let attribution = ctx
                .attribute(row)
                .ok_or_else(|| EngineError::NotFound(format!("Master records for row {}", row.row_key)))?;
            for result in &attribution.results {
                db.insert_result(result)?;
            }
            Ok(attribution)
        })
    }

    fn record(&self, report: &mut ReapplyReport, row: &SourceRow, outcome: EngineResult<Attribution>) {
        match outcome {
            Ok(attribution) => {
                report.rows_reprocessed += 1;
                report.shares_skipped += attribution.shares_skipped;
            }
            Err(e) => {
                report.rows_failed += 1;
                tracing::warn!(
                    target: "rx_revenue::anomaly",
                    kind = "reapply_failed",
                    rule_id = report.rule_id,
                    row_key = %row.row_key,
                    error = %e,
                    "could not re-derive row, previous results kept"
                );
            }
        }
    }
}
