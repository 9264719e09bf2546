//! Rx Revenue Core Library
//!
//! Pharmacy invoice reconciliation: attributes sales revenue to the doctors
//! who drive it.
//!
//! # Architecture
//!
//! ```text
//! Invoice rows (facility text, product text, qty, amount)
//!          │
//!          ▼
//!   Identity Coding ── INVALID ─────────────────────────┐
//!          │                                            │
//!          ▼                                            │
//!   Exact key lookup ── miss ──► Product Matcher        │
//!          │                      │          │          │
//!          │                 catalog id   NOT_FOUND ────┤
//!          │                      │                     │
//!          ▼                      ▼                     ▼
//!   Candidate master records (identity, key)    Unmatched queue
//!          │                                     (map / unmap / ignore)
//!    ┌─────┼──────────────┐                             │
//!    0     1              ≥2                            │
//!    │     │              │                             │
//!    │  single      split rule? ── no ──► first candidate (warned)
//!    │     │              │                             │
//!    │     │       percentage allocation                │
//!    │     ▼              ▼                             │
//!    └──► Results (one per master share) ◄──── manual ──┘
//!                         ▲
//!        rule change ─────┘ retroactive reapplication
//! ```
//!
//! # Modules
//!
//! - [`config`]: thresholds, tolerance and chunking
//! - [`db`]: SQLite persistence
//! - [`engine`]: reconciliation, split rules, unmatched workflow
//! - [`models`]: domain types
//! - [`resolver`]: normalizer, identity coder, product matcher

pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod resolver;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig, MatcherConfig};
pub use db::{Database, DbError};
pub use engine::{EngineError, Reconciler, SplitRuleService, UnmatchedWorkflow};
pub use models::{
    AllocationPolicy, AttributedResult, InvoiceRow, LookupKey, MasterRecord, MasterSource, NewSplitRule,
    ProductCatalogEntry, ReapplyReport, RunSummary, SplitEntry, SplitRule, UnmatchedReason, UnmatchedRecord,
    UnmatchedStatus,
};
pub use resolver::{derive_identity, Identity, IdentityCode, ProductMatch, ProductMatcher};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum RevenueEngineError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<DbError> for RevenueEngineError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => RevenueEngineError::NotFound(what),
            other => RevenueEngineError::DatabaseError(other.to_string()),
        }
    }
}

impl From<EngineError> for RevenueEngineError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Database(db) => db.into(),
            EngineError::SplitRule(rule) => RevenueEngineError::InvalidInput(rule.to_string()),
            EngineError::NotFound(what) => RevenueEngineError::NotFound(what),
            EngineError::InvalidState(what) => RevenueEngineError::InvalidState(what),
            EngineError::InvalidInput(what) => RevenueEngineError::InvalidInput(what),
        }
    }
}

impl From<ConfigError> for RevenueEngineError {
    fn from(e: ConfigError) -> Self {
        RevenueEngineError::ConfigError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for RevenueEngineError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        RevenueEngineError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create an engine database at the given path.
///
/// Configuration comes from `RX_REVENUE_CONFIG` / `RX_REVENUE_CHUNK_SIZE`.
#[uniffi::export]
pub fn open_engine(path: String) -> Result<Arc<RevenueEngine>, RevenueEngineError> {
    let config = EngineConfig::from_env()?;
    let db = Database::open(&path)?;
    Ok(RevenueEngine::new(db, config))
}

/// Open an engine database with an explicit JSON configuration.
#[uniffi::export]
pub fn open_engine_with_config(
    path: String,
    config_json: String,
) -> Result<Arc<RevenueEngine>, RevenueEngineError> {
    let config = EngineConfig::from_json_str(&config_json)?;
    let db = Database::open(&path)?;
    Ok(RevenueEngine::new(db, config))
}

/// Create an in-memory engine (for testing).
#[uniffi::export]
pub fn open_engine_in_memory() -> Result<Arc<RevenueEngine>, RevenueEngineError> {
    let db = Database::open_in_memory()?;
    Ok(RevenueEngine::new(db, EngineConfig::default()))
}

/// Install a global `tracing` subscriber writing to stderr.
///
/// `filter` uses `EnvFilter` syntax; without it `RUST_LOG` is read, falling
/// back to `info`. Returns false when a subscriber was already installed.
#[uniffi::export]
pub fn init_logging(filter: Option<String>) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Generate a fresh run id.
#[uniffi::export]
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Identity code of a facility name, in display form (`INVALID` if none).
#[uniffi::export]
pub fn facility_identity(facility_name: String) -> String {
    derive_identity(&facility_name).to_string()
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine handle for FFI.
#[derive(uniffi::Object)]
pub struct RevenueEngine {
    db: Arc<Mutex<Database>>,
    matcher: ProductMatcher,
    config: EngineConfig,
}

impl RevenueEngine {
    fn new(db: Database, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            matcher: ProductMatcher::new(config.matcher.clone()),
            config,
        })
    }
}

#[uniffi::export]
impl RevenueEngine {
    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// Add or update a catalog entry. The product index is rebuilt on next use.
    pub fn upsert_catalog_entry(&self, entry: FfiCatalogEntry) -> Result<(), RevenueEngineError> {
        let db = self.db.lock()?;
        db.upsert_catalog_entry(&entry.into())?;
        self.matcher.invalidate();
        Ok(())
    }

    pub fn delete_catalog_entry(&self, id: i64) -> Result<bool, RevenueEngineError> {
        let db = self.db.lock()?;
        let deleted = db.delete_catalog_entry(id)?;
        self.matcher.invalidate();
        Ok(deleted)
    }

    pub fn list_catalog(&self) -> Result<Vec<FfiCatalogEntry>, RevenueEngineError> {
        let db = self.db.lock()?;
        let entries = db.list_catalog_entries()?;
        Ok(entries.into_iter().map(|e| e.into()).collect())
    }

    /// Resolve a product text against the catalog.
    pub fn resolve_product(&self, text: String) -> Result<Option<FfiProductMatch>, RevenueEngineError> {
        let db = self.db.lock()?;
        let found = self.matcher.resolve(&db, &text)?;
        Ok(found.map(|m| m.into()))
    }

    // =========================================================================
    // Master Record Operations
    // =========================================================================

    /// Add a bulk-loaded master record. Returns its id.
    pub fn add_master_record(&self, record: FfiMasterRecord) -> Result<i64, RevenueEngineError> {
        let record = MasterRecord::try_from(record)?;
        let db = self.db.lock()?;
        Ok(db.insert_master_record(&record)?)
    }

    pub fn list_master_records(&self, identity_code: String) -> Result<Vec<FfiMasterRecord>, RevenueEngineError> {
        let identity = parse_identity(&identity_code)?;
        let db = self.db.lock()?;
        let records = db.list_masters_by_identity(&identity)?;
        Ok(records.into_iter().map(|r| r.into()).collect())
    }

    pub fn delete_master_record(&self, id: i64) -> Result<bool, RevenueEngineError> {
        let db = self.db.lock()?;
        Ok(db.delete_master_record(id)?)
    }

    /// Remove every master record. Returns how many were deleted.
    pub fn clear_master_records(&self) -> Result<u64, RevenueEngineError> {
        let db = self.db.lock()?;
        Ok(db.clear_master_records()? as u64)
    }

    // =========================================================================
    // Reconciliation Operations
    // =========================================================================

    /// Reconcile an invoice batch, replacing any earlier analysis of `run_id`.
    pub fn reconcile(&self, run_id: String, rows: Vec<FfiInvoiceRow>) -> Result<FfiRunSummary, RevenueEngineError> {
        let rows: Vec<InvoiceRow> = rows.into_iter().map(|r| r.into()).collect();
        let db = self.db.lock()?;
        let summary = Reconciler::new(&db, &self.matcher, &self.config).run(&run_id, &rows)?;
        Ok(summary.into())
    }

    /// Delete everything derived for a run. Returns the number of source rows removed.
    pub fn clear_run(&self, run_id: String) -> Result<u64, RevenueEngineError> {
        let db = self.db.lock()?;
        Ok(db.clear_run(&run_id)? as u64)
    }

    pub fn results_for_run(&self, run_id: String) -> Result<Vec<FfiAttributedResult>, RevenueEngineError> {
        let db = self.db.lock()?;
        let results = db.list_results_for_run(&run_id)?;
        Ok(results.into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Split Rule Operations
    // =========================================================================

    /// Create or replace the rule on (identity, lookup key) and reapply it.
    ///
    /// `lookup_key` is `EXACT|<product key>` or `PID|<catalog id>`.
    pub fn create_split_rule(
        &self,
        identity_code: String,
        lookup_key: String,
        entries: Vec<FfiSplitEntry>,
        updated_by: Option<String>,
    ) -> Result<FfiSplitRuleOutcome, RevenueEngineError> {
        let draft = NewSplitRule {
            identity_code: parse_identity(&identity_code)?,
            lookup_key: LookupKey::from_storage(&lookup_key)
                .ok_or_else(|| RevenueEngineError::InvalidInput(format!("Bad lookup key '{}'", lookup_key)))?,
            entries: entries.into_iter().map(|e| e.into()).collect(),
            updated_by,
        };
        let db = self.db.lock()?;
        let (rule, report) = SplitRuleService::new(&db, &self.matcher, &self.config).create(&draft)?;
        Ok(FfiSplitRuleOutcome {
            rule: rule.into(),
            report: report.into(),
        })
    }

    pub fn update_split_rule(
        &self,
        id: i64,
        entries: Vec<FfiSplitEntry>,
        updated_by: Option<String>,
    ) -> Result<FfiSplitRuleOutcome, RevenueEngineError> {
        let entries: Vec<SplitEntry> = entries.into_iter().map(|e| e.into()).collect();
        let db = self.db.lock()?;
        let (rule, report) =
            SplitRuleService::new(&db, &self.matcher, &self.config).update(id, &entries, updated_by.as_deref())?;
        Ok(FfiSplitRuleOutcome {
            rule: rule.into(),
            report: report.into(),
        })
    }

    /// Delete a rule; with `revert`, rows it allocated are re-derived without it.
    pub fn delete_split_rule(&self, id: i64, revert: bool) -> Result<FfiReapplyReport, RevenueEngineError> {
        let db = self.db.lock()?;
        let report = SplitRuleService::new(&db, &self.matcher, &self.config).delete(id, revert)?;
        Ok(report.into())
    }

    pub fn reapply_split_rule(&self, id: i64) -> Result<FfiReapplyReport, RevenueEngineError> {
        let db = self.db.lock()?;
        let report = SplitRuleService::new(&db, &self.matcher, &self.config).reapply(id)?;
        Ok(report.into())
    }

    pub fn list_split_rules(&self) -> Result<Vec<FfiSplitRule>, RevenueEngineError> {
        let db = self.db.lock()?;
        let rules = SplitRuleService::new(&db, &self.matcher, &self.config).list()?;
        Ok(rules.into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Unmatched Operations
    // =========================================================================

    /// Attribute an unmatched row to a pharmacy identity by hand.
    pub fn map_unmatched(&self, id: i64, target_identity: String) -> Result<FfiAttributedResult, RevenueEngineError> {
        let db = self.db.lock()?;
        let result = UnmatchedWorkflow::new(&db).map(id, &target_identity)?;
        Ok(result.into())
    }

    pub fn unmap_unmatched(&self, id: i64) -> Result<(), RevenueEngineError> {
        let db = self.db.lock()?;
        Ok(UnmatchedWorkflow::new(&db).unmap(id)?)
    }

    pub fn ignore_unmatched(&self, id: i64) -> Result<(), RevenueEngineError> {
        let db = self.db.lock()?;
        Ok(UnmatchedWorkflow::new(&db).ignore(id)?)
    }

    /// List unmatched rows, optionally by status (`pending`, `mapped`, `ignored`).
    pub fn list_unmatched(&self, status: Option<String>) -> Result<Vec<FfiUnmatchedRecord>, RevenueEngineError> {
        let status = status.as_deref().map(parse_status).transpose()?;
        let db = self.db.lock()?;
        let records = UnmatchedWorkflow::new(&db).list(status)?;
        Ok(records.into_iter().map(|r| r.into()).collect())
    }

    /// Search unmatched rows by facility or product text.
    pub fn search_unmatched(&self, query: String, limit: u32) -> Result<Vec<FfiUnmatchedRecord>, RevenueEngineError> {
        let db = self.db.lock()?;
        let records = UnmatchedWorkflow::new(&db).search(&query, limit as usize)?;
        Ok(records.into_iter().map(|r| r.into()).collect())
    }

    pub fn count_unmatched(&self) -> Result<FfiUnmatchedCounts, RevenueEngineError> {
        let db = self.db.lock()?;
        let (pending, mapped, ignored) = UnmatchedWorkflow::new(&db).counts()?;
        Ok(FfiUnmatchedCounts {
            pending,
            mapped,
            ignored,
        })
    }
}

fn parse_identity(raw: &str) -> Result<IdentityCode, RevenueEngineError> {
    IdentityCode::parse(raw)
        .ok_or_else(|| RevenueEngineError::InvalidInput(format!("'{}' is not a valid identity code", raw)))
}

fn parse_status(raw: &str) -> Result<UnmatchedStatus, RevenueEngineError> {
    match raw.trim().to_lowercase().as_str() {
        "pending" => Ok(UnmatchedStatus::Pending),
        "mapped" => Ok(UnmatchedStatus::Mapped),
        "ignored" => Ok(UnmatchedStatus::Ignored),
        other => Err(RevenueEngineError::InvalidInput(format!("Unknown status '{}'", other))),
    }
}

fn policy_name(policy: AllocationPolicy) -> &'static str {
    match policy {
        AllocationPolicy::Single => "single",
        AllocationPolicy::SplitRule => "split_rule",
        AllocationPolicy::FirstCandidateNoRule => "first_candidate_no_rule",
        AllocationPolicy::Manual => "manual",
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe catalog entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCatalogEntry {
    pub id: i64,
    pub name: String,
    pub unit_price: f64,
}

impl From<ProductCatalogEntry> for FfiCatalogEntry {
    fn from(entry: ProductCatalogEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            unit_price: entry.unit_price,
        }
    }
}

impl From<FfiCatalogEntry> for ProductCatalogEntry {
    fn from(entry: FfiCatalogEntry) -> Self {
        ProductCatalogEntry::new(entry.id, entry.name, entry.unit_price)
    }
}

/// FFI-safe product match.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProductMatch {
    pub catalog_id: i64,
    pub name: String,
    pub unit_price: f64,
    pub score: u8,
    pub strategy: String,
    /// False for best-effort group fallbacks
    pub confident: bool,
}

impl From<ProductMatch> for FfiProductMatch {
    fn from(m: ProductMatch) -> Self {
        Self {
            catalog_id: m.catalog_id,
            name: m.name,
            unit_price: m.unit_price,
            score: m.score,
            strategy: m.strategy.as_str().to_string(),
            confident: m.strategy.is_confident(),
        }
    }
}

/// FFI-safe master record. `id`, `product_key` and `source` are ignored on input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMasterRecord {
    pub id: i64,
    pub identity_code: String,
    pub facility_name: String,
    pub product_name: String,
    pub product_key: String,
    pub catalog_product_id: Option<i64>,
    pub unit_price: f64,
    pub doctor_id: String,
    pub doctor_name: String,
    pub rep_name: Option<String>,
    pub hq: Option<String>,
    pub area: Option<String>,
    pub source: String,
}

impl From<MasterRecord> for FfiMasterRecord {
    fn from(record: MasterRecord) -> Self {
        Self {
            id: record.id,
            identity_code: record.identity_code.display_form(),
            facility_name: record.facility_name,
            product_name: record.product_name,
            product_key: record.product_key,
            catalog_product_id: record.catalog_product_id,
            unit_price: record.unit_price,
            doctor_id: record.doctor_id,
            doctor_name: record.doctor_name,
            rep_name: record.rep_name,
            hq: record.hq,
            area: record.area,
            source: match record.source {
                MasterSource::BulkLoaded => "bulk".to_string(),
                MasterSource::ManualMapping => "manual".to_string(),
            },
        }
    }
}

impl TryFrom<FfiMasterRecord> for MasterRecord {
    type Error = RevenueEngineError;

    fn try_from(record: FfiMasterRecord) -> Result<Self, Self::Error> {
        let identity = parse_identity(&record.identity_code)?;
        let mut master = MasterRecord::new(identity, record.product_name, record.doctor_id, record.unit_price);
        master.facility_name = record.facility_name;
        master.catalog_product_id = record.catalog_product_id;
        master.doctor_name = record.doctor_name;
        master.rep_name = record.rep_name;
        master.hq = record.hq;
        master.area = record.area;
        Ok(master)
    }
}

/// FFI-safe invoice row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiInvoiceRow {
    pub facility: String,
    pub product: String,
    pub quantity: i64,
    pub amount: Option<f64>,
}

impl From<FfiInvoiceRow> for InvoiceRow {
    fn from(row: FfiInvoiceRow) -> Self {
        InvoiceRow::new(row.facility, row.product, row.quantity, row.amount)
    }
}

/// FFI-safe run summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRunSummary {
    pub run_id: String,
    pub rows_processed: u64,
    pub matched: u64,
    pub single_matches: u64,
    pub split_allocated: u64,
    pub first_candidate_no_rule: u64,
    pub unmatched: u64,
    pub invalid_identity: u64,
    pub best_effort_product_matches: u64,
    pub results_written: u64,
}

impl From<RunSummary> for FfiRunSummary {
    fn from(s: RunSummary) -> Self {
        Self {
            run_id: s.run_id,
            rows_processed: s.rows_processed,
            matched: s.matched,
            single_matches: s.single_matches,
            split_allocated: s.split_allocated,
            first_candidate_no_rule: s.first_candidate_no_rule,
            unmatched: s.unmatched,
            invalid_identity: s.invalid_identity,
            best_effort_product_matches: s.best_effort_product_matches,
            results_written: s.results_written,
        }
    }
}

/// FFI-safe attributed result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAttributedResult {
    pub id: i64,
    pub row_key: String,
    pub run_id: String,
    pub identity_code: String,
    pub facility_name: String,
    pub product_name: String,
    pub quantity: i64,
    pub revenue: f64,
    pub master_record_id: Option<i64>,
    pub policy: String,
    pub split_rule_id: Option<i64>,
    pub percentage: Option<f64>,
}

impl From<AttributedResult> for FfiAttributedResult {
    fn from(r: AttributedResult) -> Self {
        Self {
            id: r.id,
            row_key: r.row_key,
            run_id: r.run_id,
            identity_code: r.identity_code.display_form(),
            facility_name: r.facility_name,
            product_name: r.product_name,
            quantity: r.quantity,
            revenue: r.revenue,
            master_record_id: r.master_record_id,
            policy: policy_name(r.policy).to_string(),
            split_rule_id: r.split_rule_id,
            percentage: r.percentage,
        }
    }
}

/// FFI-safe split entry. A missing percentage is rejected on submit.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSplitEntry {
    pub master_record_id: i64,
    pub percentage: Option<f64>,
}

impl From<FfiSplitEntry> for SplitEntry {
    fn from(entry: FfiSplitEntry) -> Self {
        SplitEntry {
            master_record_id: entry.master_record_id,
            percentage: entry.percentage,
        }
    }
}

/// FFI-safe split rule.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSplitRule {
    pub id: i64,
    pub identity_code: String,
    pub lookup_key: String,
    pub shares: Vec<FfiSplitEntry>,
    pub updated_by: Option<String>,
    pub updated_at: String,
}

impl From<SplitRule> for FfiSplitRule {
    fn from(rule: SplitRule) -> Self {
        Self {
            id: rule.id,
            identity_code: rule.identity_code.display_form(),
            lookup_key: rule.lookup_key.to_storage(),
            shares: rule
                .shares
                .iter()
                .map(|s| FfiSplitEntry {
                    master_record_id: s.master_record_id,
                    percentage: Some(s.percentage),
                })
                .collect(),
            updated_by: rule.updated_by,
            updated_at: rule.updated_at,
        }
    }
}

/// FFI-safe reapplication report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiReapplyReport {
    pub rule_id: i64,
    pub rows_reprocessed: u64,
    pub rows_failed: u64,
    pub shares_skipped: u64,
}

impl From<ReapplyReport> for FfiReapplyReport {
    fn from(r: ReapplyReport) -> Self {
        Self {
            rule_id: r.rule_id,
            rows_reprocessed: r.rows_reprocessed,
            rows_failed: r.rows_failed,
            shares_skipped: r.shares_skipped,
        }
    }
}

/// Stored rule plus what reapplying it changed.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSplitRuleOutcome {
    pub rule: FfiSplitRule,
    pub report: FfiReapplyReport,
}

/// FFI-safe unmatched record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUnmatchedRecord {
    pub id: i64,
    pub run_id: String,
    pub row_key: String,
    pub facility_text: String,
    pub identity: String,
    pub product_text: String,
    pub quantity: i64,
    pub amount: Option<f64>,
    pub reason: String,
    pub status: String,
    pub mapped_to: Option<String>,
}

impl From<UnmatchedRecord> for FfiUnmatchedRecord {
    fn from(r: UnmatchedRecord) -> Self {
        Self {
            id: r.id,
            run_id: r.run_id,
            row_key: r.row_key,
            facility_text: r.facility_text,
            identity: r.identity.to_string(),
            product_text: r.product_text,
            quantity: r.quantity,
            amount: r.amount,
            reason: match r.reason {
                UnmatchedReason::InvalidFacility => "invalid_facility",
                UnmatchedReason::ProductNotResolved => "product_not_resolved",
                UnmatchedReason::NoMasterRecord => "no_master_record",
            }
            .to_string(),
            status: match r.status {
                UnmatchedStatus::Pending => "pending",
                UnmatchedStatus::Mapped => "mapped",
                UnmatchedStatus::Ignored => "ignored",
            }
            .to_string(),
            mapped_to: r.mapped_to.map(|c| c.display_form()),
        }
    }
}

/// Unmatched rows per status.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUnmatchedCounts {
    pub pending: u64,
    pub mapped: u64,
    pub ignored: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Arc<RevenueEngine> {
        open_engine_in_memory().unwrap()
    }

    fn master(identity: &str, product: &str, doctor: &str) -> FfiMasterRecord {
        FfiMasterRecord {
            id: 0,
            identity_code: identity.to_string(),
            facility_name: String::new(),
            product_name: product.to_string(),
            product_key: String::new(),
            catalog_product_id: None,
            unit_price: 37.23,
            doctor_id: doctor.to_string(),
            doctor_name: String::new(),
            rep_name: None,
            hq: None,
            area: None,
            source: String::new(),
        }
    }

    fn row(facility: &str, product: &str, quantity: i64) -> FfiInvoiceRow {
        FfiInvoiceRow {
            facility: facility.to_string(),
            product: product.to_string(),
            quantity,
            amount: None,
        }
    }

    #[test]
    fn test_reconcile_through_ffi() {
        let engine = engine();
        let identity = facility_identity("Gayathri Medicals".into());
        assert_eq!(identity, "GAYATHRIME-RIMEDICALS");

        engine
            .upsert_catalog_entry(FfiCatalogEntry {
                id: 7,
                name: "FLOK 20".into(),
                unit_price: 37.23,
            })
            .unwrap();
        engine.add_master_record(master(&identity, "FLOK 20", "D1")).unwrap();

        let run_id = new_run_id();
        let summary = engine
            .reconcile(run_id.clone(), vec![row("Gayathri Medicals", "FLOK-20", 10)])
            .unwrap();
        assert_eq!(summary.single_matches, 1);

        let results = engine.results_for_run(run_id).unwrap();
        assert_eq!(results[0].identity_code, "GAYATHRIME-RIMEDICALS");
        assert_eq!(results[0].policy, "single");
    }

    #[test]
    fn test_split_rule_errors_map_to_invalid_input() {
        let engine = engine();
        let a = engine.add_master_record(master("PHARMA", "FLOK 20", "A")).unwrap();

        let err = engine
            .create_split_rule(
                "PHARMA".into(),
                "EXACT|FLOK20".into(),
                vec![FfiSplitEntry {
                    master_record_id: a,
                    percentage: Some(80.0),
                }],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, RevenueEngineError::InvalidInput(_)));

        let err = engine
            .create_split_rule("PHARMA".into(), "FLOK20".into(), vec![], None)
            .unwrap_err();
        assert!(matches!(err, RevenueEngineError::InvalidInput(_)));
        assert!(engine.list_split_rules().unwrap().is_empty());
    }

    #[test]
    fn test_unmatched_queue_through_ffi() {
        let engine = engine();
        engine
            .reconcile("run-1".into(), vec![row("", "FLOK 20", 1), row("Somewhere", "FLOK 20", 1)])
            .unwrap();

        let counts = engine.count_unmatched().unwrap();
        assert_eq!(counts.pending, 2);

        let invalid = engine.search_unmatched("FLOK".into(), 10).unwrap();
        assert_eq!(invalid.len(), 2);
        assert_eq!(invalid[0].identity, "INVALID");
        assert_eq!(invalid[0].reason, "invalid_facility");

        engine.ignore_unmatched(invalid[0].id).unwrap();
        assert_eq!(engine.list_unmatched(Some("ignored".into())).unwrap().len(), 1);
        assert!(matches!(
            engine.list_unmatched(Some("lost".into())),
            Err(RevenueEngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bad_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db").to_string_lossy().to_string();
        let err = open_engine_with_config(path, r#"{"chunk_size": 0}"#.into()).err().unwrap();
        assert!(matches!(err, RevenueEngineError::ConfigError(_)));
    }
}
