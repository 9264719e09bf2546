//! Reconciliation engine.
//!
//! - [`reconcile`]: invoice batch → results and unmatched records
//! - [`split_rules`]: split rule administration and retroactive reapplication
//! - [`unmatched`]: manual mapping workflow
//! - [`allocator`], [`index`], [`plan`]: pure pieces shared by the above

pub mod allocator;
pub mod index;
pub mod plan;
pub mod reconcile;
pub mod split_rules;
pub mod unmatched;

pub use allocator::{allocate, validate_shares, Allocation, SplitRuleError};
pub use index::{MasterIndex, RuleBook};
pub use plan::{Attribution, PlanContext};
pub use reconcile::Reconciler;
pub use split_rules::SplitRuleService;
pub use unmatched::UnmatchedWorkflow;

use thiserror::Error;

use crate::db::DbError;

/// Engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid split rule: {0}")]
    SplitRule(#[from] SplitRuleError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(DbError::from(e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
