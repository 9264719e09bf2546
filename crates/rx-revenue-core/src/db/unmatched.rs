//! Unmatched record database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{now, Database, DbError, DbResult};
use crate::models::{UnmatchedReason, UnmatchedRecord, UnmatchedStatus};
use crate::resolver::{Identity, IdentityCode};

const UNMATCHED_COLUMNS: &str = r#"
    id, run_id, row_key, facility_text, identity_code, product_text, quantity, amount,
    reason, status, mapped_to
"#;

impl Database {
    /// Insert an unmatched record and return its id.
    pub fn insert_unmatched(&self, record: &UnmatchedRecord) -> DbResult<i64> {
        let timestamp = now();
        self.conn.execute(
            r#"
            INSERT INTO unmatched_records (
                run_id, row_key, facility_text, identity_code, product_text, quantity, amount,
                reason, status, mapped_to, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
            params![
                record.run_id,
                record.row_key,
                record.facility_text,
                record.identity.storage_form(),
                record.product_text,
                record.quantity,
                record.amount,
                reason_to_string(&record.reason),
                status_to_string(&record.status),
                record.mapped_to.as_ref().map(|c| c.as_str().to_string()),
                timestamp,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get an unmatched record by id.
    pub fn get_unmatched(&self, id: i64) -> DbResult<Option<UnmatchedRecord>> {
        let sql = format!("SELECT {} FROM unmatched_records WHERE id = ?", UNMATCHED_COLUMNS);
        let row = self.conn.query_row(&sql, [id], unmatched_row).optional()?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Unmatched records, optionally filtered by status, oldest first.
    pub fn list_unmatched(&self, status: Option<UnmatchedStatus>) -> DbResult<Vec<UnmatchedRecord>> {
        match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM unmatched_records WHERE status = ? ORDER BY id",
                    UNMATCHED_COLUMNS
                );
                self.query_unmatched(&sql, [status_to_string(&status)])
            }
            None => {
                let sql = format!("SELECT {} FROM unmatched_records ORDER BY id", UNMATCHED_COLUMNS);
                self.query_unmatched(&sql, [])
            }
        }
    }

    /// Unmatched records of one run.
    pub fn list_unmatched_for_run(&self, run_id: &str) -> DbResult<Vec<UnmatchedRecord>> {
        let sql = format!(
            "SELECT {} FROM unmatched_records WHERE run_id = ? ORDER BY id",
            UNMATCHED_COLUMNS
        );
        self.query_unmatched(&sql, [run_id])
    }

    /// Case-insensitive substring search over facility and product text.
    pub fn search_unmatched(&self, term: &str, limit: usize) -> DbResult<Vec<UnmatchedRecord>> {
        let pattern = format!("%{}%", escape_like(term.trim()));
        let sql = format!(
            r#"
            SELECT {} FROM unmatched_records
            WHERE facility_text LIKE ?1 ESCAPE '\' OR product_text LIKE ?1 ESCAPE '\'
            ORDER BY id
            LIMIT ?2
            "#,
            UNMATCHED_COLUMNS
        );
        self.query_unmatched(&sql, params![pattern, limit as i64])
    }

    /// Count of records per status: (pending, mapped, ignored).
    pub fn count_unmatched_by_status(&self) -> DbResult<(u64, u64, u64)> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM unmatched_records GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let (mut pending, mut mapped, mut ignored) = (0, 0, 0);
        for row in rows {
            let (status, count) = row?;
            match string_to_status(&status)? {
                UnmatchedStatus::Pending => pending = count as u64,
                UnmatchedStatus::Mapped => mapped = count as u64,
                UnmatchedStatus::Ignored => ignored = count as u64,
            }
        }
        Ok((pending, mapped, ignored))
    }

    /// Set status and mapping target.
    pub fn update_unmatched_status(
        &self,
        id: i64,
        status: UnmatchedStatus,
        mapped_to: Option<&IdentityCode>,
    ) -> DbResult<()> {
        let updated = self.conn.execute(
            r#"
            UPDATE unmatched_records
            SET status = ?2, mapped_to = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
            params![
                id,
                status_to_string(&status),
                mapped_to.map(|c| c.as_str().to_string()),
                now(),
            ],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("Unmatched record {}", id)));
        }
        Ok(())
    }

    fn query_unmatched<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<UnmatchedRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, unmatched_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.try_into()?);
        }
        Ok(out)
    }
}

/// Intermediate struct for database row mapping.
struct UnmatchedRow {
    id: i64,
    run_id: String,
    row_key: String,
    facility_text: String,
    identity_code: String,
    product_text: String,
    quantity: i64,
    amount: Option<f64>,
    reason: String,
    status: String,
    mapped_to: Option<String>,
}

fn unmatched_row(row: &Row<'_>) -> rusqlite::Result<UnmatchedRow> {
    Ok(UnmatchedRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        row_key: row.get(2)?,
        facility_text: row.get(3)?,
        identity_code: row.get(4)?,
        product_text: row.get(5)?,
        quantity: row.get(6)?,
        amount: row.get(7)?,
        reason: row.get(8)?,
        status: row.get(9)?,
        mapped_to: row.get(10)?,
    })
}

impl TryFrom<UnmatchedRow> for UnmatchedRecord {
    type Error = DbError;

    fn try_from(row: UnmatchedRow) -> Result<Self, Self::Error> {
        Ok(UnmatchedRecord {
            id: row.id,
            run_id: row.run_id,
            row_key: row.row_key,
            facility_text: row.facility_text,
            identity: Identity::from_storage(&row.identity_code),
            product_text: row.product_text,
            quantity: row.quantity,
            amount: row.amount,
            reason: string_to_reason(&row.reason)?,
            status: string_to_status(&row.status)?,
            mapped_to: row.mapped_to.as_deref().and_then(IdentityCode::parse),
        })
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn status_to_string(status: &UnmatchedStatus) -> &'static str {
    match status {
        UnmatchedStatus::Pending => "pending",
        UnmatchedStatus::Mapped => "mapped",
        UnmatchedStatus::Ignored => "ignored",
    }
}

fn string_to_status(s: &str) -> Result<UnmatchedStatus, DbError> {
    match s {
        "pending" => Ok(UnmatchedStatus::Pending),
        "mapped" => Ok(UnmatchedStatus::Mapped),
        "ignored" => Ok(UnmatchedStatus::Ignored),
        _ => Err(DbError::Constraint(format!("Unknown unmatched status: {}", s))),
    }
}

fn reason_to_string(reason: &UnmatchedReason) -> &'static str {
    match reason {
        UnmatchedReason::InvalidFacility => "invalid_facility",
        UnmatchedReason::ProductNotResolved => "product_not_resolved",
        UnmatchedReason::NoMasterRecord => "no_master_record",
    }
}

fn string_to_reason(s: &str) -> Result<UnmatchedReason, DbError> {
    match s {
        "invalid_facility" => Ok(UnmatchedReason::InvalidFacility),
        "product_not_resolved" => Ok(UnmatchedReason::ProductNotResolved),
        "no_master_record" => Ok(UnmatchedReason::NoMasterRecord),
        _ => Err(DbError::Constraint(format!("Unknown unmatched reason: {}", s))),
    }
}
