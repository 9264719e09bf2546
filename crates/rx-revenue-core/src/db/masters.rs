//! Master record database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{now, Database, DbError, DbResult};
use crate::models::{MasterRecord, MasterSource};
use crate::resolver::IdentityCode;

const MASTER_COLUMNS: &str = r#"
    id, identity_code, facility_name, product_name, product_key, catalog_product_id,
    unit_price, doctor_id, doctor_name, rep_name, hq, area, source, origin_unmatched_id
"#;

impl Database {
    /// Insert a master record and return its id.
    pub fn insert_master_record(&self, record: &MasterRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO master_records (
                identity_code, facility_name, product_name, product_key, catalog_product_id,
                unit_price, doctor_id, doctor_name, rep_name, hq, area, source,
                origin_unmatched_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                record.identity_code.as_str(),
                record.facility_name,
                record.product_name,
                record.product_key,
                record.catalog_product_id,
                record.unit_price,
                record.doctor_id,
                record.doctor_name,
                record.rep_name,
                record.hq,
                record.area,
                source_to_string(&record.source),
                record.origin_unmatched_id,
                now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a master record by id.
    pub fn get_master_record(&self, id: i64) -> DbResult<Option<MasterRecord>> {
        let sql = format!("SELECT {} FROM master_records WHERE id = ?", MASTER_COLUMNS);
        let row = self.conn.query_row(&sql, [id], master_row).optional()?;
        row.map(|r| r.try_into()).transpose()
    }

    /// All master records, oldest first.
    pub fn list_master_records(&self) -> DbResult<Vec<MasterRecord>> {
        let sql = format!("SELECT {} FROM master_records ORDER BY id", MASTER_COLUMNS);
        self.query_masters(&sql, [])
    }

    /// Master records of one pharmacy, oldest first.
    pub fn list_masters_by_identity(&self, identity: &IdentityCode) -> DbResult<Vec<MasterRecord>> {
        let sql = format!(
            "SELECT {} FROM master_records WHERE identity_code = ? ORDER BY id",
            MASTER_COLUMNS
        );
        self.query_masters(&sql, [identity.as_str()])
    }

    /// Find a record with the same pharmacy, product key and doctor.
    pub fn find_master_variant(
        &self,
        identity: &IdentityCode,
        product_key: &str,
        doctor_id: &str,
    ) -> DbResult<Option<MasterRecord>> {
        let sql = format!(
            r#"
            SELECT {} FROM master_records
            WHERE identity_code = ?1 AND product_key = ?2 AND doctor_id = ?3
            ORDER BY id
            LIMIT 1
            "#,
            MASTER_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![identity.as_str(), product_key, doctor_id], master_row)
            .optional()?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Ids from `ids` with no master record.
    pub fn missing_master_ids(&self, ids: &[i64]) -> DbResult<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM master_records WHERE id = ?")?;
        let mut missing = Vec::new();
        for &id in ids {
            if !stmt.exists([id])? {
                missing.push(id);
            }
        }
        Ok(missing)
    }

    /// Delete a master record. Results referencing it keep their numbers but lose the link.
    pub fn delete_master_record(&self, id: i64) -> DbResult<bool> {
        let deleted = self.conn.execute("DELETE FROM master_records WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    /// Delete learned records of one unmatched mapping that no result references.
    ///
    /// Returns `(deleted, kept)`.
    pub fn delete_unreferenced_learned_masters(&self, unmatched_id: i64) -> DbResult<(usize, usize)> {
        let deleted = self.conn.execute(
            r#"
            DELETE FROM master_records
            WHERE origin_unmatched_id = ?1
              AND NOT EXISTS (SELECT 1 FROM results r WHERE r.master_record_id = master_records.id)
            "#,
            [unmatched_id],
        )?;
        let kept: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM master_records WHERE origin_unmatched_id = ?",
            [unmatched_id],
            |row| row.get(0),
        )?;
        Ok((deleted, kept as usize))
    }

    /// Remove every master record.
    pub fn clear_master_records(&self) -> DbResult<usize> {
        Ok(self.conn.execute("DELETE FROM master_records", [])?)
    }

    fn query_masters<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<MasterRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, master_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }
}

/// Intermediate struct for database row mapping.
struct MasterRow {
    id: i64,
    identity_code: String,
    facility_name: String,
    product_name: String,
    product_key: String,
    catalog_product_id: Option<i64>,
    unit_price: f64,
    doctor_id: String,
    doctor_name: String,
    rep_name: Option<String>,
    hq: Option<String>,
    area: Option<String>,
    source: String,
    origin_unmatched_id: Option<i64>,
}

fn master_row(row: &Row<'_>) -> rusqlite::Result<MasterRow> {
    Ok(MasterRow {
        id: row.get(0)?,
        identity_code: row.get(1)?,
        facility_name: row.get(2)?,
        product_name: row.get(3)?,
        product_key: row.get(4)?,
        catalog_product_id: row.get(5)?,
        unit_price: row.get(6)?,
        doctor_id: row.get(7)?,
        doctor_name: row.get(8)?,
        rep_name: row.get(9)?,
        hq: row.get(10)?,
        area: row.get(11)?,
        source: row.get(12)?,
        origin_unmatched_id: row.get(13)?,
    })
}

impl TryFrom<MasterRow> for MasterRecord {
    type Error = DbError;

    fn try_from(row: MasterRow) -> Result<Self, Self::Error> {
        let identity_code = IdentityCode::parse(&row.identity_code).ok_or_else(|| {
            DbError::Constraint(format!("Master record {} has no valid identity", row.id))
        })?;

        Ok(MasterRecord {
            id: row.id,
            identity_code,
            facility_name: row.facility_name,
            product_name: row.product_name,
            product_key: row.product_key,
            catalog_product_id: row.catalog_product_id,
            unit_price: row.unit_price,
            doctor_id: row.doctor_id,
            doctor_name: row.doctor_name,
            rep_name: row.rep_name,
            hq: row.hq,
            area: row.area,
            source: string_to_source(&row.source)?,
            origin_unmatched_id: row.origin_unmatched_id,
        })
    }
}

fn source_to_string(source: &MasterSource) -> &'static str {
    match source {
        MasterSource::BulkLoaded => "bulk",
        MasterSource::ManualMapping => "manual",
    }
}

fn string_to_source(s: &str) -> Result<MasterSource, DbError> {
    match s {
        "bulk" => Ok(MasterSource::BulkLoaded),
        "manual" => Ok(MasterSource::ManualMapping),
        _ => Err(DbError::Constraint(format!("Unknown master source: {}", s))),
    }
}
