//! Source row database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{now, Database, DbError, DbResult};
use crate::models::{LookupKey, SourceRow};
use crate::resolver::{Identity, IdentityCode};

const SOURCE_COLUMNS: &str = r#"
    row_key, run_id, row_index, facility_text, product_text, quantity, amount,
    identity_code, product_key, lookup_key, catalog_product_id, manual_master_id
"#;

impl Database {
    /// Insert a source row.
    pub fn insert_source_row(&self, row: &SourceRow) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO source_rows (
                row_key, run_id, row_index, facility_text, product_text, quantity, amount,
                identity_code, product_key, lookup_key, catalog_product_id, manual_master_id,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                row.row_key,
                row.run_id,
                row.row_index,
                row.facility_text,
                row.product_text,
                row.quantity,
                row.amount,
                row.identity.storage_form(),
                row.product_key,
                row.lookup_key.as_ref().map(|k| k.to_storage()),
                row.catalog_product_id,
                row.manual_master_id,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Get a source row by key.
    pub fn get_source_row(&self, row_key: &str) -> DbResult<Option<SourceRow>> {
        let sql = format!("SELECT {} FROM source_rows WHERE row_key = ?", SOURCE_COLUMNS);
        let row = self.conn.query_row(&sql, [row_key], source_row).optional()?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Rows of one run in input order.
    pub fn list_source_rows_for_run(&self, run_id: &str) -> DbResult<Vec<SourceRow>> {
        let sql = format!(
            "SELECT {} FROM source_rows WHERE run_id = ? ORDER BY row_index",
            SOURCE_COLUMNS
        );
        self.query_source_rows(&sql, [run_id])
    }

    /// Matched rows currently attributed to one pharmacy, across runs.
    pub fn list_matched_rows_for_identity(&self, identity: &IdentityCode) -> DbResult<Vec<SourceRow>> {
        let sql = format!(
            r#"
            SELECT {} FROM source_rows
            WHERE identity_code = ? AND lookup_key IS NOT NULL
            ORDER BY run_id, row_index
            "#,
            SOURCE_COLUMNS
        );
        self.query_source_rows(&sql, [identity.as_str()])
    }

    /// Re-point a row at an identity and lookup key.
    pub fn update_source_row_attribution(
        &self,
        row_key: &str,
        identity: &Identity,
        lookup_key: Option<&LookupKey>,
        manual_master_id: Option<i64>,
    ) -> DbResult<()> {
        let updated = self.conn.execute(
            r#"
            UPDATE source_rows
            SET identity_code = ?2, lookup_key = ?3, manual_master_id = ?4
            WHERE row_key = ?1
            "#,
            params![
                row_key,
                identity.storage_form(),
                lookup_key.map(|k| k.to_storage()),
                manual_master_id,
            ],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("Source row {}", row_key)));
        }
        Ok(())
    }

    fn query_source_rows<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<SourceRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, source_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.try_into()?);
        }
        Ok(out)
    }
}

/// Intermediate struct for database row mapping.
struct SourceRowRecord {
    row_key: String,
    run_id: String,
    row_index: i64,
    facility_text: String,
    product_text: String,
    quantity: i64,
    amount: Option<f64>,
    identity_code: String,
    product_key: String,
    lookup_key: Option<String>,
    catalog_product_id: Option<i64>,
    manual_master_id: Option<i64>,
}

fn source_row(row: &Row<'_>) -> rusqlite::Result<SourceRowRecord> {
    Ok(SourceRowRecord {
        row_key: row.get(0)?,
        run_id: row.get(1)?,
        row_index: row.get(2)?,
        facility_text: row.get(3)?,
        product_text: row.get(4)?,
        quantity: row.get(5)?,
        amount: row.get(6)?,
        identity_code: row.get(7)?,
        product_key: row.get(8)?,
        lookup_key: row.get(9)?,
        catalog_product_id: row.get(10)?,
        manual_master_id: row.get(11)?,
    })
}

impl TryFrom<SourceRowRecord> for SourceRow {
    type Error = DbError;

    fn try_from(row: SourceRowRecord) -> Result<Self, Self::Error> {
        let lookup_key = row
            .lookup_key
            .map(|raw| {
                LookupKey::from_storage(&raw)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown lookup key: {}", raw)))
            })
            .transpose()?;

        Ok(SourceRow {
            row_key: row.row_key,
            run_id: row.run_id,
            row_index: row.row_index,
            facility_text: row.facility_text,
            product_text: row.product_text,
            quantity: row.quantity,
            amount: row.amount,
            identity: Identity::from_storage(&row.identity_code),
            product_key: row.product_key,
            lookup_key,
            catalog_product_id: row.catalog_product_id,
            manual_master_id: row.manual_master_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::derive_identity;

    fn sample(row_key: &str, index: i64, lookup_key: Option<LookupKey>) -> SourceRow {
        SourceRow {
            row_key: row_key.into(),
            run_id: "run-1".into(),
            row_index: index,
            facility_text: "Gayathri Medicals".into(),
            product_text: "FLOK 20".into(),
            quantity: 10,
            amount: None,
            identity: derive_identity("Gayathri Medicals"),
            product_key: "FLOK20".into(),
            lookup_key,
            catalog_product_id: None,
            manual_master_id: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let row = sample("k1", 0, Some(LookupKey::Exact("FLOK20".into())));
        db.insert_source_row(&row).unwrap();

        assert_eq!(db.get_source_row("k1").unwrap().unwrap(), row);
        assert!(db.get_source_row("nope").unwrap().is_none());
    }

    #[test]
    fn test_matched_rows_for_identity() {
        let db = Database::open_in_memory().unwrap();
        db.insert_source_row(&sample("k1", 0, Some(LookupKey::CatalogId(7)))).unwrap();
        db.insert_source_row(&sample("k2", 1, None)).unwrap();

        let identity = derive_identity("Gayathri Medicals");
        let rows = db.list_matched_rows_for_identity(identity.code().unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_key, "k1");
        assert_eq!(db.list_source_rows_for_run("run-1").unwrap().len(), 2);
    }

    #[test]
    fn test_update_attribution() {
        let db = Database::open_in_memory().unwrap();
        db.insert_source_row(&sample("k1", 0, None)).unwrap();

        let target = Identity::Valid(IdentityCode::parse("APOLLOPHAR_OPHARMACY").unwrap());
        let key = LookupKey::Exact("FLOK20".into());
        db.update_source_row_attribution("k1", &target, Some(&key), Some(3)).unwrap();

        let row = db.get_source_row("k1").unwrap().unwrap();
        assert_eq!(row.identity, target);
        assert_eq!(row.lookup_key, Some(key));
        assert_eq!(row.manual_master_id, Some(3));

        let err = db
            .update_source_row_attribution("missing", &target, None, None)
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }
}
