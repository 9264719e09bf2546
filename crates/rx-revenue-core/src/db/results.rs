//! Attributed result database operations.

use rusqlite::{params, Row};

use super::{now, Database, DbError, DbResult};
use crate::models::{AllocationPolicy, AttributedResult};
use crate::resolver::IdentityCode;

const RESULT_COLUMNS: &str = r#"
    id, row_key, run_id, identity_code, facility_name, product_name, quantity, revenue,
    master_record_id, policy, split_rule_id, percentage
"#;

impl Database {
    /// Insert a result and return its id.
    pub fn insert_result(&self, result: &AttributedResult) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO results (
                row_key, run_id, identity_code, facility_name, product_name, quantity, revenue,
                master_record_id, policy, split_rule_id, percentage, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                result.row_key,
                result.run_id,
                result.identity_code.as_str(),
                result.facility_name,
                result.product_name,
                result.quantity,
                result.revenue,
                result.master_record_id,
                policy_to_string(&result.policy),
                result.split_rule_id,
                result.percentage,
                now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Results of one run, in write order.
    pub fn list_results_for_run(&self, run_id: &str) -> DbResult<Vec<AttributedResult>> {
        let sql = format!("SELECT {} FROM results WHERE run_id = ? ORDER BY id", RESULT_COLUMNS);
        self.query_results(&sql, [run_id])
    }

    /// Results produced by one source row.
    pub fn list_results_for_row(&self, row_key: &str) -> DbResult<Vec<AttributedResult>> {
        let sql = format!("SELECT {} FROM results WHERE row_key = ? ORDER BY id", RESULT_COLUMNS);
        self.query_results(&sql, [row_key])
    }

    /// Every result.
    pub fn list_all_results(&self) -> DbResult<Vec<AttributedResult>> {
        let sql = format!("SELECT {} FROM results ORDER BY id", RESULT_COLUMNS);
        self.query_results(&sql, [])
    }

    /// Delete the results of one source row.
    pub fn delete_results_for_row(&self, row_key: &str) -> DbResult<usize> {
        Ok(self.conn.execute("DELETE FROM results WHERE row_key = ?", [row_key])?)
    }

    /// Source rows that currently hold shares of a split rule.
    pub fn list_row_keys_for_split_rule(&self, rule_id: i64) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT row_key FROM results WHERE split_rule_id = ? ORDER BY row_key",
        )?;
        let rows = stmt.query_map([rule_id], |row| row.get(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn query_results<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<AttributedResult>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, result_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.try_into()?);
        }
        Ok(out)
    }
}

/// Intermediate struct for database row mapping.
struct ResultRow {
    id: i64,
    row_key: String,
    run_id: String,
    identity_code: String,
    facility_name: String,
    product_name: String,
    quantity: i64,
    revenue: f64,
    master_record_id: Option<i64>,
    policy: String,
    split_rule_id: Option<i64>,
    percentage: Option<f64>,
}

fn result_row(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        id: row.get(0)?,
        row_key: row.get(1)?,
        run_id: row.get(2)?,
        identity_code: row.get(3)?,
        facility_name: row.get(4)?,
        product_name: row.get(5)?,
        quantity: row.get(6)?,
        revenue: row.get(7)?,
        master_record_id: row.get(8)?,
        policy: row.get(9)?,
        split_rule_id: row.get(10)?,
        percentage: row.get(11)?,
    })
}

impl TryFrom<ResultRow> for AttributedResult {
    type Error = DbError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let identity_code = IdentityCode::parse(&row.identity_code)
            .ok_or_else(|| DbError::Constraint(format!("Result {} has no valid identity", row.id)))?;

        Ok(AttributedResult {
            id: row.id,
            row_key: row.row_key,
            run_id: row.run_id,
            identity_code,
            facility_name: row.facility_name,
            product_name: row.product_name,
            quantity: row.quantity,
            revenue: row.revenue,
            master_record_id: row.master_record_id,
            policy: string_to_policy(&row.policy)?,
            split_rule_id: row.split_rule_id,
            percentage: row.percentage,
        })
    }
}

fn policy_to_string(policy: &AllocationPolicy) -> &'static str {
    match policy {
        AllocationPolicy::Single => "single",
        AllocationPolicy::SplitRule => "split_rule",
        AllocationPolicy::FirstCandidateNoRule => "first_candidate_no_rule",
        AllocationPolicy::Manual => "manual",
    }
}

fn string_to_policy(s: &str) -> Result<AllocationPolicy, DbError> {
    match s {
        "single" => Ok(AllocationPolicy::Single),
        "split_rule" => Ok(AllocationPolicy::SplitRule),
        "first_candidate_no_rule" => Ok(AllocationPolicy::FirstCandidateNoRule),
        "manual" => Ok(AllocationPolicy::Manual),
        _ => Err(DbError::Constraint(format!("Unknown allocation policy: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceRow;
    use crate::resolver::Identity;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_source_row(&SourceRow {
            row_key: "k1".into(),
            run_id: "run-1".into(),
            row_index: 0,
            facility_text: "A".into(),
            product_text: "X".into(),
            quantity: 10,
            amount: Some(1000.0),
            identity: Identity::from_storage("A"),
            product_key: "X".into(),
            lookup_key: None,
            catalog_product_id: None,
            manual_master_id: None,
        })
        .unwrap();
        db
    }

    fn share(quantity: i64, revenue: f64, rule: Option<i64>) -> AttributedResult {
        AttributedResult {
            id: 0,
            row_key: "k1".into(),
            run_id: "run-1".into(),
            identity_code: IdentityCode::parse("A").unwrap(),
            facility_name: "A".into(),
            product_name: "X".into(),
            quantity,
            revenue,
            master_record_id: None,
            policy: if rule.is_some() { AllocationPolicy::SplitRule } else { AllocationPolicy::Single },
            split_rule_id: rule,
            percentage: None,
        }
    }

    #[test]
    fn test_insert_and_list() {
        let db = setup_db();
        let id = db.insert_result(&share(6, 600.0, Some(1))).unwrap();
        db.insert_result(&share(4, 400.0, Some(1))).unwrap();

        let results = db.list_results_for_row("k1").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].policy, AllocationPolicy::SplitRule);
        assert_eq!(db.list_results_for_run("run-1").unwrap().len(), 2);
        assert_eq!(db.list_row_keys_for_split_rule(1).unwrap(), vec!["k1".to_string()]);
        assert!(db.list_row_keys_for_split_rule(2).unwrap().is_empty());
    }

    #[test]
    fn test_delete_for_row() {
        let db = setup_db();
        db.insert_result(&share(10, 1000.0, None)).unwrap();
        assert_eq!(db.delete_results_for_row("k1").unwrap(), 1);
        assert!(db.list_all_results().unwrap().is_empty());
    }

    #[test]
    fn test_clear_run_cascades() {
        let db = setup_db();
        db.insert_result(&share(10, 1000.0, None)).unwrap();
        assert_eq!(db.clear_run("run-1").unwrap(), 1);
        assert!(db.list_all_results().unwrap().is_empty());
    }
}
