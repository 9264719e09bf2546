//! Split rule database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{now, Database, DbError, DbResult};
use crate::models::{LookupKey, SplitRule, SplitShare};
use crate::resolver::IdentityCode;

const RULE_COLUMNS: &str = "id, identity_code, lookup_key, shares, updated_by, updated_at";

impl Database {
    /// Insert or replace the rule for (identity, key). Returns the rule id.
    ///
    /// Shares must already be validated.
    pub fn upsert_split_rule(
        &self,
        identity: &IdentityCode,
        lookup_key: &LookupKey,
        shares: &[SplitShare],
        updated_by: Option<&str>,
    ) -> DbResult<i64> {
        let shares_json = serde_json::to_string(shares)?;
        let timestamp = now();

        self.conn.execute(
            r#"
            INSERT INTO split_rules (identity_code, lookup_key, shares, updated_by, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(identity_code, lookup_key) DO UPDATE SET
                shares = excluded.shares,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at
            "#,
            params![identity.as_str(), lookup_key.to_storage(), shares_json, updated_by, timestamp],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM split_rules WHERE identity_code = ?1 AND lookup_key = ?2",
            params![identity.as_str(), lookup_key.to_storage()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Replace the shares of an existing rule.
    pub fn update_split_rule_shares(&self, id: i64, shares: &[SplitShare], updated_by: Option<&str>) -> DbResult<()> {
        let shares_json = serde_json::to_string(shares)?;
        let updated = self.conn.execute(
            "UPDATE split_rules SET shares = ?2, updated_by = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, shares_json, updated_by, now()],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("Split rule {}", id)));
        }
        Ok(())
    }

    /// Get a split rule by id.
    pub fn get_split_rule(&self, id: i64) -> DbResult<Option<SplitRule>> {
        let sql = format!("SELECT {} FROM split_rules WHERE id = ?", RULE_COLUMNS);
        let row = self.conn.query_row(&sql, [id], rule_row).optional()?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Get the rule for an exact (identity, key) pair.
    pub fn get_split_rule_by_key(&self, identity: &IdentityCode, lookup_key: &LookupKey) -> DbResult<Option<SplitRule>> {
        let sql = format!(
            "SELECT {} FROM split_rules WHERE identity_code = ?1 AND lookup_key = ?2",
            RULE_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![identity.as_str(), lookup_key.to_storage()], rule_row)
            .optional()?;
        row.map(|r| r.try_into()).transpose()
    }

    /// All split rules, oldest first.
    pub fn list_split_rules(&self) -> DbResult<Vec<SplitRule>> {
        let sql = format!("SELECT {} FROM split_rules ORDER BY id", RULE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], rule_row)?;

        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?.try_into()?);
        }
        Ok(rules)
    }

    /// Delete a split rule. Returns whether it existed.
    pub fn delete_split_rule(&self, id: i64) -> DbResult<bool> {
        let deleted = self.conn.execute("DELETE FROM split_rules WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }
}

/// Intermediate struct for database row mapping.
struct SplitRuleRow {
    id: i64,
    identity_code: String,
    lookup_key: String,
    shares: String,
    updated_by: Option<String>,
    updated_at: String,
}

fn rule_row(row: &Row<'_>) -> rusqlite::Result<SplitRuleRow> {
    Ok(SplitRuleRow {
        id: row.get(0)?,
        identity_code: row.get(1)?,
        lookup_key: row.get(2)?,
        shares: row.get(3)?,
        updated_by: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl TryFrom<SplitRuleRow> for SplitRule {
    type Error = DbError;

    fn try_from(row: SplitRuleRow) -> Result<Self, Self::Error> {
        let identity_code = IdentityCode::parse(&row.identity_code)
            .ok_or_else(|| DbError::Constraint(format!("Split rule {} has no valid identity", row.id)))?;
        let lookup_key = LookupKey::from_storage(&row.lookup_key)
            .ok_or_else(|| DbError::Constraint(format!("Unknown lookup key: {}", row.lookup_key)))?;

        Ok(SplitRule {
            id: row.id,
            identity_code,
            lookup_key,
            shares: serde_json::from_str(&row.shares)?,
            updated_by: row.updated_by,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares(a: f64, b: f64) -> Vec<SplitShare> {
        vec![
            SplitShare { master_record_id: 1, percentage: a },
            SplitShare { master_record_id: 2, percentage: b },
        ]
    }

    #[test]
    fn test_upsert_replaces_by_key() {
        let db = Database::open_in_memory().unwrap();
        let identity = IdentityCode::parse("ABC").unwrap();
        let key = LookupKey::Exact("DOLO650".into());

        let first = db.upsert_split_rule(&identity, &key, &shares(60.0, 40.0), Some("admin")).unwrap();
        let second = db.upsert_split_rule(&identity, &key, &shares(50.0, 50.0), None).unwrap();
        assert_eq!(first, second);

        let rule = db.get_split_rule_by_key(&identity, &key).unwrap().unwrap();
        assert_eq!(rule.shares, shares(50.0, 50.0));
        assert_eq!(rule.updated_by, None);
        assert_eq!(db.list_split_rules().unwrap().len(), 1);
    }

    #[test]
    fn test_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let identity = IdentityCode::parse("ABC").unwrap();
        let id = db
            .upsert_split_rule(&identity, &LookupKey::CatalogId(7), &shares(60.0, 40.0), None)
            .unwrap();

        db.update_split_rule_shares(id, &shares(70.0, 30.0), Some("ops")).unwrap();
        let rule = db.get_split_rule(id).unwrap().unwrap();
        assert_eq!(rule.shares[0].percentage, 70.0);
        assert_eq!(rule.lookup_key, LookupKey::CatalogId(7));

        assert!(db.delete_split_rule(id).unwrap());
        assert!(db.get_split_rule(id).unwrap().is_none());
        assert!(matches!(
            db.update_split_rule_shares(id, &shares(50.0, 50.0), None),
            Err(DbError::NotFound(_))
        ));
    }
}
