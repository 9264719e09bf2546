//! Database layer for the revenue attribution engine.

mod schema;
mod catalog;
mod masters;
mod results;
mod source_rows;
mod split_rules;
mod unmatched;

pub use schema::*;
#[allow(unused_imports)]
pub use catalog::*;
#[allow(unused_imports)]
pub use masters::*;
#[allow(unused_imports)]
pub use results::*;
#[allow(unused_imports)]
pub use source_rows::*;
#[allow(unused_imports)]
pub use split_rules::*;
#[allow(unused_imports)]
pub use unmatched::*;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a savepoint: released on success, rolled back on error.
    ///
    /// Savepoints nest, so callers may wrap a chunk and each row inside it.
    pub fn with_savepoint<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("SAVEPOINT rx_sp")
            .map_err(|e| E::from(DbError::from(e)))?;

        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("RELEASE rx_sp")
                    .map_err(|e| E::from(DbError::from(e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK TO rx_sp; RELEASE rx_sp") {
                    tracing::error!(error = %rollback, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Delete everything a run derived: source rows, results, unmatched rows.
    pub fn clear_run(&self, run_id: &str) -> DbResult<usize> {
        // Results and unmatched rows cascade from their source row.
        let deleted = self
            .conn
            .execute("DELETE FROM source_rows WHERE run_id = ?", [run_id])?;
        Ok(deleted)
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revenue.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute("INSERT INTO product_catalog (id, name) VALUES (1, 'FLOK 20')", [])
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM product_catalog", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "product_catalog",
            "master_records",
            "source_rows",
            "results",
            "unmatched_records",
            "split_rules",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_savepoint_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: DbResult<()> = db.with_savepoint(|db| {
            db.conn()
                .execute("INSERT INTO product_catalog (id, name) VALUES (1, 'A')", [])?;
            Err(DbError::Constraint("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM product_catalog", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_nested_savepoints() {
        let db = Database::open_in_memory().unwrap();

        let result: DbResult<()> = db.with_savepoint(|db| {
            db.conn()
                .execute("INSERT INTO product_catalog (id, name) VALUES (1, 'A')", [])?;
            let inner: DbResult<()> = db.with_savepoint(|db| {
                db.conn()
                    .execute("INSERT INTO product_catalog (id, name) VALUES (2, 'B')", [])?;
                Err(DbError::Constraint("inner".into()))
            });
            assert!(inner.is_err());
            Ok(())
        });
        assert!(result.is_ok());

        let names: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM product_catalog ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(names, vec!["A".to_string()]);
    }
}
