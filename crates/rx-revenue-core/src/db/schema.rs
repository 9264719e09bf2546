//! SQLite schema definition.

/// Complete database schema for the revenue attribution engine.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Product Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS product_catalog (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,        -- insertion order, drives core-group order
    id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE,
    unit_price REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Master Records (pharmacy + product → doctor)
-- ============================================================================

CREATE TABLE IF NOT EXISTS master_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_code TEXT NOT NULL,
    facility_name TEXT NOT NULL DEFAULT '',
    product_name TEXT NOT NULL,
    product_key TEXT NOT NULL,                    -- exact join key
    catalog_product_id INTEGER,
    unit_price REAL NOT NULL DEFAULT 0,
    doctor_id TEXT NOT NULL,
    doctor_name TEXT NOT NULL DEFAULT '',
    rep_name TEXT,
    hq TEXT,
    area TEXT,
    source TEXT NOT NULL DEFAULT 'bulk' CHECK (source IN ('bulk', 'manual')),
    origin_unmatched_id INTEGER,                  -- set when learned from a manual mapping
    created_at TEXT NOT NULL
);

-- (identity, product) is deliberately not unique
CREATE INDEX IF NOT EXISTS idx_masters_identity_key ON master_records(identity_code, product_key);
CREATE INDEX IF NOT EXISTS idx_masters_origin ON master_records(origin_unmatched_id);

-- ============================================================================
-- Source Rows (persisted invoice rows, one per input row per run)
-- ============================================================================

CREATE TABLE IF NOT EXISTS source_rows (
    row_key TEXT PRIMARY KEY,                     -- SHA-256 hex fingerprint
    run_id TEXT NOT NULL,
    row_index INTEGER NOT NULL,
    facility_text TEXT NOT NULL,
    product_text TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    amount REAL,
    identity_code TEXT NOT NULL,                  -- canonical code or 'INVALID'
    product_key TEXT NOT NULL,
    lookup_key TEXT,                              -- 'EXACT|..' / 'PID|..', NULL while unmatched
    catalog_product_id INTEGER,
    manual_master_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_source_rows_run ON source_rows(run_id, row_index);
CREATE INDEX IF NOT EXISTS idx_source_rows_identity ON source_rows(identity_code);

-- ============================================================================
-- Results (attributed revenue)
-- ============================================================================

CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    row_key TEXT NOT NULL REFERENCES source_rows(row_key) ON DELETE CASCADE,
    run_id TEXT NOT NULL,
    identity_code TEXT NOT NULL,
    facility_name TEXT NOT NULL,
    product_name TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    revenue REAL NOT NULL,
    master_record_id INTEGER REFERENCES master_records(id) ON DELETE SET NULL,
    policy TEXT NOT NULL CHECK (policy IN ('single', 'split_rule', 'first_candidate_no_rule', 'manual')),
    split_rule_id INTEGER,
    percentage REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_row ON results(row_key);
CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
CREATE INDEX IF NOT EXISTS idx_results_master ON results(master_record_id);
CREATE INDEX IF NOT EXISTS idx_results_split_rule ON results(split_rule_id);

-- ============================================================================
-- Unmatched Rows
-- ============================================================================

CREATE TABLE IF NOT EXISTS unmatched_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    row_key TEXT NOT NULL UNIQUE REFERENCES source_rows(row_key) ON DELETE CASCADE,
    facility_text TEXT NOT NULL,
    identity_code TEXT NOT NULL,
    product_text TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    amount REAL,
    reason TEXT NOT NULL CHECK (reason IN ('invalid_facility', 'product_not_resolved', 'no_master_record')),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'mapped', 'ignored')),
    mapped_to TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_unmatched_status ON unmatched_records(status);
CREATE INDEX IF NOT EXISTS idx_unmatched_run ON unmatched_records(run_id);

-- Mapped rows must say where they were mapped to
CREATE TRIGGER IF NOT EXISTS unmatched_mapped_target BEFORE UPDATE OF status ON unmatched_records
WHEN NEW.status = 'mapped' AND NEW.mapped_to IS NULL
BEGIN
    SELECT RAISE(ABORT, 'mapped unmatched record requires mapped_to');
END;

-- ============================================================================
-- Split Rules
-- ============================================================================

CREATE TABLE IF NOT EXISTS split_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_code TEXT NOT NULL,
    lookup_key TEXT NOT NULL,
    shares TEXT NOT NULL,                         -- JSON array [{master_record_id, percentage}]
    updated_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (identity_code, lookup_key)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_catalog_name_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute("INSERT INTO product_catalog (id, name) VALUES (1, 'FLOK 20')", [])
            .unwrap();
        let result = conn.execute("INSERT INTO product_catalog (id, name) VALUES (2, 'FLOK 20')", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_mapped_requires_target() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute(
            r#"INSERT INTO source_rows (row_key, run_id, row_index, facility_text, product_text,
                   quantity, identity_code, product_key, created_at)
               VALUES ('k1', 'r1', 0, '', 'X', 1, 'INVALID', 'X', 'now')"#,
            [],
        )
        .unwrap();
        conn.execute(
            r#"INSERT INTO unmatched_records (run_id, row_key, facility_text, identity_code, product_text,
                   quantity, reason, created_at, updated_at)
               VALUES ('r1', 'k1', '', 'INVALID', 'X', 1, 'invalid_facility', 'now', 'now')"#,
            [],
        )
        .unwrap();

        let result = conn.execute("UPDATE unmatched_records SET status = 'mapped' WHERE row_key = 'k1'", []);
        assert!(result.is_err());

        let result = conn.execute(
            "UPDATE unmatched_records SET status = 'mapped', mapped_to = 'ABC' WHERE row_key = 'k1'",
            [],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_results_cascade_with_source_row() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute(
            r#"INSERT INTO source_rows (row_key, run_id, row_index, facility_text, product_text,
                   quantity, identity_code, product_key, created_at)
               VALUES ('k1', 'r1', 0, 'A', 'X', 1, 'A', 'X', 'now')"#,
            [],
        )
        .unwrap();
        conn.execute(
            r#"INSERT INTO results (row_key, run_id, identity_code, facility_name, product_name,
                   quantity, revenue, policy, created_at)
               VALUES ('k1', 'r1', 'A', 'A', 'X', 1, 1.0, 'single', 'now')"#,
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM source_rows WHERE row_key = 'k1'", []).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
