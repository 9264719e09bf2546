//! Product catalog database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::ProductCatalogEntry;

impl Database {
    /// Insert or update a catalog entry by id.
    pub fn upsert_catalog_entry(&self, entry: &ProductCatalogEntry) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO product_catalog (id, name, unit_price, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                unit_price = excluded.unit_price,
                updated_at = datetime('now')
            "#,
            params![entry.id, entry.name, entry.unit_price],
        )?;
        Ok(())
    }

    /// Get a catalog entry by id.
    pub fn get_catalog_entry(&self, id: i64) -> DbResult<Option<ProductCatalogEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, name, unit_price FROM product_catalog WHERE id = ?",
                [id],
                |row| {
                    Ok(ProductCatalogEntry {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        unit_price: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// All catalog entries in insertion order.
    pub fn list_catalog_entries(&self) -> DbResult<Vec<ProductCatalogEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, unit_price FROM product_catalog ORDER BY seq")?;

        let rows = stmt.query_map([], |row| {
            Ok(ProductCatalogEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                unit_price: row.get(2)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Delete a catalog entry. Returns whether it existed.
    pub fn delete_catalog_entry(&self, id: i64) -> DbResult<bool> {
        let deleted = self.conn.execute("DELETE FROM product_catalog WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    /// Remove every catalog entry.
    pub fn clear_catalog(&self) -> DbResult<usize> {
        Ok(self.conn.execute("DELETE FROM product_catalog", [])?)
    }
}
