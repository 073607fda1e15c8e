//! Stock level and expiration batch database operations.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

use super::{parse_decimal, Database, DbError, DbResult};
use crate::models::{ExpirationBatch, StockLevel};

/// Outcome of a guarded stock decrement.
#[derive(Debug, Clone, PartialEq)]
pub enum StockDecrement {
    /// Stock was reduced; carries the remaining quantity
    Applied { remaining: Decimal },
    /// Not enough stock (or the row changed underneath us); nothing written
    Insufficient { available: Decimal },
}

impl Database {
    /// Get the stock level of a product at a site.
    pub fn get_stock_level(&self, product_id: &str, site_id: &str) -> DbResult<Option<StockLevel>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT product_id, site_id, quantity, version, updated_at
                FROM stock_levels
                WHERE product_id = ?1 AND site_id = ?2
                "#,
                params![product_id, site_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(product_id, site_id, quantity, version, updated_at)| -> DbResult<StockLevel> {
            Ok(StockLevel {
                product_id,
                site_id,
                quantity: parse_decimal(&quantity)?,
                version,
                updated_at,
            })
        })
        .transpose()
    }

    /// Current quantity at a site; zero when no row exists.
    pub fn stock_quantity(&self, product_id: &str, site_id: &str) -> DbResult<Decimal> {
        Ok(self
            .get_stock_level(product_id, site_id)?
            .map(|level| level.quantity)
            .unwrap_or(Decimal::ZERO))
    }

    /// Add to a stock level, creating the row if needed. Returns the new quantity.
    pub fn increment_stock(&self, product_id: &str, site_id: &str, quantity: Decimal) -> DbResult<Decimal> {
        if quantity < Decimal::ZERO {
            return Err(DbError::Constraint(format!(
                "stock increment must not be negative: {}",
                quantity
            )));
        }
        let current = self.stock_quantity(product_id, site_id)?;
        let updated = current.checked_add(quantity).ok_or_else(|| {
            DbError::Constraint(format!(
                "stock of {} at {} would exceed the largest quantity",
                product_id, site_id
            ))
        })?;
        self.conn.execute(
            r#"
            INSERT INTO stock_levels (product_id, site_id, quantity, version, updated_at)
            VALUES (?1, ?2, ?3, 1, datetime('now'))
            ON CONFLICT(product_id, site_id) DO UPDATE SET
                quantity = excluded.quantity,
                version = stock_levels.version + 1,
                updated_at = datetime('now')
            "#,
            params![product_id, site_id, updated.to_string()],
        )?;
        Ok(updated)
    }

    /// Decrement stock only if it covers `quantity` and nobody else wrote the
    /// row since it was read.
    pub fn decrement_stock_guarded(
        &self,
        product_id: &str,
        site_id: &str,
        quantity: Decimal,
    ) -> DbResult<StockDecrement> {
        let level = match self.get_stock_level(product_id, site_id)? {
            Some(level) => level,
            None => {
                return Ok(StockDecrement::Insufficient {
                    available: Decimal::ZERO,
                })
            }
        };

        if !level.covers(quantity) {
            return Ok(StockDecrement::Insufficient {
                available: level.quantity,
            });
        }

        let remaining = level.quantity - quantity;
        let rows_affected = self.conn.execute(
            r#"
            UPDATE stock_levels
            SET quantity = ?1, version = version + 1, updated_at = datetime('now')
            WHERE product_id = ?2 AND site_id = ?3 AND version = ?4
            "#,
            params![remaining.to_string(), product_id, site_id, level.version],
        )?;

        if rows_affected == 0 {
            return Ok(StockDecrement::Insufficient {
                available: level.quantity,
            });
        }
        Ok(StockDecrement::Applied { remaining })
    }

    /// Insert a batch or add to its quantity.
    pub fn upsert_batch(&self, batch: &ExpirationBatch) -> DbResult<()> {
        let existing = self.get_batch(&batch.product_id, &batch.site_id, &batch.batch_number)?;
        let quantity = match existing {
            Some(b) => b.quantity.checked_add(batch.quantity).ok_or_else(|| {
                DbError::Constraint(format!("batch {} would exceed the largest quantity", batch.batch_number))
            })?,
            None => batch.quantity,
        };
        self.conn.execute(
            r#"
            INSERT INTO expiration_batches (product_id, site_id, batch_number, expires_on, quantity)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(product_id, site_id, batch_number) DO UPDATE SET
                expires_on = excluded.expires_on,
                quantity = excluded.quantity
            "#,
            params![
                batch.product_id,
                batch.site_id,
                batch.batch_number,
                batch.expires_on.to_string(),
                quantity.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Get a single batch.
    pub fn get_batch(
        &self,
        product_id: &str,
        site_id: &str,
        batch_number: &str,
    ) -> DbResult<Option<ExpirationBatch>> {
        self.conn
            .query_row(
                r#"
                SELECT product_id, site_id, batch_number, expires_on, quantity
                FROM expiration_batches
                WHERE product_id = ?1 AND site_id = ?2 AND batch_number = ?3
                "#,
                params![product_id, site_id, batch_number],
                BatchRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Batches with remaining quantity, earliest expiry first.
    pub fn list_open_batches(&self, product_id: &str, site_id: &str) -> DbResult<Vec<ExpirationBatch>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT product_id, site_id, batch_number, expires_on, quantity
            FROM expiration_batches
            WHERE product_id = ?1 AND site_id = ?2
            ORDER BY expires_on, batch_number
            "#,
        )?;
        let rows = stmt.query_map(params![product_id, site_id], BatchRow::from_row)?;

        let mut batches = Vec::new();
        for row in rows {
            let batch: ExpirationBatch = row?.try_into()?;
            if batch.quantity > Decimal::ZERO {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    /// Overwrite a batch's remaining quantity.
    pub fn set_batch_quantity(
        &self,
        product_id: &str,
        site_id: &str,
        batch_number: &str,
        quantity: Decimal,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE expiration_batches SET quantity = ?4
            WHERE product_id = ?1 AND site_id = ?2 AND batch_number = ?3
            "#,
            params![product_id, site_id, batch_number, quantity.to_string()],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct BatchRow {
    product_id: String,
    site_id: String,
    batch_number: String,
    expires_on: String,
    quantity: String,
}

impl BatchRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            product_id: row.get(0)?,
            site_id: row.get(1)?,
            batch_number: row.get(2)?,
            expires_on: row.get(3)?,
            quantity: row.get(4)?,
        })
    }
}

impl TryFrom<BatchRow> for ExpirationBatch {
    type Error = DbError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        Ok(ExpirationBatch {
            product_id: row.product_id,
            site_id: row.site_id,
            batch_number: row.batch_number,
            expires_on: NaiveDate::parse_from_str(&row.expires_on, "%Y-%m-%d")?,
            quantity: parse_decimal(&row.quantity)?,
        })
    }
}
