//! Movement ledger database operations (append-only).

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::{parse_decimal, Database, DbError, DbResult};
use crate::models::{Movement, MovementType};

const MOVEMENT_COLUMNS: &str = "seq, id, movement_type, product_id, site_id, consultorio_id, user_id, \
     quantity, unit_cost, total_cost, batch_number, batch_expires_on, usage_event_id, \
     created_at, prev_hash, entry_hash";

impl Database {
    /// Append a movement. Returns the assigned ledger sequence number.
    pub fn insert_movement(&self, movement: &Movement) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO movements (
                id, movement_type, product_id, site_id, consultorio_id, user_id,
                quantity, unit_cost, total_cost, batch_number, batch_expires_on,
                usage_event_id, created_at, prev_hash, entry_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                movement.id,
                movement.movement_type.as_str(),
                movement.product_id,
                movement.site_id,
                movement.consultorio_id,
                movement.user_id,
                movement.quantity.to_string(),
                movement.unit_cost.to_string(),
                movement.total_cost.to_string(),
                movement.batch_number,
                movement.batch_expires_on.map(|d| d.to_string()),
                movement.usage_event_id,
                movement.created_at,
                movement.prev_hash,
                movement.entry_hash,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a movement by id.
    pub fn get_movement(&self, id: &str) -> DbResult<Option<Movement>> {
        let sql = format!("SELECT {} FROM movements WHERE id = ?", MOVEMENT_COLUMNS);
        self.conn
            .query_row(&sql, [id], MovementRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Hash of the newest ledger entry, if any.
    pub fn last_entry_hash(&self) -> DbResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT entry_hash FROM movements ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Unit cost of the most recent ENTRY movement for a product at a site.
    pub fn latest_entry_unit_cost(&self, product_id: &str, site_id: &str) -> DbResult<Option<Decimal>> {
        let cost: Option<String> = self
            .conn
            .query_row(
                r#"
                SELECT unit_cost FROM movements
                WHERE product_id = ?1 AND site_id = ?2 AND movement_type = 'ENTRY'
                ORDER BY seq DESC
                LIMIT 1
                "#,
                params![product_id, site_id],
                |row| row.get(0),
            )
            .optional()?;
        cost.map(|c| parse_decimal(&c)).transpose()
    }

    /// Movements written for a usage event, in ledger order.
    pub fn list_movements_for_usage_event(&self, usage_event_id: &str) -> DbResult<Vec<Movement>> {
        let sql = format!(
            "SELECT {} FROM movements WHERE usage_event_id = ? ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        self.query_movements(&sql, params![usage_event_id])
    }

    /// Movements for a product at a site, in ledger order.
    pub fn list_movements_for_product(&self, product_id: &str, site_id: &str) -> DbResult<Vec<Movement>> {
        let sql = format!(
            "SELECT {} FROM movements WHERE product_id = ?1 AND site_id = ?2 ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        self.query_movements(&sql, params![product_id, site_id])
    }

    /// Whole ledger in order, for chain verification.
    pub fn list_all_movements(&self) -> DbResult<Vec<Movement>> {
        let sql = format!("SELECT {} FROM movements ORDER BY seq", MOVEMENT_COLUMNS);
        self.query_movements(&sql, [])
    }

    /// Number of ledger entries.
    pub fn count_movements(&self) -> DbResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM movements", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn query_movements(&self, sql: &str, params: impl rusqlite::Params) -> DbResult<Vec<Movement>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, MovementRow::from_row)?;

        let mut movements = Vec::new();
        for row in rows {
            movements.push(row?.try_into()?);
        }
        Ok(movements)
    }
}

/// Intermediate row struct for database mapping.
struct MovementRow {
    seq: i64,
    id: String,
    movement_type: String,
    product_id: String,
    site_id: String,
    consultorio_id: String,
    user_id: String,
    quantity: String,
    unit_cost: String,
    total_cost: String,
    batch_number: Option<String>,
    batch_expires_on: Option<String>,
    usage_event_id: Option<String>,
    created_at: String,
    prev_hash: String,
    entry_hash: String,
}

impl MovementRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            movement_type: row.get(2)?,
            product_id: row.get(3)?,
            site_id: row.get(4)?,
            consultorio_id: row.get(5)?,
            user_id: row.get(6)?,
            quantity: row.get(7)?,
            unit_cost: row.get(8)?,
            total_cost: row.get(9)?,
            batch_number: row.get(10)?,
            batch_expires_on: row.get(11)?,
            usage_event_id: row.get(12)?,
            created_at: row.get(13)?,
            prev_hash: row.get(14)?,
            entry_hash: row.get(15)?,
        })
    }
}

impl TryFrom<MovementRow> for Movement {
    type Error = DbError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = MovementType::parse(&row.movement_type).ok_or_else(|| {
            DbError::Constraint(format!("unknown movement type: {}", row.movement_type))
        })?;
        Ok(Movement {
            id: row.id,
            seq: row.seq,
            movement_type,
            product_id: row.product_id,
            site_id: row.site_id,
            consultorio_id: row.consultorio_id,
            user_id: row.user_id,
            quantity: parse_decimal(&row.quantity)?,
            unit_cost: parse_decimal(&row.unit_cost)?,
            total_cost: parse_decimal(&row.total_cost)?,
            batch_number: row.batch_number,
            batch_expires_on: row
                .batch_expires_on
                .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
                .transpose()?,
            usage_event_id: row.usage_event_id,
            created_at: row.created_at,
            prev_hash: row.prev_hash,
            entry_hash: row.entry_hash,
        })
    }
}
