//! Append-only stock movement ledger models.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Stock received (purchase, transfer in)
    Entry,
    /// Stock consumed
    Exit,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entry => "ENTRY",
            MovementType::Exit => "EXIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTRY" => Some(MovementType::Entry),
            "EXIT" => Some(MovementType::Exit),
            _ => None,
        }
    }
}

/// Who and where a movement is attributed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovementContext {
    pub consultorio_id: String,
    pub user_id: String,
    /// Parent usage event for EXIT movements written by the engine
    pub usage_event_id: Option<String>,
}

/// A single immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movement {
    pub id: String,
    /// Ledger position, assigned on insert
    pub seq: i64,
    pub movement_type: MovementType,
    pub product_id: String,
    pub site_id: String,
    pub consultorio_id: String,
    pub user_id: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    /// Nearest-expiring batch at the time of the movement (traceability only)
    pub batch_number: Option<String>,
    pub batch_expires_on: Option<NaiveDate>,
    pub usage_event_id: Option<String>,
    pub created_at: String,
    /// Hash of the previous ledger entry ("" for the first one)
    pub prev_hash: String,
    /// SHA-256 over `prev_hash` and this entry's canonical content
    pub entry_hash: String,
}

/// Hashed content of a movement. Excludes `seq` and the hashes themselves.
#[derive(Debug, Serialize)]
pub struct MovementDigest<'a> {
    pub id: &'a str,
    pub movement_type: MovementType,
    pub product_id: &'a str,
    pub site_id: &'a str,
    pub consultorio_id: &'a str,
    pub user_id: &'a str,
    pub quantity: &'a Decimal,
    pub unit_cost: &'a Decimal,
    pub total_cost: &'a Decimal,
    pub batch_number: Option<&'a str>,
    pub batch_expires_on: Option<NaiveDate>,
    pub usage_event_id: Option<&'a str>,
    pub created_at: &'a str,
}

impl Movement {
    /// Build an unhashed movement; the ledger fills `seq` and the hashes.
    ///
    /// Returns `None` when `unit_cost × quantity` does not fit a decimal.
    pub fn new(
        movement_type: MovementType,
        product_id: &str,
        site_id: &str,
        quantity: Decimal,
        unit_cost: Decimal,
        context: &MovementContext,
    ) -> Option<Self> {
        let total_cost = unit_cost.checked_mul(quantity)?;
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            movement_type,
            product_id: product_id.to_string(),
            site_id: site_id.to_string(),
            consultorio_id: context.consultorio_id.clone(),
            user_id: context.user_id.clone(),
            quantity,
            unit_cost,
            total_cost,
            batch_number: None,
            batch_expires_on: None,
            usage_event_id: context.usage_event_id.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            prev_hash: String::new(),
            entry_hash: String::new(),
        })
    }

    /// Content covered by `entry_hash`.
    pub fn digest(&self) -> MovementDigest<'_> {
        MovementDigest {
            id: &self.id,
            movement_type: self.movement_type,
            product_id: &self.product_id,
            site_id: &self.site_id,
            consultorio_id: &self.consultorio_id,
            user_id: &self.user_id,
            quantity: &self.quantity,
            unit_cost: &self.unit_cost,
            total_cost: &self.total_cost,
            batch_number: self.batch_number.as_deref(),
            batch_expires_on: self.batch_expires_on,
            usage_event_id: self.usage_event_id.as_deref(),
            created_at: &self.created_at,
        }
    }
}
