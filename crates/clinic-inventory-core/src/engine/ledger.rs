//! Movement ledger: the only writer of stock levels.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::audit::{entry_hash, GENESIS_HASH};
use super::{EngineError, EngineResult, Shortfall};
use crate::db::{Database, DbError, DbResult, StockDecrement};
use crate::models::{ExpirationBatch, Movement, MovementContext, MovementType, PlannedComponent, UsageDetail};

/// Batch number and expiry attached to a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTag {
    pub batch_number: String,
    pub expires_on: NaiveDate,
}

pub struct MovementLedger<'a> {
    db: &'a Database,
}

impl<'a> MovementLedger<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Write one EXIT movement and decrement stock.
    ///
    /// The decrement is guarded: if stock no longer covers `quantity` nothing
    /// is written and `InsufficientStock` is returned. The movement is tagged
    /// with the earliest-expiring open batch, and batch quantities are drawn
    /// down in expiry order without going below zero.
    pub fn consume(
        &self,
        product_id: &str,
        site_id: &str,
        quantity: Decimal,
        unit_cost: Decimal,
        context: &MovementContext,
    ) -> EngineResult<Movement> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidParameters(format!(
                "consumed quantity must be positive, got {}",
                quantity
            )));
        }

        let mut movement = priced_movement(MovementType::Exit, product_id, site_id, quantity, unit_cost, context)?;

        match self.db.decrement_stock_guarded(product_id, site_id, quantity)? {
            StockDecrement::Applied { remaining } => {
                debug!(product_id, site_id, %quantity, %remaining, "stock decremented");
            }
            StockDecrement::Insufficient { available } => {
                let product_name = self
                    .db
                    .get_product(product_id)?
                    .map(|p| p.name)
                    .unwrap_or_else(|| product_id.to_string());
                return Err(EngineError::InsufficientStock(vec![Shortfall {
                    component: product_name.clone(),
                    product_id: product_id.to_string(),
                    product_name,
                    required: quantity,
                    available,
                    missing: quantity - available,
                }]));
            }
        }

        let tag = self.draw_down_batches(product_id, site_id, quantity)?;
        if let Some(tag) = tag {
            movement.batch_number = Some(tag.batch_number);
            movement.batch_expires_on = Some(tag.expires_on);
        }
        Ok(self.append(movement)?)
    }

    /// Record the usage detail linking an EXIT movement to its usage event.
    pub fn link_usage_detail(
        &self,
        movement: &Movement,
        item_index: u32,
        component: &PlannedComponent,
    ) -> DbResult<UsageDetail> {
        let usage_event_id = movement.usage_event_id.clone().ok_or_else(|| {
            DbError::Constraint(format!("movement {} has no usage event", movement.id))
        })?;
        let detail = UsageDetail {
            id: uuid::Uuid::new_v4().to_string(),
            usage_event_id,
            movement_id: movement.id.clone(),
            item_index,
            component_name: component.name.clone(),
            component_kind: component.kind,
            product_id: movement.product_id.clone(),
            quantity: movement.quantity,
            unit_cost: movement.unit_cost,
            total_cost: movement.total_cost,
        };
        self.db.insert_usage_detail(&detail)?;
        Ok(detail)
    }

    /// Write one ENTRY movement, increment stock and optionally register a batch.
    pub fn receive(
        &self,
        product_id: &str,
        site_id: &str,
        quantity: Decimal,
        unit_cost: Decimal,
        batch: Option<&BatchTag>,
        context: &MovementContext,
    ) -> EngineResult<Movement> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidParameters(format!(
                "received quantity must be positive, got {}",
                quantity
            )));
        }
        if unit_cost < Decimal::ZERO {
            return Err(EngineError::InvalidParameters(format!(
                "unit cost must not be negative, got {}",
                unit_cost
            )));
        }
        if self.db.get_product(product_id)?.is_none() {
            return Err(EngineError::ProductNotFound {
                identifier: product_id.to_string(),
                suggestions: Vec::new(),
            });
        }

        let mut movement = priced_movement(MovementType::Entry, product_id, site_id, quantity, unit_cost, context)?;

        let updated = self.db.increment_stock(product_id, site_id, quantity)?;
        debug!(product_id, site_id, %quantity, %updated, "stock received");

        if let Some(tag) = batch {
            self.db.upsert_batch(&ExpirationBatch {
                product_id: product_id.to_string(),
                site_id: site_id.to_string(),
                batch_number: tag.batch_number.clone(),
                expires_on: tag.expires_on,
                quantity,
            })?;
            movement.batch_number = Some(tag.batch_number.clone());
            movement.batch_expires_on = Some(tag.expires_on);
        }
        Ok(self.append(movement)?)
    }

    /// Draw `quantity` down across open batches, earliest expiry first.
    ///
    /// Returns the batch the movement is tagged with. Whatever the batches
    /// cannot cover is ignored; batches are traceability, not availability.
    fn draw_down_batches(&self, product_id: &str, site_id: &str, quantity: Decimal) -> DbResult<Option<BatchTag>> {
        let batches = self.db.list_open_batches(product_id, site_id)?;
        let tag = batches.first().map(|b| BatchTag {
            batch_number: b.batch_number.clone(),
            expires_on: b.expires_on,
        });

        let mut outstanding = quantity;
        for batch in batches {
            if outstanding <= Decimal::ZERO {
                break;
            }
            let taken = batch.quantity.min(outstanding);
            self.db
                .set_batch_quantity(product_id, site_id, &batch.batch_number, batch.quantity - taken)?;
            outstanding -= taken;
        }
        Ok(tag)
    }

    /// Chain and persist a movement.
    fn append(&self, mut movement: Movement) -> DbResult<Movement> {
        movement.prev_hash = self
            .db
            .last_entry_hash()?
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        movement.entry_hash = entry_hash(&movement.prev_hash, &movement.digest())?;
        movement.seq = self.db.insert_movement(&movement)?;
        Ok(movement)
    }
}

fn priced_movement(
    movement_type: MovementType,
    product_id: &str,
    site_id: &str,
    quantity: Decimal,
    unit_cost: Decimal,
    context: &MovementContext,
) -> EngineResult<Movement> {
    Movement::new(movement_type, product_id, site_id, quantity, unit_cost, context).ok_or_else(|| {
        EngineError::InvalidParameters(format!(
            "total cost of {} at {} per unit is too large",
            quantity, unit_cost
        ))
    })
}
