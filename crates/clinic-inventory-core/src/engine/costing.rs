//! Unit cost attribution for outgoing movements (last-in policy).

use rust_decimal::Decimal;

use crate::db::{Database, DbError, DbResult};

pub struct CostingResolver<'a> {
    db: &'a Database,
}

impl<'a> CostingResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Unit cost of the latest ENTRY at the site, else the catalog default.
    pub fn unit_cost(&self, product_id: &str, site_id: &str) -> DbResult<Decimal> {
        if let Some(cost) = self.db.latest_entry_unit_cost(product_id, site_id)? {
            return Ok(cost);
        }
        let product = self
            .db
            .get_product(product_id)?
            .ok_or_else(|| DbError::NotFound(format!("product {}", product_id)))?;
        Ok(product.default_unit_cost)
    }
}
