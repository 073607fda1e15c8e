//! Stock level and expiration batch models.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current quantity of a product at a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockLevel {
    pub product_id: String,
    pub site_id: String,
    /// Never negative; only the movement ledger mutates it
    pub quantity: Decimal,
    /// Bumped on every write, used to guard concurrent decrements
    pub version: i64,
    pub updated_at: String,
}

impl StockLevel {
    /// Whether the level covers `required`.
    pub fn covers(&self, required: Decimal) -> bool {
        self.quantity >= required
    }
}

/// A lot with an expiry date, used to tag outgoing movements.
///
/// Informational only: availability is decided by [`StockLevel`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpirationBatch {
    pub product_id: String,
    pub site_id: String,
    pub batch_number: String,
    pub expires_on: NaiveDate,
    pub quantity: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers() {
        let level = StockLevel {
            product_id: "p1".into(),
            site_id: "s1".into(),
            quantity: Decimal::new(25, 1),
            version: 1,
            updated_at: String::new(),
        };
        assert!(level.covers(Decimal::new(25, 1)));
        assert!(level.covers(Decimal::new(8, 2)));
        assert!(!level.covers(Decimal::new(251, 2)));
    }
}
