//! Tamper-evident hash chain over the movement ledger.
//!
//! `entry_hash = SHA-256(prev_hash | canonical JSON of the movement)`; the
//! first entry chains from the empty string.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::db::{Database, DbResult};
use crate::models::MovementDigest;

/// `prev_hash` of the first ledger entry.
pub const GENESIS_HASH: &str = "";

/// Hash data using SHA-256.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Chain hash of a movement given its predecessor's hash.
pub fn entry_hash(prev_hash: &str, digest: &MovementDigest<'_>) -> Result<String, serde_json::Error> {
    let body = serde_json::to_vec(digest)?;
    let mut data = Vec::with_capacity(prev_hash.len() + 1 + body.len());
    data.extend_from_slice(prev_hash.as_bytes());
    data.push(b'|');
    data.extend_from_slice(&body);
    Ok(hash_data(&data))
}

/// Result of walking the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainVerification {
    /// Entries checked
    pub entries: u64,
    /// Hash of the newest entry
    pub head: Option<String>,
    /// Sequence number of the first entry that does not verify
    pub first_broken_seq: Option<i64>,
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        self.first_broken_seq.is_none()
    }
}

/// Recompute every entry hash in ledger order.
pub fn verify_ledger_chain(db: &Database) -> DbResult<ChainVerification> {
    let movements = db.list_all_movements()?;
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut first_broken_seq = None;

    for movement in &movements {
        let recomputed = entry_hash(&movement.prev_hash, &movement.digest())?;
        if movement.prev_hash != expected_prev || recomputed != movement.entry_hash {
            warn!(seq = movement.seq, movement_id = %movement.id, "ledger chain broken");
            first_broken_seq = Some(movement.seq);
            break;
        }
        expected_prev = movement.entry_hash.clone();
    }

    Ok(ChainVerification {
        entries: movements.len() as u64,
        head: movements.last().map(|m| m.entry_hash.clone()),
        first_broken_seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MovementLedger;
    use crate::models::{MovementContext, Product};
    use rust_decimal::Decimal;

    fn context() -> MovementContext {
        MovementContext {
            consultorio_id: "c1".into(),
            user_id: "u1".into(),
            usage_event_id: None,
        }
    }

    fn setup_with_movements() -> Database {
        let db = Database::open_in_memory().unwrap();
        let product = Product::new("org-1", "Gato");
        db.upsert_product(&product).unwrap();

        let ledger = MovementLedger::new(&db);
        ledger
            .receive(&product.id, "site-1", Decimal::new(10, 0), Decimal::new(5, 0), None, &context())
            .unwrap();
        ledger
            .consume(&product.id, "site-1", Decimal::new(2, 0), Decimal::new(5, 0), &context())
            .unwrap();
        ledger
            .consume(&product.id, "site-1", Decimal::new(25, 1), Decimal::new(5, 0), &context())
            .unwrap();
        db
    }

    #[test]
    fn test_hash_deterministic() {
        let hash1 = hash_data(b"test data");
        let hash2 = hash_data(b"test data");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_data(b"other data"));
    }

    #[test]
    fn test_empty_ledger_is_intact() {
        let db = Database::open_in_memory().unwrap();
        let result = verify_ledger_chain(&db).unwrap();
        assert_eq!(result.entries, 0);
        assert!(result.head.is_none());
        assert!(result.is_intact());
    }

    #[test]
    fn test_chain_verifies_after_reload() {
        let db = setup_with_movements();
        let result = verify_ledger_chain(&db).unwrap();
        assert_eq!(result.entries, 3);
        assert!(result.is_intact());
        assert_eq!(result.head, db.last_entry_hash().unwrap());
    }

    #[test]
    fn test_tampering_is_detected() {
        let db = setup_with_movements();
        let second = db.list_all_movements().unwrap()[1].clone();

        db.conn().execute_batch("DROP TRIGGER movements_no_update").unwrap();
        db.conn()
            .execute("UPDATE movements SET quantity = '0.5' WHERE id = ?", [&second.id])
            .unwrap();

        let result = verify_ledger_chain(&db).unwrap();
        assert_eq!(result.first_broken_seq, Some(second.seq));
    }
}
