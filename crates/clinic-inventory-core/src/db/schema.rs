//! SQLite schema definition.

/// Complete database schema for the clinic inventory engine.
///
/// Decimal quantities and costs are stored as canonical TEXT.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Product Catalog (tenant-scoped)
-- ============================================================================

CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,               -- accent/case/space folded
    category TEXT,
    unit TEXT NOT NULL DEFAULT 'mL',
    default_unit_cost TEXT NOT NULL DEFAULT '0',
    min_stock TEXT NOT NULL DEFAULT '0',
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Not unique: duplicate names are tolerated and disambiguated by stock
CREATE INDEX IF NOT EXISTS idx_products_org_normalized ON products(organization_id, normalized_name);

-- ============================================================================
-- Stock Levels (mutated only by the movement ledger)
-- ============================================================================

CREATE TABLE IF NOT EXISTS stock_levels (
    product_id TEXT NOT NULL REFERENCES products(id),
    site_id TEXT NOT NULL,
    quantity TEXT NOT NULL DEFAULT '0',
    version INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (product_id, site_id)
);

-- ============================================================================
-- Expiration Batches (traceability only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS expiration_batches (
    product_id TEXT NOT NULL REFERENCES products(id),
    site_id TEXT NOT NULL,
    batch_number TEXT NOT NULL,
    expires_on TEXT NOT NULL,                    -- YYYY-MM-DD
    quantity TEXT NOT NULL DEFAULT '0',
    PRIMARY KEY (product_id, site_id, batch_number)
);

CREATE INDEX IF NOT EXISTS idx_batches_expiry ON expiration_batches(product_id, site_id, expires_on);

-- ============================================================================
-- Usage Events (immutable once committed)
-- ============================================================================

CREATE TABLE IF NOT EXISTS usage_events (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    site_id TEXT NOT NULL,
    consultorio_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    patient_ref TEXT NOT NULL,
    treatment_type TEXT NOT NULL,
    reaction_flag INTEGER NOT NULL DEFAULT 0,
    reaction_note TEXT,
    items TEXT NOT NULL DEFAULT '[]',            -- JSON array of TreatmentItem
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_events_patient ON usage_events(organization_id, patient_ref);

-- ============================================================================
-- Movements (Append-Only ledger, hash-chained)
-- ============================================================================

CREATE TABLE IF NOT EXISTS movements (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    movement_type TEXT NOT NULL CHECK (movement_type IN ('ENTRY', 'EXIT')),
    product_id TEXT NOT NULL REFERENCES products(id),
    site_id TEXT NOT NULL,
    consultorio_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    quantity TEXT NOT NULL,
    unit_cost TEXT NOT NULL,
    total_cost TEXT NOT NULL,
    batch_number TEXT,
    batch_expires_on TEXT,
    usage_event_id TEXT REFERENCES usage_events(id),
    created_at TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_movements_costing ON movements(product_id, site_id, movement_type, seq);
CREATE INDEX IF NOT EXISTS idx_movements_usage_event ON movements(usage_event_id);

CREATE TRIGGER IF NOT EXISTS movements_no_update BEFORE UPDATE ON movements
BEGIN
    SELECT RAISE(ABORT, 'Movements are append-only');
END;

CREATE TRIGGER IF NOT EXISTS movements_no_delete BEFORE DELETE ON movements
BEGIN
    SELECT RAISE(ABORT, 'Movements are append-only');
END;

-- ============================================================================
-- Usage Details (event ↔ movement link with cost snapshot)
-- ============================================================================

CREATE TABLE IF NOT EXISTS usage_details (
    id TEXT PRIMARY KEY,
    usage_event_id TEXT NOT NULL REFERENCES usage_events(id),
    movement_id TEXT NOT NULL REFERENCES movements(id),
    item_index INTEGER NOT NULL,
    component_name TEXT NOT NULL,
    component_kind TEXT NOT NULL CHECK (component_kind IN ('allergen', 'diluent', 'product')),
    product_id TEXT NOT NULL REFERENCES products(id),
    quantity TEXT NOT NULL,
    unit_cost TEXT NOT NULL,
    total_cost TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_details_event ON usage_details(usage_event_id);

-- ============================================================================
-- Clinical Record Outbox (at-least-once delivery)
-- ============================================================================

CREATE TABLE IF NOT EXISTS outbox (
    id TEXT PRIMARY KEY,
    usage_event_id TEXT NOT NULL REFERENCES usage_events(id),
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,                       -- JSON TreatmentAdministered
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'delivered')),
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    delivered_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status, created_at);
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

    fn seed_movement(conn: &Connection) {
        conn.execute(
            "INSERT INTO products (id, organization_id, name, normalized_name) VALUES ('p1', 'org', 'Gato', 'gato')",
            [],
        )
        .unwrap();
        conn.execute(
            r#"INSERT INTO movements (id, movement_type, product_id, site_id, consultorio_id, user_id,
                quantity, unit_cost, total_cost, created_at, prev_hash, entry_hash)
               VALUES ('m1', 'ENTRY', 'p1', 's1', 'c1', 'u1', '5', '10', '50', '2024-01-01T00:00:00Z', '', 'h1')"#,
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_movements_are_append_only() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        seed_movement(&conn);

        let result = conn.execute("UPDATE movements SET quantity = '1' WHERE id = 'm1'", []);
        assert!(result.is_err());

        let result = conn.execute("DELETE FROM movements WHERE id = 'm1'", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_movement_type_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        seed_movement(&conn);

        let result = conn.execute(
            r#"INSERT INTO movements (id, movement_type, product_id, site_id, consultorio_id, user_id,
                quantity, unit_cost, total_cost, created_at, prev_hash, entry_hash)
               VALUES ('m2', 'TRANSFER', 'p1', 's1', 'c1', 'u1', '5', '10', '50', '2024-01-01T00:00:00Z', 'h1', 'h2')"#,
            [],
        );
        assert!(result.is_err());
    }
}
