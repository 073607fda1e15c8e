//! Product catalog database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_decimal, Database, DbError, DbResult};
use crate::models::Product;

const PRODUCT_COLUMNS: &str = "id, organization_id, name, normalized_name, category, unit, \
     default_unit_cost, min_stock, active, created_at";

impl Database {
    /// Insert or update a product. Catalog metadata only; stock lives elsewhere.
    ///
    /// An existing id owned by another organization is left untouched and
    /// reported as a constraint violation.
    pub fn upsert_product(&self, product: &Product) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            r#"
            INSERT INTO products (
                id, organization_id, name, normalized_name, category, unit,
                default_unit_cost, min_stock, active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                normalized_name = excluded.normalized_name,
                category = excluded.category,
                unit = excluded.unit,
                default_unit_cost = excluded.default_unit_cost,
                min_stock = excluded.min_stock,
                active = excluded.active,
                updated_at = datetime('now')
            WHERE products.organization_id = excluded.organization_id
            "#,
            params![
                product.id,
                product.organization_id,
                product.name,
                product.normalized_name,
                product.category,
                product.unit,
                product.default_unit_cost.to_string(),
                product.min_stock.to_string(),
                product.active,
                product.created_at,
            ],
        )?;
        if rows_affected == 0 {
            return Err(DbError::Constraint(format!(
                "product {} belongs to another organization",
                product.id
            )));
        }
        Ok(())
    }

    /// Get a product by id, regardless of organization.
    pub fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS);
        self.conn
            .query_row(&sql, [id], ProductRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Get a product by id within an organization.
    pub fn get_product_in_org(&self, organization_id: &str, id: &str) -> DbResult<Option<Product>> {
        let sql = format!(
            "SELECT {} FROM products WHERE id = ?1 AND organization_id = ?2",
            PRODUCT_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id, organization_id], ProductRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List products of an organization, oldest first.
    pub fn list_products_for_org(&self, organization_id: &str, active_only: bool) -> DbResult<Vec<Product>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM products WHERE organization_id = ? AND active = 1 ORDER BY created_at, rowid",
                PRODUCT_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM products WHERE organization_id = ? ORDER BY created_at, rowid",
                PRODUCT_COLUMNS
            )
        };
        self.query_products(&sql, params![organization_id])
    }

    /// Active products of an organization sharing a normalized name, oldest first.
    pub fn find_products_by_normalized_name(
        &self,
        organization_id: &str,
        normalized_name: &str,
    ) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products
             WHERE organization_id = ?1 AND normalized_name = ?2 AND active = 1
             ORDER BY created_at, rowid",
            PRODUCT_COLUMNS
        );
        self.query_products(&sql, params![organization_id, normalized_name])
    }

    /// Mark product as inactive (soft delete). Movements keep referencing it.
    pub fn deactivate_product(&self, organization_id: &str, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE products SET active = 0, updated_at = datetime('now') WHERE id = ?1 AND organization_id = ?2",
            params![id, organization_id],
        )?;
        Ok(rows_affected > 0)
    }

    fn query_products(&self, sql: &str, params: impl rusqlite::Params) -> DbResult<Vec<Product>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, ProductRow::from_row)?;

        let mut products = Vec::new();
        for row in rows {
            products.push(row?.try_into()?);
        }
        Ok(products)
    }
}

/// Intermediate row struct for database mapping.
struct ProductRow {
    id: String,
    organization_id: String,
    name: String,
    normalized_name: String,
    category: Option<String>,
    unit: String,
    default_unit_cost: String,
    min_stock: String,
    active: bool,
    created_at: String,
}

impl ProductRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            normalized_name: row.get(3)?,
            category: row.get(4)?,
            unit: row.get(5)?,
            default_unit_cost: row.get(6)?,
            min_stock: row.get(7)?,
            active: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = DbError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            normalized_name: row.normalized_name,
            category: row.category,
            unit: row.unit,
            default_unit_cost: parse_decimal(&row.default_unit_cost)?,
            min_stock: parse_decimal(&row.min_stock)?,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup_db();

        let product = Product::new("org-1", "Epitelio de Gato")
            .with_category("allergen")
            .with_default_cost(Decimal::new(1250, 2));
        db.upsert_product(&product).unwrap();

        let retrieved = db.get_product(&product.id).unwrap().unwrap();
        assert_eq!(retrieved.name, "Epitelio de Gato");
        assert_eq!(retrieved.normalized_name, "epiteliodegato");
        assert_eq!(retrieved.default_unit_cost, Decimal::new(1250, 2));
        assert_eq!(retrieved.category.as_deref(), Some("allergen"));
    }

    #[test]
    fn test_upsert_updates() {
        let db = setup_db();

        let mut product = Product::new("org-1", "Original Name");
        db.upsert_product(&product).unwrap();

        product.rename("Updated Name");
        db.upsert_product(&product).unwrap();

        let retrieved = db.get_product(&product.id).unwrap().unwrap();
        assert_eq!(retrieved.name, "Updated Name");
        assert_eq!(retrieved.normalized_name, "updatedname");
    }

    #[test]
    fn test_org_scoping() {
        let db = setup_db();

        let product = Product::new("org-1", "Gato");
        db.upsert_product(&product).unwrap();

        assert!(db.get_product_in_org("org-1", &product.id).unwrap().is_some());
        assert!(db.get_product_in_org("org-2", &product.id).unwrap().is_none());
        assert!(db.list_products_for_org("org-2", false).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_cannot_take_over_other_org_product() {
        let db = setup_db();

        let product = Product::new("org-1", "Gato").with_default_cost(Decimal::new(1250, 2));
        db.upsert_product(&product).unwrap();

        let mut foreign = product.clone();
        foreign.organization_id = "org-2".into();
        foreign.rename("Hijacked");
        foreign.default_unit_cost = Decimal::new(999, 0);
        assert!(matches!(db.upsert_product(&foreign), Err(DbError::Constraint(_))));

        let stored = db.get_product(&product.id).unwrap().unwrap();
        assert_eq!(stored.organization_id, "org-1");
        assert_eq!(stored.name, "Gato");
        assert_eq!(stored.default_unit_cost, Decimal::new(1250, 2));
    }

    #[test]
    fn test_find_by_normalized_name_keeps_duplicates() {
        let db = setup_db();

        let first = Product::new("org-1", "Ácaros");
        let second = Product::new("org-1", "ACAROS");
        let other_org = Product::new("org-2", "Acaros");
        db.upsert_product(&first).unwrap();
        db.upsert_product(&second).unwrap();
        db.upsert_product(&other_org).unwrap();

        let found = db.find_products_by_normalized_name("org-1", "acaros").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, first.id);
        assert_eq!(found[1].id, second.id);
    }

    #[test]
    fn test_deactivate() {
        let db = setup_db();

        let product = Product::new("org-1", "Gato");
        db.upsert_product(&product).unwrap();

        // Another organization cannot deactivate it
        assert!(!db.deactivate_product("org-2", &product.id).unwrap());
        assert!(db.get_product(&product.id).unwrap().unwrap().active);

        assert!(db.deactivate_product("org-1", &product.id).unwrap());

        assert!(db.list_products_for_org("org-1", true).unwrap().is_empty());
        assert!(db.find_products_by_normalized_name("org-1", "gato").unwrap().is_empty());

        // Still retrievable directly
        let product = db.get_product(&product.id).unwrap().unwrap();
        assert!(!product.active);
    }
}
