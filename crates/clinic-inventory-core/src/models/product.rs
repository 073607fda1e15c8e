//! Product catalog models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::resolver::normalize_name;

/// A tenant-scoped product in the clinic catalog.
///
/// Names are not unique: several rows in one organization may share the same
/// normalized name (e.g. the same extract bought from two suppliers).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    /// Primary key
    pub id: String,
    /// Owning organization (tenant)
    pub organization_id: String,
    /// Display name as entered in the catalog
    pub name: String,
    /// Accent-, case- and whitespace-folded name used for matching
    pub normalized_name: String,
    /// Catalog category (e.g. "allergen", "diluent")
    pub category: Option<String>,
    /// Unit of measure (e.g. "mL", "units")
    pub unit: String,
    /// Fallback unit cost when no ENTRY movement exists
    pub default_unit_cost: Decimal,
    /// Reorder threshold
    pub min_stock: Decimal,
    /// Whether the product can still be consumed
    pub active: bool,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

impl Product {
    /// Create a new product with a fresh id.
    pub fn new(organization_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            normalized_name: normalize_name(&name),
            name,
            category: None,
            unit: "mL".into(),
            default_unit_cost: Decimal::ZERO,
            min_stock: Decimal::ZERO,
            active: true,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the catalog default unit cost.
    pub fn with_default_cost(mut self, cost: Decimal) -> Self {
        self.default_unit_cost = cost;
        self
    }

    /// Rename the product, keeping the normalized name in step.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.normalized_name = normalize_name(&self.name);
    }

    /// Case-insensitive category comparison.
    pub fn in_category(&self, category: &str) -> bool {
        self.category
            .as_deref()
            .map(|c| c.trim().to_lowercase() == category.trim().to_lowercase())
            .unwrap_or(false)
    }
}
