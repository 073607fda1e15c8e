//! Pre-consumption stock validation.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::models::{ComponentKind, PlannedComponent, Product};
use crate::resolver::{MatchStrategy, ProductResolver};

/// One planned component of one treatment item.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLine {
    pub item_index: u32,
    pub component: PlannedComponent,
}

/// A plan line bound to a concrete product.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLine {
    pub item_index: u32,
    pub component: PlannedComponent,
    pub product: Product,
    pub strategy: MatchStrategy,
}

/// Every line resolved, with stock covering the aggregate requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub lines: Vec<ResolvedLine>,
}

impl ValidatedPlan {
    /// Total quantity required from a product across all lines.
    ///
    /// Validation already summed the same lines with checked addition.
    pub fn required_from(&self, product_id: &str) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.product.id == product_id)
            .map(|l| l.component.quantity)
            .sum()
    }
}

/// A product that cannot cover what the usage event needs from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortfall {
    /// Component name(s) as planned
    pub component: String,
    pub product_id: String,
    pub product_name: String,
    pub required: Decimal,
    pub available: Decimal,
    pub missing: Decimal,
}

/// Read-only check of every component against current stock.
pub struct StockValidator<'a> {
    db: &'a Database,
    resolver: ProductResolver<'a>,
    allergen_category: Option<String>,
    diluent_category: Option<String>,
}

impl<'a> StockValidator<'a> {
    /// Validator without category hints or aliases.
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            resolver: ProductResolver::new(db),
            allergen_category: None,
            diluent_category: None,
        }
    }

    /// Validator using the configured aliases and category hints.
    pub fn from_config(db: &'a Database, config: &EngineConfig) -> Self {
        Self {
            db,
            resolver: ProductResolver::with_normalizer(db, config.normalizer()),
            allergen_category: config.allergen_category.clone(),
            diluent_category: config.diluent_category.clone(),
        }
    }

    fn category_hint(&self, kind: ComponentKind) -> Option<&str> {
        match kind {
            ComponentKind::Allergen => self.allergen_category.as_deref(),
            ComponentKind::Diluent => self.diluent_category.as_deref(),
            ComponentKind::Product => None,
        }
    }

    /// Resolve every line and compare aggregate requirements with stock.
    ///
    /// An unresolvable component aborts at once; shortfalls are collected for
    /// every product before failing.
    pub fn validate(
        &self,
        lines: &[PlanLine],
        organization_id: &str,
        site_id: &str,
    ) -> EngineResult<ValidatedPlan> {
        let mut resolved = Vec::with_capacity(lines.len());
        for line in lines {
            let hint = self.category_hint(line.component.kind);
            let found = self.resolver.resolve(
                &line.component.name,
                organization_id,
                site_id,
                hint,
                Some(line.component.quantity),
            )?;
            debug!(
                component = %line.component.name,
                product_id = %found.product.id,
                strategy = ?found.strategy,
                "component resolved"
            );
            resolved.push(ResolvedLine {
                item_index: line.item_index,
                component: line.component.clone(),
                product: found.product,
                strategy: found.strategy,
            });
        }

        let mut order: Vec<&str> = Vec::new();
        let mut totals: HashMap<&str, (Decimal, Vec<&str>, &Product)> = HashMap::new();
        for line in &resolved {
            let entry = totals.entry(line.product.id.as_str()).or_insert_with(|| {
                order.push(line.product.id.as_str());
                (Decimal::ZERO, Vec::new(), &line.product)
            });
            entry.0 = entry.0.checked_add(line.component.quantity).ok_or_else(|| {
                EngineError::InvalidParameters(format!("total required of {} is too large", line.product.name))
            })?;
            if !entry.1.contains(&line.component.name.as_str()) {
                entry.1.push(line.component.name.as_str());
            }
        }

        let mut shortfalls = Vec::new();
        for product_id in order {
            let Some((required, names, product)) = totals.get(product_id) else {
                continue;
            };
            let available = self.db.stock_quantity(product_id, site_id)?;
            if available < *required {
                shortfalls.push(Shortfall {
                    component: names.join(", "),
                    product_id: product_id.to_string(),
                    product_name: product.name.clone(),
                    required: *required,
                    available,
                    missing: *required - available,
                });
            }
        }

        if !shortfalls.is_empty() {
            return Err(EngineError::InsufficientStock(shortfalls));
        }
        Ok(ValidatedPlan { lines: resolved })
    }
}
