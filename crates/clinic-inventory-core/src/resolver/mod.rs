//! Tenant-scoped product resolution.
//!
//! Pipeline: Primary Key → Exact Name → Normalized Name → Stock Fallback

mod normalizer;
mod suggest;

pub use normalizer::*;
pub use suggest::*;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::db::Database;
use crate::models::Product;

/// Resolver errors.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("Product not found: {identifier}")]
    NotFound {
        identifier: String,
        suggestions: Vec<String>,
    },
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// Which resolution step produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    PrimaryKey,
    ExactName,
    NormalizedName,
    /// A same-named product with enough stock replaced the first match
    StockFallback,
}

/// A product reference resolved to a concrete catalog row.
#[derive(Debug, Clone)]
pub struct ResolvedProduct {
    pub product: Product,
    pub strategy: MatchStrategy,
    /// Stock of the product at the requested site when resolved
    pub available: Decimal,
}

/// Resolves loosely specified product references within one organization.
pub struct ProductResolver<'a> {
    db: &'a Database,
    normalizer: Normalizer,
}

impl<'a> ProductResolver<'a> {
    /// Create a resolver without aliases.
    pub fn new(db: &'a Database) -> Self {
        Self::with_normalizer(db, Normalizer::new())
    }

    /// Create a resolver with a configured normalizer.
    pub fn with_normalizer(db: &'a Database, normalizer: Normalizer) -> Self {
        Self { db, normalizer }
    }

    /// Resolve `identifier` to an active product of `organization_id`.
    ///
    /// When `needed` is given and the match is short at `site_id`, another
    /// product with the same normalized name and enough stock is preferred.
    pub fn resolve(
        &self,
        identifier: &str,
        organization_id: &str,
        site_id: &str,
        category_hint: Option<&str>,
        needed: Option<Decimal>,
    ) -> ResolverResult<ResolvedProduct> {
        let (product, strategy) = match self.find(identifier, organization_id, category_hint)? {
            Some(found) => found,
            None => {
                let candidates = self.db.list_products_for_org(organization_id, true)?;
                let suggestions = suggest_names(&self.normalizer.key(identifier), &candidates);
                debug!(identifier, organization_id, ?suggestions, "product not found");
                return Err(ResolverError::NotFound {
                    identifier: identifier.to_string(),
                    suggestions,
                });
            }
        };

        let available = self.db.stock_quantity(&product.id, site_id)?;
        let resolved = ResolvedProduct {
            product,
            strategy,
            available,
        };

        match needed {
            Some(needed) if available < needed => self.prefer_stocked(resolved, organization_id, site_id, needed),
            _ => Ok(resolved),
        }
    }

    fn find(
        &self,
        identifier: &str,
        organization_id: &str,
        category_hint: Option<&str>,
    ) -> ResolverResult<Option<(Product, MatchStrategy)>> {
        let trimmed = identifier.trim();

        if let Some(product) = self.db.get_product_in_org(organization_id, trimmed)? {
            if product.active {
                return Ok(Some((product, MatchStrategy::PrimaryKey)));
            }
        }

        let expanded = self.normalizer.expand_alias(trimmed);
        let wanted = clean_name(expanded);
        let candidates = self.db.list_products_for_org(organization_id, true)?;
        let exact = candidates.iter().find(|p| {
            clean_name(&p.name) == wanted && category_hint.map_or(true, |c| p.in_category(c))
        });
        if let Some(product) = exact {
            return Ok(Some((product.clone(), MatchStrategy::ExactName)));
        }

        let key = self.normalizer.key(trimmed);
        let normalized = self.db.find_products_by_normalized_name(organization_id, &key)?;
        Ok(normalized
            .into_iter()
            .next()
            .map(|p| (p, MatchStrategy::NormalizedName)))
    }

    fn prefer_stocked(
        &self,
        resolved: ResolvedProduct,
        organization_id: &str,
        site_id: &str,
        needed: Decimal,
    ) -> ResolverResult<ResolvedProduct> {
        let siblings = self
            .db
            .find_products_by_normalized_name(organization_id, &resolved.product.normalized_name)?;

        for sibling in siblings {
            if sibling.id == resolved.product.id {
                continue;
            }
            let available = self.db.stock_quantity(&sibling.id, site_id)?;
            if available >= needed {
                debug!(
                    from = %resolved.product.id,
                    to = %sibling.id,
                    %needed,
                    "stock fallback to same-named product"
                );
                return Ok(ResolvedProduct {
                    product: sibling,
                    strategy: MatchStrategy::StockFallback,
                    available,
                });
            }
        }
        Ok(resolved)
    }

    /// Get the normalizer for direct access.
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_product(&Product::new("org-1", "Epitelio de Gato").with_category("allergen"))
            .unwrap();
        db.upsert_product(&Product::new("org-1", "Ácaros").with_category("allergen"))
            .unwrap();
        db.upsert_product(&Product::new("org-1", "Solución Evans").with_category("diluent"))
            .unwrap();
        db.upsert_product(&Product::new("org-2", "Gramíneas").with_category("allergen"))
            .unwrap();
        db
    }

    #[test]
    fn test_resolve_by_primary_key() {
        let db = setup();
        let product = Product::new("org-1", "Perro");
        db.upsert_product(&product).unwrap();

        let resolver = ProductResolver::new(&db);
        let resolved = resolver.resolve(&product.id, "org-1", "site-1", None, None).unwrap();
        assert_eq!(resolved.product.id, product.id);
        assert_eq!(resolved.strategy, MatchStrategy::PrimaryKey);
    }

    #[test]
    fn test_primary_key_is_org_scoped() {
        let db = setup();
        let product = Product::new("org-2", "Perro");
        db.upsert_product(&product).unwrap();

        let resolver = ProductResolver::new(&db);
        assert!(resolver.resolve(&product.id, "org-1", "site-1", None, None).is_err());
    }

    #[test]
    fn test_resolve_exact_name_ignores_case_and_padding() {
        let db = setup();
        let resolver = ProductResolver::new(&db);

        let resolved = resolver
            .resolve("  epitelio DE gato ", "org-1", "site-1", Some("allergen"), None)
            .unwrap();
        assert_eq!(resolved.product.name, "Epitelio de Gato");
        assert_eq!(resolved.strategy, MatchStrategy::ExactName);
    }

    #[test]
    fn test_category_hint_falls_through_to_normalized() {
        let db = setup();
        let resolver = ProductResolver::new(&db);

        // Wrong category skips step 2 but the normalized step still matches
        let resolved = resolver
            .resolve("Epitelio de Gato", "org-1", "site-1", Some("diluent"), None)
            .unwrap();
        assert_eq!(resolved.strategy, MatchStrategy::NormalizedName);
    }

    #[test]
    fn test_resolve_without_accents_or_spaces() {
        let db = setup();
        let resolver = ProductResolver::new(&db);

        let resolved = resolver.resolve("acaros", "org-1", "site-1", None, None).unwrap();
        assert_eq!(resolved.product.name, "Ácaros");
        assert_eq!(resolved.strategy, MatchStrategy::NormalizedName);

        let resolved = resolver.resolve("SOLUCIONEVANS", "org-1", "site-1", None, None).unwrap();
        assert_eq!(resolved.product.name, "Solución Evans");
    }

    #[test]
    fn test_resolve_through_alias() {
        let db = setup();
        let resolver =
            ProductResolver::with_normalizer(&db, Normalizer::with_aliases([("evans", "Solución Evans")]));

        let resolved = resolver.resolve("Evans", "org-1", "site-1", None, None).unwrap();
        assert_eq!(resolved.product.name, "Solución Evans");
        assert_eq!(resolved.strategy, MatchStrategy::ExactName);
    }

    #[test]
    fn test_not_found_is_tenant_scoped_and_suggests() {
        let db = setup();
        let resolver = ProductResolver::new(&db);

        // Exists only in org-2
        match resolver.resolve("Gramíneas", "org-1", "site-1", None, None) {
            Err(ResolverError::NotFound { identifier, .. }) => assert_eq!(identifier, "Gramíneas"),
            other => panic!("expected NotFound, got {:?}", other.map(|r| r.product.name)),
        }

        match resolver.resolve("Acaro", "org-1", "site-1", None, None) {
            Err(ResolverError::NotFound { suggestions, .. }) => {
                assert_eq!(suggestions.first().map(String::as_str), Some("Ácaros"));
            }
            other => panic!("expected NotFound, got {:?}", other.map(|r| r.product.name)),
        }
    }

    #[test]
    fn test_stock_fallback_prefers_stocked_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let empty = Product::new("org-1", "Gato");
        let stocked = Product::new("org-1", "gato ");
        db.upsert_product(&empty).unwrap();
        db.upsert_product(&stocked).unwrap();
        db.increment_stock(&stocked.id, "site-1", Decimal::new(5, 0)).unwrap();

        let resolver = ProductResolver::new(&db);
        let resolved = resolver
            .resolve("Gato", "org-1", "site-1", None, Some(Decimal::new(2, 0)))
            .unwrap();
        assert_eq!(resolved.product.id, stocked.id);
        assert_eq!(resolved.strategy, MatchStrategy::StockFallback);
        assert_eq!(resolved.available, Decimal::new(5, 0));

        // Without a quantity the first match stands
        let resolved = resolver.resolve("Gato", "org-1", "site-1", None, None).unwrap();
        assert_eq!(resolved.product.id, empty.id);
    }

    #[test]
    fn test_no_fallback_keeps_first_match() {
        let db = Database::open_in_memory().unwrap();
        let only = Product::new("org-1", "Gato");
        db.upsert_product(&only).unwrap();

        let resolver = ProductResolver::new(&db);
        let resolved = resolver
            .resolve("Gato", "org-1", "site-1", None, Some(Decimal::ONE))
            .unwrap();
        assert_eq!(resolved.product.id, only.id);
        assert_eq!(resolved.available, Decimal::ZERO);
    }
}
