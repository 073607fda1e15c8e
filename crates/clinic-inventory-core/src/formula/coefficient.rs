//! Data-driven formula for protocols whose coefficients come from configuration.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::{checked, FormulaError, FormulaInput, FormulaResult, FormulaStrategy};
use crate::models::{ComponentKind, ConsumptionPlan, TreatmentSubtype};

/// Which quantity parameter the coefficients multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuantityBasis {
    #[default]
    Units,
    Doses,
}

/// Coefficient table of one protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTable {
    #[serde(default)]
    pub basis: QuantityBasis,
    /// mL of each allergen per basis unit
    #[serde(default)]
    pub per_allergen: Decimal,
    /// Diluent name → mL per basis unit
    #[serde(default)]
    pub diluents: BTreeMap<String, Decimal>,
    /// Units of the item's own product per basis unit
    #[serde(default)]
    pub item_product: Option<Decimal>,
}

/// Linear formula: every component is `coefficient × basis quantity`.
#[derive(Debug, Clone)]
pub struct CoefficientFormula {
    subtype: TreatmentSubtype,
    table: CoefficientTable,
}

impl CoefficientFormula {
    pub fn new(subtype: TreatmentSubtype, table: CoefficientTable) -> Self {
        Self { subtype, table }
    }

    pub fn table(&self) -> &CoefficientTable {
        &self.table
    }

    fn basis_quantity(&self, input: &FormulaInput<'_>) -> FormulaResult<Decimal> {
        let (label, value) = match self.table.basis {
            QuantityBasis::Units => ("units", input.params.units),
            QuantityBasis::Doses => ("doses", input.params.doses),
        };
        match value {
            Some(v) if v > Decimal::ZERO => Ok(v),
            Some(v) => Err(FormulaError::InvalidParameters(format!(
                "{} must be positive, got {}",
                label, v
            ))),
            None => Err(FormulaError::InvalidParameters(format!(
                "{} are required for {}",
                label, self.subtype
            ))),
        }
    }
}

impl FormulaStrategy for CoefficientFormula {
    fn subtype(&self) -> TreatmentSubtype {
        self.subtype
    }

    fn compute(&self, input: &FormulaInput<'_>) -> FormulaResult<ConsumptionPlan> {
        let quantity = self.basis_quantity(input)?;
        let allergens = input.allergens();
        if self.table.per_allergen > Decimal::ZERO && allergens.is_empty() {
            return Err(FormulaError::InvalidParameters(format!(
                "{} requires at least one allergen",
                self.subtype
            )));
        }

        let mut plan = ConsumptionPlan::new(self.subtype);

        let per_allergen = checked(self.table.per_allergen.checked_mul(quantity), "allergen volume")?
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
            .normalize();
        for allergen in allergens {
            plan.push(allergen, ComponentKind::Allergen, per_allergen);
        }

        for (diluent, coefficient) in &self.table.diluents {
            let volume = checked(coefficient.checked_mul(quantity), diluent)?;
            plan.push(diluent.clone(), ComponentKind::Diluent, volume.normalize());
        }

        if let Some(coefficient) = self.table.item_product {
            let product_ref = input
                .product_ref
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    FormulaError::InvalidParameters(format!("{} requires a product reference", self.subtype))
                })?;
            let units = checked(coefficient.checked_mul(quantity), product_ref)?;
            plan.push(product_ref, ComponentKind::Product, units.normalize());
        }

        if plan.components.is_empty() {
            return Err(FormulaError::InvalidParameters(format!(
                "{} produced no components",
                self.subtype
            )));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuantityParams;

    fn sublingual() -> CoefficientFormula {
        CoefficientFormula::new(
            TreatmentSubtype::Sublingual,
            CoefficientTable {
                basis: QuantityBasis::Units,
                per_allergen: Decimal::ZERO,
                diluents: BTreeMap::new(),
                item_product: Some(Decimal::ONE),
            },
        )
    }

    fn alxoid() -> CoefficientFormula {
        let mut diluents = BTreeMap::new();
        diluents.insert("Diluyente Alxoid".to_string(), Decimal::new(5, 1));
        CoefficientFormula::new(
            TreatmentSubtype::AlxoidA,
            CoefficientTable {
                basis: QuantityBasis::Doses,
                per_allergen: Decimal::new(25, 2),
                diluents,
                item_product: None,
            },
        )
    }

    #[test]
    fn test_item_product_by_units() {
        let params = QuantityParams {
            units: Some(Decimal::new(2, 0)),
            ..Default::default()
        };
        let plan = sublingual()
            .compute(&FormulaInput {
                params: &params,
                allergen_names: &[],
                product_ref: Some("Kit Sublingual"),
            })
            .unwrap();

        assert_eq!(plan.components.len(), 1);
        assert_eq!(plan.components[0].kind, ComponentKind::Product);
        assert_eq!(plan.quantity_of("Kit Sublingual"), Some(Decimal::new(2, 0)));
    }

    #[test]
    fn test_item_product_requires_reference() {
        let params = QuantityParams {
            units: Some(Decimal::ONE),
            ..Default::default()
        };
        let result = sublingual().compute(&FormulaInput {
            params: &params,
            allergen_names: &[],
            product_ref: None,
        });
        assert!(matches!(result, Err(FormulaError::InvalidParameters(_))));
    }

    #[test]
    fn test_allergens_and_diluents_by_doses() {
        let params = QuantityParams {
            doses: Some(Decimal::new(3, 0)),
            ..Default::default()
        };
        let names = vec!["Gato".to_string(), "Olivo".to_string()];
        let plan = alxoid()
            .compute(&FormulaInput {
                params: &params,
                allergen_names: &names,
                product_ref: None,
            })
            .unwrap();

        assert_eq!(plan.quantity_of("Gato"), Some(Decimal::new(75, 2)));
        assert_eq!(plan.quantity_of("Olivo"), Some(Decimal::new(75, 2)));
        assert_eq!(plan.quantity_of("Diluyente Alxoid"), Some(Decimal::new(15, 1)));
    }

    #[test]
    fn test_oversized_quantity_is_invalid() {
        let mut table = alxoid().table().clone();
        table.per_allergen = Decimal::new(2, 0);
        let params = QuantityParams {
            doses: Some(Decimal::MAX),
            ..Default::default()
        };
        let names = vec!["Gato".to_string()];
        let result = CoefficientFormula::new(TreatmentSubtype::AlxoidA, table).compute(&FormulaInput {
            params: &params,
            allergen_names: &names,
            product_ref: None,
        });
        assert!(matches!(result, Err(FormulaError::InvalidParameters(_))));

        let mut table = sublingual().table().clone();
        table.item_product = Some(Decimal::new(2, 0));
        let params = QuantityParams {
            units: Some(Decimal::MAX),
            ..Default::default()
        };
        let result = CoefficientFormula::new(TreatmentSubtype::Sublingual, table).compute(&FormulaInput {
            params: &params,
            allergen_names: &[],
            product_ref: Some("Kit Sublingual"),
        });
        assert!(matches!(result, Err(FormulaError::InvalidParameters(_))));
    }

    #[test]
    fn test_wrong_basis_is_rejected() {
        // Alxoid is dosed by doses; units alone are not enough
        let params = QuantityParams {
            units: Some(Decimal::new(3, 0)),
            ..Default::default()
        };
        let names = vec!["Gato".to_string()];
        let result = alxoid().compute(&FormulaInput {
            params: &params,
            allergen_names: &names,
            product_ref: None,
        });
        assert!(matches!(result, Err(FormulaError::InvalidParameters(_))));
    }

    #[test]
    fn test_table_deserializes_with_defaults() {
        let json = r#"{"basis": "doses", "per_allergen": "0.1", "diluents": {"Evans": "2"}}"#;
        let table: CoefficientTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.basis, QuantityBasis::Doses);
        assert_eq!(table.per_allergen, Decimal::new(1, 1));
        assert_eq!(table.diluents.get("Evans"), Some(&Decimal::new(2, 0)));
        assert_eq!(table.item_product, None);
    }
}
