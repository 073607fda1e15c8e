//! Dosage-to-volume formulas, one strategy per treatment subtype.
//!
//! Strategies are pure: they map administration parameters to a
//! [`ConsumptionPlan`] and never touch the database. The orchestrator looks
//! them up in a [`FormulaRegistry`] by subtype.

mod coefficient;
mod frasco;

pub use coefficient::*;
pub use frasco::*;

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::models::{ConsumptionPlan, QuantityParams, TreatmentItem, TreatmentSubtype};

/// Formula errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Unsupported treatment subtype: {0}")]
    UnsupportedSubtype(String),
}

pub type FormulaResult<T> = Result<T, FormulaError>;

/// Unwrap a checked decimal operation, naming the quantity that overflowed.
pub(crate) fn checked(value: Option<Decimal>, what: &str) -> FormulaResult<Decimal> {
    value.ok_or_else(|| FormulaError::InvalidParameters(format!("{} is too large", what)))
}

/// Inputs of one treatment item, borrowed from the request.
#[derive(Debug, Clone, Copy)]
pub struct FormulaInput<'a> {
    pub params: &'a QuantityParams,
    pub allergen_names: &'a [String],
    /// The item's own product reference, for protocols that consume one
    pub product_ref: Option<&'a str>,
}

impl<'a> FormulaInput<'a> {
    pub fn from_item(item: &'a TreatmentItem) -> Self {
        Self {
            params: &item.params,
            allergen_names: &item.allergen_names,
            product_ref: item.product_ref.as_deref(),
        }
    }

    /// Allergen names with blanks removed.
    pub fn allergens(&self) -> Vec<&'a str> {
        self.allergen_names
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

/// A treatment protocol's consumption formula.
pub trait FormulaStrategy: Send + Sync {
    /// Subtype this strategy is registered under.
    fn subtype(&self) -> TreatmentSubtype;

    /// Compute the components one item consumes.
    fn compute(&self, input: &FormulaInput<'_>) -> FormulaResult<ConsumptionPlan>;
}

/// Subtype → strategy lookup, injected into the orchestrator.
#[derive(Clone, Default)]
pub struct FormulaRegistry {
    strategies: HashMap<TreatmentSubtype, Arc<dyn FormulaStrategy>>,
}

impl FormulaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the frasco formula and every configured coefficient table.
    ///
    /// A configured table for `glicerinado_frasco` replaces the built-in formula.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(FrascoFormula::new(
            config.evans_diluent.clone(),
            config.bacterial_diluent.clone(),
        ));
        for (subtype, table) in &config.protocols {
            registry.register(CoefficientFormula::new(*subtype, table.clone()));
        }
        registry
    }

    /// Register a strategy, replacing any previous one for its subtype.
    pub fn register<S: FormulaStrategy + 'static>(&mut self, strategy: S) {
        self.strategies.insert(strategy.subtype(), Arc::new(strategy));
    }

    pub fn get(&self, subtype: TreatmentSubtype) -> Option<&Arc<dyn FormulaStrategy>> {
        self.strategies.get(&subtype)
    }

    pub fn contains(&self, subtype: TreatmentSubtype) -> bool {
        self.strategies.contains_key(&subtype)
    }

    /// Registered subtypes in declaration order.
    pub fn subtypes(&self) -> Vec<TreatmentSubtype> {
        TreatmentSubtype::ALL
            .iter()
            .copied()
            .filter(|s| self.contains(*s))
            .collect()
    }

    /// Run the strategy registered for `subtype`.
    pub fn compute(&self, subtype: TreatmentSubtype, input: &FormulaInput<'_>) -> FormulaResult<ConsumptionPlan> {
        let strategy = self
            .get(subtype)
            .ok_or_else(|| FormulaError::UnsupportedSubtype(subtype.to_string()))?;
        strategy.compute(input)
    }
}
