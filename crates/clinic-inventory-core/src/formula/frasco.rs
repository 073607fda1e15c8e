//! Glicerinado-en-Frasco: graduated-frasco dosing.
//!
//! For every selected frasco level `f` (1-6) and `n` allergens:
//! - each allergen consumes `round(factor[f] × doses, 4)` per frasco
//! - Evans diluent: `Σ_f (3 − factor[f] × n) × doses`
//! - bacterial diluent: `frascos × 2 × doses`

use rust_decimal::{Decimal, RoundingStrategy};

use super::{checked, FormulaError, FormulaInput, FormulaResult, FormulaStrategy};
use crate::models::{ComponentKind, ConsumptionPlan, TreatmentSubtype};

/// mL of extract per dose, indexed by frasco level − 1.
pub const FRASCO_FACTORS: [Decimal; 6] = [
    Decimal::from_parts(2, 0, 0, false, 3),
    Decimal::from_parts(5, 0, 0, false, 3),
    Decimal::from_parts(2, 0, 0, false, 2),
    Decimal::from_parts(5, 0, 0, false, 2),
    Decimal::from_parts(2, 0, 0, false, 1),
    Decimal::from_parts(5, 0, 0, false, 1),
];

/// Frasco volume (mL) the Evans diluent tops up to.
const FRASCO_VOLUME: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

/// Bacterial diluent per frasco per dose (mL).
const BACTERIAL_PER_FRASCO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Decimal places kept on per-allergen volumes.
const ALLERGEN_SCALE: u32 = 4;

/// Factor for a frasco level, if the level exists.
pub fn frasco_factor(level: u8) -> Option<Decimal> {
    match level {
        1..=6 => Some(FRASCO_FACTORS[usize::from(level - 1)]),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct FrascoFormula {
    evans_diluent: String,
    bacterial_diluent: String,
}

impl FrascoFormula {
    pub fn new(evans_diluent: impl Into<String>, bacterial_diluent: impl Into<String>) -> Self {
        Self {
            evans_diluent: evans_diluent.into(),
            bacterial_diluent: bacterial_diluent.into(),
        }
    }

    fn levels(input: &FormulaInput<'_>) -> FormulaResult<Vec<u8>> {
        if input.params.frascos.is_empty() {
            return Err(FormulaError::InvalidParameters(
                "at least one frasco level is required".into(),
            ));
        }
        let mut levels = input.params.frascos.clone();
        if let Some(bad) = levels.iter().find(|l| frasco_factor(**l).is_none()) {
            return Err(FormulaError::InvalidParameters(format!(
                "frasco level {} is outside 1-6",
                bad
            )));
        }
        // Levels form a set
        levels.sort_unstable();
        levels.dedup();
        Ok(levels)
    }
}

impl FormulaStrategy for FrascoFormula {
    fn subtype(&self) -> TreatmentSubtype {
        TreatmentSubtype::GlicerinadoFrasco
    }

    fn compute(&self, input: &FormulaInput<'_>) -> FormulaResult<ConsumptionPlan> {
        let levels = Self::levels(input)?;

        let doses = match input.params.doses {
            Some(d) if d > Decimal::ZERO => d,
            Some(d) => {
                return Err(FormulaError::InvalidParameters(format!(
                    "doses must be positive, got {}",
                    d
                )))
            }
            None => return Err(FormulaError::InvalidParameters("doses are required".into())),
        };

        let allergens = input.allergens();
        if allergens.is_empty() {
            return Err(FormulaError::InvalidParameters(
                "at least one allergen is required".into(),
            ));
        }

        let factors: Vec<Decimal> = levels.iter().filter_map(|l| frasco_factor(*l)).collect();
        let allergen_count = Decimal::from(allergens.len());

        let mut per_allergen = Decimal::ZERO;
        let mut evans = Decimal::ZERO;
        for f in &factors {
            let extract = checked(f.checked_mul(doses), "allergen volume")?
                .round_dp_with_strategy(ALLERGEN_SCALE, RoundingStrategy::MidpointAwayFromZero);
            per_allergen = checked(per_allergen.checked_add(extract), "allergen volume")?;

            let top_up = checked(
                f.checked_mul(allergen_count)
                    .and_then(|used| FRASCO_VOLUME.checked_sub(used))
                    .and_then(|per_dose| per_dose.checked_mul(doses)),
                "Evans volume",
            )?;
            evans = checked(evans.checked_add(top_up), "Evans volume")?;
        }

        let bacterial = checked(
            Decimal::from(factors.len())
                .checked_mul(BACTERIAL_PER_FRASCO)
                .and_then(|per_dose| per_dose.checked_mul(doses)),
            "bacterial volume",
        )?;

        let mut plan = ConsumptionPlan::new(TreatmentSubtype::GlicerinadoFrasco);
        for allergen in allergens {
            plan.push(allergen, ComponentKind::Allergen, per_allergen.normalize());
        }
        plan.push(self.evans_diluent.clone(), ComponentKind::Diluent, evans.normalize());
        plan.push(
            self.bacterial_diluent.clone(),
            ComponentKind::Diluent,
            bacterial.normalize(),
        );
        Ok(plan)
    }
}
