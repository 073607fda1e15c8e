//! Consumption plans produced by formula strategies.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::resolver::normalize_name;

/// Treatment protocol carried on each treatment item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentSubtype {
    /// Glycerinated extract dosed per unit
    GlicerinadoUnidad,
    /// Glycerinated extract dosed from graduated frascos
    GlicerinadoFrasco,
    AlxoidA,
    AlxoidB,
    AlxoidB2,
    Sublingual,
}

impl TreatmentSubtype {
    pub const ALL: [TreatmentSubtype; 6] = [
        TreatmentSubtype::GlicerinadoUnidad,
        TreatmentSubtype::GlicerinadoFrasco,
        TreatmentSubtype::AlxoidA,
        TreatmentSubtype::AlxoidB,
        TreatmentSubtype::AlxoidB2,
        TreatmentSubtype::Sublingual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentSubtype::GlicerinadoUnidad => "glicerinado_unidad",
            TreatmentSubtype::GlicerinadoFrasco => "glicerinado_frasco",
            TreatmentSubtype::AlxoidA => "alxoid_a",
            TreatmentSubtype::AlxoidB => "alxoid_b",
            TreatmentSubtype::AlxoidB2 => "alxoid_b2",
            TreatmentSubtype::Sublingual => "sublingual",
        }
    }
}

impl fmt::Display for TreatmentSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreatmentSubtype {
    type Err = String;

    /// Accepts clinic spellings: "Glicerinado en Frasco", "glicerinado-por-unidad",
    /// "Alxoid Tipo B.2", "SUBLINGUAL", ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = normalize_name(s)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "glicerinadounidad" | "glicerinadoporunidad" | "glicerinadoenunidad" => {
                Ok(TreatmentSubtype::GlicerinadoUnidad)
            }
            "glicerinadofrasco" | "glicerinadoenfrasco" | "glicerinadoporfrasco" => {
                Ok(TreatmentSubtype::GlicerinadoFrasco)
            }
            "alxoida" | "alxoidtipoa" => Ok(TreatmentSubtype::AlxoidA),
            "alxoidb" | "alxoidtipob" => Ok(TreatmentSubtype::AlxoidB),
            "alxoidb2" | "alxoidtipob2" => Ok(TreatmentSubtype::AlxoidB2),
            "sublingual" => Ok(TreatmentSubtype::Sublingual),
            _ => Err(s.trim().to_string()),
        }
    }
}

/// What role a planned component plays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Allergen,
    Diluent,
    /// The item's own product (vial, kit) consumed by unit
    Product,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Allergen => "allergen",
            ComponentKind::Diluent => "diluent",
            ComponentKind::Product => "product",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allergen" => Some(ComponentKind::Allergen),
            "diluent" => Some(ComponentKind::Diluent),
            "product" => Some(ComponentKind::Product),
            _ => None,
        }
    }
}

/// One component a treatment item needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedComponent {
    /// Product identifier or name, resolved later
    pub name: String,
    pub kind: ComponentKind,
    /// mL or units consumed
    pub quantity: Decimal,
}

/// Output of a formula strategy. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumptionPlan {
    pub subtype: TreatmentSubtype,
    pub components: Vec<PlannedComponent>,
}

impl ConsumptionPlan {
    pub fn new(subtype: TreatmentSubtype) -> Self {
        Self {
            subtype,
            components: Vec::new(),
        }
    }

    /// Add a component; zero or negative quantities are dropped.
    pub fn push(&mut self, name: impl Into<String>, kind: ComponentKind, quantity: Decimal) {
        if quantity > Decimal::ZERO {
            self.components.push(PlannedComponent {
                name: name.into(),
                kind,
                quantity,
            });
        }
    }

    pub fn allergens(&self) -> impl Iterator<Item = &PlannedComponent> {
        self.components
            .iter()
            .filter(|c| c.kind == ComponentKind::Allergen)
    }

    pub fn diluents(&self) -> impl Iterator<Item = &PlannedComponent> {
        self.components
            .iter()
            .filter(|c| c.kind == ComponentKind::Diluent)
    }

    /// Quantity planned for a component name (exact match).
    pub fn quantity_of(&self, name: &str) -> Option<Decimal> {
        self.components
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.quantity)
    }
}
