//! Usage event models: one clinical treatment administration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::movement::Movement;
use super::plan::ComponentKind;

/// Tenant and operator context supplied by the host application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantContext {
    pub organization_id: String,
    pub site_id: String,
    pub consultorio_id: String,
    pub user_id: String,
}

/// Protocol-dependent quantity parameters of a treatment item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuantityParams {
    /// Units administered (per-unit protocols)
    pub units: Option<Decimal>,
    /// Dose count
    pub doses: Option<Decimal>,
    /// Selected frasco levels (1-6)
    #[serde(default)]
    pub frascos: Vec<u8>,
}

/// One treatment line in a usage request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreatmentItem {
    /// Protocol tag, e.g. "glicerinado_frasco"
    pub subtype: String,
    /// Product id or name of the item's own product, if any
    pub product_ref: Option<String>,
    pub params: QuantityParams,
    #[serde(default)]
    pub allergen_names: Vec<String>,
}

/// Incoming request to record a treatment administration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRequest {
    pub patient_ref: String,
    pub treatment_type: String,
    pub reaction_flag: bool,
    pub reaction_note: Option<String>,
    pub items: Vec<TreatmentItem>,
}

/// Lifecycle of a usage event inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageState {
    Received,
    Validating,
    Consuming,
    Committed,
    Rejected,
}

impl UsageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageState::Received => "received",
            UsageState::Validating => "validating",
            UsageState::Consuming => "consuming",
            UsageState::Committed => "committed",
            UsageState::Rejected => "rejected",
        }
    }
}

/// Link between a usage event and one EXIT movement, with a cost snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageDetail {
    pub id: String,
    pub usage_event_id: String,
    pub movement_id: String,
    /// Index of the treatment item that produced this line
    pub item_index: u32,
    pub component_name: String,
    pub component_kind: ComponentKind,
    pub product_id: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
}

/// A committed treatment administration with its ledger footprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEvent {
    pub id: String,
    pub organization_id: String,
    pub site_id: String,
    pub consultorio_id: String,
    pub user_id: String,
    pub patient_ref: String,
    pub treatment_type: String,
    pub reaction_flag: bool,
    pub reaction_note: Option<String>,
    pub items: Vec<TreatmentItem>,
    pub created_at: String,
    pub details: Vec<UsageDetail>,
    pub movements: Vec<Movement>,
}

impl UsageEvent {
    /// Create the event shell for a request.
    pub fn new(context: &TenantContext, request: &UsageRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: context.organization_id.clone(),
            site_id: context.site_id.clone(),
            consultorio_id: context.consultorio_id.clone(),
            user_id: context.user_id.clone(),
            patient_ref: request.patient_ref.clone(),
            treatment_type: request.treatment_type.clone(),
            reaction_flag: request.reaction_flag,
            reaction_note: request.reaction_note.clone(),
            items: request.items.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            details: Vec::new(),
            movements: Vec::new(),
        }
    }

    /// Sum of the cost snapshots of all details.
    ///
    /// Saturates at the decimal bounds; committed events are checked with
    /// [`UsageEvent::checked_total_cost`] and never saturate.
    pub fn total_cost(&self) -> Decimal {
        self.details
            .iter()
            .fold(Decimal::ZERO, |total, d| total.saturating_add(d.total_cost))
    }

    /// Sum of the cost snapshots, or `None` if it overflows.
    pub fn checked_total_cost(&self) -> Option<Decimal> {
        self.details
            .iter()
            .try_fold(Decimal::ZERO, |total, d| total.checked_add(d.total_cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> UsageRequest {
        UsageRequest {
            patient_ref: "patient-1".into(),
            treatment_type: "immunotherapy".into(),
            reaction_flag: true,
            reaction_note: Some("local wheal 2cm".into()),
            items: vec![TreatmentItem {
                subtype: "glicerinado_frasco".into(),
                product_ref: None,
                params: QuantityParams {
                    doses: Some(Decimal::new(4, 0)),
                    frascos: vec![3],
                    ..Default::default()
                },
                allergen_names: vec!["Gato".into()],
            }],
        }
    }

    #[test]
    fn test_usage_event_new_copies_context() {
        let ctx = TenantContext {
            organization_id: "org-1".into(),
            site_id: "site-1".into(),
            consultorio_id: "cons-1".into(),
            user_id: "user-1".into(),
        };
        let event = UsageEvent::new(&ctx, &request());

        assert_eq!(event.organization_id, "org-1");
        assert_eq!(event.patient_ref, "patient-1");
        assert!(event.reaction_flag);
        assert_eq!(event.items.len(), 1);
        assert_eq!(event.total_cost(), Decimal::ZERO);
    }

    #[test]
    fn test_total_cost_overflow_is_detected() {
        let ctx = TenantContext {
            organization_id: "org-1".into(),
            site_id: "site-1".into(),
            consultorio_id: "cons-1".into(),
            user_id: "user-1".into(),
        };
        let mut event = UsageEvent::new(&ctx, &request());
        for index in 0..2 {
            event.details.push(UsageDetail {
                id: format!("d{}", index),
                usage_event_id: event.id.clone(),
                movement_id: format!("m{}", index),
                item_index: 0,
                component_name: "Gato".into(),
                component_kind: ComponentKind::Allergen,
                product_id: "p1".into(),
                quantity: Decimal::ONE,
                unit_cost: Decimal::MAX,
                total_cost: Decimal::MAX,
            });
        }

        assert_eq!(event.checked_total_cost(), None);
        assert_eq!(event.total_cost(), Decimal::MAX);
    }

    #[test]
    fn test_request_deserializes_without_optional_lists() {
        let json = r#"{
            "patient_ref": "p",
            "treatment_type": "immunotherapy",
            "reaction_flag": false,
            "reaction_note": null,
            "items": [{"subtype": "sublingual", "product_ref": "Kit SL", "params": {"units": "2", "doses": null}}]
        }"#;
        let parsed: UsageRequest = serde_json::from_str(json).unwrap();
        assert!(parsed.items[0].allergen_names.is_empty());
        assert!(parsed.items[0].params.frascos.is_empty());
        assert_eq!(parsed.items[0].params.units, Some(Decimal::new(2, 0)));
    }
}
