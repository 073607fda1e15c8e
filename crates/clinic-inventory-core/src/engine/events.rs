//! Clinical-record domain events and their at-least-once delivery.
//!
//! The orchestrator writes one [`TreatmentAdministered`] message to the
//! outbox inside the usage transaction. After commit an
//! [`OutboxDispatcher`] hands it to a [`ClinicalRecordPublisher`]; failures
//! leave the message pending for a later [`OutboxDispatcher::dispatch_pending`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Database, DbResult, OutboxMessage};
use crate::models::{ComponentKind, UsageEvent};

/// Event type carried by treatment administration events.
pub const TREATMENT_EVENT_TYPE: &str = "IMMUNOTHERAPY_TREATMENT";

/// Publisher errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Clinical record service unavailable: {0}")]
    Unavailable(String),

    #[error("Clinical record service rejected the event: {0}")]
    Rejected(String),
}

/// One consumed component as reported to the clinical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministeredComponent {
    pub name: String,
    pub kind: ComponentKind,
    pub product_id: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministeredItem {
    pub subtype: String,
    pub allergen_names: Vec<String>,
    pub units: Option<Decimal>,
    pub doses: Option<Decimal>,
    pub frascos: Vec<u8>,
    pub components: Vec<AdministeredComponent>,
}

/// "Treatment administered" event for the clinical-record subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentAdministered {
    pub event_type: String,
    pub usage_event_id: String,
    pub organization_id: String,
    pub site_id: String,
    pub patient_ref: String,
    pub treatment_type: String,
    pub reaction_flag: bool,
    pub reaction_note: Option<String>,
    pub items: Vec<AdministeredItem>,
    pub occurred_at: String,
}

impl TreatmentAdministered {
    /// Build the event from a fully populated usage event.
    pub fn from_usage_event(event: &UsageEvent) -> Self {
        let items = event
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| AdministeredItem {
                subtype: item.subtype.clone(),
                allergen_names: item.allergen_names.clone(),
                units: item.params.units,
                doses: item.params.doses,
                frascos: item.params.frascos.clone(),
                components: event
                    .details
                    .iter()
                    .filter(|d| d.item_index as usize == index)
                    .map(|d| AdministeredComponent {
                        name: d.component_name.clone(),
                        kind: d.component_kind,
                        product_id: d.product_id.clone(),
                        quantity: d.quantity,
                    })
                    .collect(),
            })
            .collect();

        Self {
            event_type: TREATMENT_EVENT_TYPE.to_string(),
            usage_event_id: event.id.clone(),
            organization_id: event.organization_id.clone(),
            site_id: event.site_id.clone(),
            patient_ref: event.patient_ref.clone(),
            treatment_type: event.treatment_type.clone(),
            reaction_flag: event.reaction_flag,
            reaction_note: event.reaction_note.clone(),
            items,
            occurred_at: event.created_at.clone(),
        }
    }
}

/// Downstream clinical-record system.
///
/// Implementations must tolerate the same message more than once; the
/// message id is stable across retries.
pub trait ClinicalRecordPublisher: Send + Sync {
    fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError>;
}

/// Publisher that accepts everything (tests, hosts without a record system).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPublisher;

impl ClinicalRecordPublisher for NoOpPublisher {
    fn publish(&self, _message: &OutboxMessage) -> Result<(), PublishError> {
        Ok(())
    }
}

/// What happened to a usage event's clinical-record message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    Delivered,
    /// Publishing failed; the message stays in the outbox
    Deferred { error: String },
    /// No publisher configured; the host drains the outbox
    Queued,
}

/// Counters from one outbox drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers outbox messages through a publisher.
pub struct OutboxDispatcher<'a> {
    db: &'a Database,
    publisher: &'a dyn ClinicalRecordPublisher,
}

impl<'a> OutboxDispatcher<'a> {
    pub fn new(db: &'a Database, publisher: &'a dyn ClinicalRecordPublisher) -> Self {
        Self { db, publisher }
    }

    /// Publish one message and record the outcome. Never fails.
    pub fn dispatch(&self, message: &OutboxMessage) -> NotificationStatus {
        match self.publisher.publish(message) {
            Ok(()) => {
                if let Err(e) = self.db.mark_outbox_delivered(&message.id) {
                    // Stays pending and will be published again
                    warn!(message_id = %message.id, error = %e, "failed to mark outbox message delivered");
                }
                info!(message_id = %message.id, usage_event_id = %message.usage_event_id, "clinical record event delivered");
                NotificationStatus::Delivered
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    usage_event_id = %message.usage_event_id,
                    error = %e,
                    "clinical record event deferred"
                );
                if let Err(db_err) = self.db.record_outbox_failure(&message.id, &e.to_string()) {
                    warn!(message_id = %message.id, error = %db_err, "failed to record outbox failure");
                }
                NotificationStatus::Deferred { error: e.to_string() }
            }
        }
    }

    /// Retry up to `limit` pending messages, oldest first.
    pub fn dispatch_pending(&self, limit: usize) -> DbResult<DispatchReport> {
        let mut report = DispatchReport::default();
        for message in self.db.list_pending_outbox(limit)? {
            match self.dispatch(&message) {
                NotificationStatus::Delivered => report.delivered += 1,
                _ => report.failed += 1,
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::OutboxStatus;
    use crate::models::{QuantityParams, TenantContext, TreatmentItem, UsageDetail, UsageRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then accepts.
    struct FlakyPublisher {
        failures: usize,
        calls: AtomicUsize,
    }

    impl ClinicalRecordPublisher for FlakyPublisher {
        fn publish(&self, _message: &OutboxMessage) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PublishError::Unavailable("timeout".into()))
            } else {
                Ok(())
            }
        }
    }

    fn usage_event() -> UsageEvent {
        let ctx = TenantContext {
            organization_id: "org-1".into(),
            site_id: "site-1".into(),
            consultorio_id: "cons-1".into(),
            user_id: "user-1".into(),
        };
        let request = UsageRequest {
            patient_ref: "patient-1".into(),
            treatment_type: "immunotherapy".into(),
            reaction_flag: true,
            reaction_note: Some("mild erythema".into()),
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
        };
        UsageEvent::new(&ctx, &request)
    }

    fn queued(db: &Database) -> OutboxMessage {
        let event = usage_event();
        db.insert_usage_event(&event).unwrap();
        let payload = serde_json::to_string(&TreatmentAdministered::from_usage_event(&event)).unwrap();
        let message = OutboxMessage::pending(&event.id, TREATMENT_EVENT_TYPE, payload);
        db.insert_outbox_message(&message).unwrap();
        message
    }

    #[test]
    fn test_event_groups_components_by_item() {
        let mut event = usage_event();
        event.details.push(UsageDetail {
            id: "d1".into(),
            usage_event_id: event.id.clone(),
            movement_id: "m1".into(),
            item_index: 0,
            component_name: "Gato".into(),
            component_kind: ComponentKind::Allergen,
            product_id: "p1".into(),
            quantity: Decimal::new(8, 2),
            unit_cost: Decimal::ONE,
            total_cost: Decimal::new(8, 2),
        });

        let payload = TreatmentAdministered::from_usage_event(&event);
        assert_eq!(payload.event_type, TREATMENT_EVENT_TYPE);
        assert!(payload.reaction_flag);
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].doses, Some(Decimal::new(4, 0)));
        assert_eq!(payload.items[0].components.len(), 1);
        assert_eq!(payload.items[0].allergen_names, vec!["Gato".to_string()]);
    }

    #[test]
    fn test_dispatch_delivers() {
        let db = Database::open_in_memory().unwrap();
        let message = queued(&db);

        let status = OutboxDispatcher::new(&db, &NoOpPublisher).dispatch(&message);
        assert_eq!(status, NotificationStatus::Delivered);
        let stored = db.get_outbox_message(&message.id).unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Delivered);
    }

    #[test]
    fn test_failure_defers_then_retry_delivers() {
        let db = Database::open_in_memory().unwrap();
        let message = queued(&db);
        let publisher = FlakyPublisher {
            failures: 1,
            calls: AtomicUsize::new(0),
        };
        let dispatcher = OutboxDispatcher::new(&db, &publisher);

        let status = dispatcher.dispatch(&message);
        assert!(matches!(status, NotificationStatus::Deferred { ref error } if error.contains("timeout")));
        let stored = db.get_outbox_message(&message.id).unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempts, 1);

        let report = dispatcher.dispatch_pending(10).unwrap();
        assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
        assert!(db.list_pending_outbox(10).unwrap().is_empty());
    }

    #[test]
    fn test_notification_status_serializes_tagged() {
        let json = serde_json::to_string(&NotificationStatus::Deferred { error: "down".into() }).unwrap();
        assert_eq!(json, r#"{"status":"deferred","error":"down"}"#);
    }
}
