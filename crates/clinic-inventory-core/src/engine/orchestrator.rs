//! Usage event orchestration.
//!
//! State machine per usage event:
//! `Received → Validating → Consuming → Committed` or `… → Rejected`.
//! Everything up to the commit runs in one `BEGIN IMMEDIATE` transaction;
//! any error drops it and nothing is written.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::costing::CostingResolver;
use super::events::{ClinicalRecordPublisher, NotificationStatus, OutboxDispatcher, TreatmentAdministered, TREATMENT_EVENT_TYPE};
use super::ledger::MovementLedger;
use super::validator::{PlanLine, StockValidator};
use super::{EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::db::{Database, DbError, OutboxMessage};
use crate::formula::{FormulaInput, FormulaRegistry};
use crate::models::{MovementContext, TenantContext, TreatmentSubtype, UsageEvent, UsageRequest, UsageState};

/// Committed usage event plus the fate of its clinical-record message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageOutcome {
    pub event: UsageEvent,
    pub notification: NotificationStatus,
    pub outbox_message_id: String,
}

/// Sequences formula, resolution, validation and consumption for usage events.
pub struct UsageOrchestrator<'a> {
    db: &'a Database,
    registry: &'a FormulaRegistry,
    config: &'a EngineConfig,
    publisher: Option<&'a dyn ClinicalRecordPublisher>,
}

impl<'a> UsageOrchestrator<'a> {
    pub fn new(db: &'a Database, registry: &'a FormulaRegistry, config: &'a EngineConfig) -> Self {
        Self {
            db,
            registry,
            config,
            publisher: None,
        }
    }

    /// Publish the clinical-record event right after commit.
    pub fn with_publisher(mut self, publisher: &'a dyn ClinicalRecordPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Record one treatment administration atomically.
    ///
    /// Returns the committed event, or a single error naming every cause;
    /// never a partially applied result. Notification problems are reported
    /// in the outcome, not as an error.
    pub fn record_usage(&self, context: &TenantContext, request: &UsageRequest) -> EngineResult<UsageOutcome> {
        let started = Instant::now();
        let mut event = UsageEvent::new(context, request);

        let message = match self.commit_usage(&mut event, context, request, started) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    usage_event_id = %event.id,
                    state = UsageState::Rejected.as_str(),
                    error = %err,
                    "usage event rejected"
                );
                return Err(err);
            }
        };

        info!(
            usage_event_id = %event.id,
            state = UsageState::Committed.as_str(),
            movements = event.movements.len(),
            total_cost = %event.total_cost(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "usage event committed"
        );

        let notification = match self.publisher {
            Some(publisher) => OutboxDispatcher::new(self.db, publisher).dispatch(&message),
            None => NotificationStatus::Queued,
        };

        Ok(UsageOutcome {
            event,
            notification,
            outbox_message_id: message.id,
        })
    }

    fn commit_usage(
        &self,
        event: &mut UsageEvent,
        context: &TenantContext,
        request: &UsageRequest,
        started: Instant,
    ) -> EngineResult<OutboxMessage> {
        check_request(context, request)?;

        let tx = self.db.immediate_transaction()?;
        self.check_deadline(started)?;

        debug!(usage_event_id = %event.id, state = UsageState::Received.as_str());
        self.db.insert_usage_event(event)?;

        debug!(usage_event_id = %event.id, state = UsageState::Validating.as_str());
        let lines = self.plan_lines(request)?;
        let validator = StockValidator::from_config(self.db, self.config);
        let validated = validator.validate(&lines, &context.organization_id, &context.site_id)?;
        self.check_deadline(started)?;

        debug!(usage_event_id = %event.id, state = UsageState::Consuming.as_str());
        let ledger = MovementLedger::new(self.db);
        let costing = CostingResolver::new(self.db);
        let movement_context = MovementContext {
            consultorio_id: context.consultorio_id.clone(),
            user_id: context.user_id.clone(),
            usage_event_id: Some(event.id.clone()),
        };

        for line in &validated.lines {
            let unit_cost = costing.unit_cost(&line.product.id, &context.site_id)?;
            let movement = ledger.consume(
                &line.product.id,
                &context.site_id,
                line.component.quantity,
                unit_cost,
                &movement_context,
            )?;
            let detail = ledger.link_usage_detail(&movement, line.item_index, &line.component)?;
            event.movements.push(movement);
            event.details.push(detail);
            self.check_deadline(started)?;
        }

        if event.checked_total_cost().is_none() {
            return Err(EngineError::InvalidParameters(format!(
                "total cost of usage event {} is too large",
                event.id
            )));
        }

        let payload = serde_json::to_string(&TreatmentAdministered::from_usage_event(event)).map_err(DbError::from)?;
        let message = OutboxMessage::pending(&event.id, TREATMENT_EVENT_TYPE, payload);
        self.db.insert_outbox_message(&message)?;

        self.check_deadline(started)?;
        tx.commit()?;
        Ok(message)
    }

    /// Run every item's formula; the whole request fails on the first bad item.
    fn plan_lines(&self, request: &UsageRequest) -> EngineResult<Vec<PlanLine>> {
        let mut lines = Vec::new();
        for (index, item) in request.items.iter().enumerate() {
            let subtype: TreatmentSubtype = item
                .subtype
                .parse()
                .map_err(EngineError::UnsupportedSubtype)?;
            let plan = self.registry.compute(subtype, &FormulaInput::from_item(item))?;
            debug!(item_index = index, %subtype, components = plan.components.len(), "consumption plan computed");
            lines.extend(plan.components.into_iter().map(|component| PlanLine {
                item_index: index as u32,
                component,
            }));
        }
        Ok(lines)
    }

    fn check_deadline(&self, started: Instant) -> EngineResult<()> {
        let limit = self.config.transaction_timeout();
        let elapsed = started.elapsed();
        if elapsed >= limit {
            return Err(EngineError::TransactionTimeout(format!(
                "usage event exceeded {} ms (elapsed {} ms)",
                limit.as_millis(),
                elapsed.as_millis()
            )));
        }
        Ok(())
    }

    /// Load a committed usage event of an organization.
    pub fn get_usage_event(&self, organization_id: &str, id: &str) -> EngineResult<Option<UsageEvent>> {
        Ok(self
            .db
            .get_usage_event(id)?
            .filter(|event| event.organization_id == organization_id))
    }

    /// Committed usage events of a patient, newest first.
    pub fn list_usage_events_for_patient(&self, organization_id: &str, patient_ref: &str) -> EngineResult<Vec<UsageEvent>> {
        Ok(self.db.list_usage_events_for_patient(organization_id, patient_ref)?)
    }
}

fn check_request(context: &TenantContext, request: &UsageRequest) -> EngineResult<()> {
    let required = [
        ("organization_id", context.organization_id.as_str()),
        ("site_id", context.site_id.as_str()),
        ("consultorio_id", context.consultorio_id.as_str()),
        ("user_id", context.user_id.as_str()),
        ("patient_ref", request.patient_ref.as_str()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(EngineError::InvalidParameters(format!("{} is required", field)));
    }
    if request.items.is_empty() {
        return Err(EngineError::InvalidParameters(
            "usage request has no treatment items".into(),
        ));
    }
    Ok(())
}
