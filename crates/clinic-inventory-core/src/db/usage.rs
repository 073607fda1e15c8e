//! Usage event and usage detail database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_decimal, Database, DbError, DbResult};
use crate::models::{ComponentKind, UsageDetail, UsageEvent};

const EVENT_COLUMNS: &str = "id, organization_id, site_id, consultorio_id, user_id, patient_ref, \
     treatment_type, reaction_flag, reaction_note, items, created_at";

impl Database {
    /// Insert the usage event header row.
    pub fn insert_usage_event(&self, event: &UsageEvent) -> DbResult<()> {
        let items_json = serde_json::to_string(&event.items)?;
        self.conn.execute(
            r#"
            INSERT INTO usage_events (
                id, organization_id, site_id, consultorio_id, user_id, patient_ref,
                treatment_type, reaction_flag, reaction_note, items, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                event.id,
                event.organization_id,
                event.site_id,
                event.consultorio_id,
                event.user_id,
                event.patient_ref,
                event.treatment_type,
                event.reaction_flag,
                event.reaction_note,
                items_json,
                event.created_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a usage detail row.
    pub fn insert_usage_detail(&self, detail: &UsageDetail) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO usage_details (
                id, usage_event_id, movement_id, item_index, component_name,
                component_kind, product_id, quantity, unit_cost, total_cost
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                detail.id,
                detail.usage_event_id,
                detail.movement_id,
                detail.item_index,
                detail.component_name,
                detail.component_kind.as_str(),
                detail.product_id,
                detail.quantity.to_string(),
                detail.unit_cost.to_string(),
                detail.total_cost.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Load a usage event with its details and movements.
    pub fn get_usage_event(&self, id: &str) -> DbResult<Option<UsageEvent>> {
        let sql = format!("SELECT {} FROM usage_events WHERE id = ?", EVENT_COLUMNS);
        let header = self
            .conn
            .query_row(&sql, [id], UsageEventRow::from_row)
            .optional()?;

        match header {
            Some(row) => Ok(Some(self.hydrate_usage_event(row)?)),
            None => Ok(None),
        }
    }

    /// Usage events for a patient within an organization, newest first.
    pub fn list_usage_events_for_patient(
        &self,
        organization_id: &str,
        patient_ref: &str,
    ) -> DbResult<Vec<UsageEvent>> {
        let sql = format!(
            "SELECT {} FROM usage_events
             WHERE organization_id = ?1 AND patient_ref = ?2
             ORDER BY created_at DESC, rowid DESC",
            EVENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![organization_id, patient_ref], UsageEventRow::from_row)?;

        let mut headers = Vec::new();
        for row in rows {
            headers.push(row?);
        }

        headers
            .into_iter()
            .map(|row| self.hydrate_usage_event(row))
            .collect()
    }

    /// Details of a usage event in insertion order.
    pub fn list_usage_details(&self, usage_event_id: &str) -> DbResult<Vec<UsageDetail>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, usage_event_id, movement_id, item_index, component_name,
                   component_kind, product_id, quantity, unit_cost, total_cost
            FROM usage_details
            WHERE usage_event_id = ?
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt.query_map([usage_event_id], UsageDetailRow::from_row)?;

        let mut details = Vec::new();
        for row in rows {
            details.push(row?.try_into()?);
        }
        Ok(details)
    }

    /// Number of usage events stored.
    pub fn count_usage_events(&self) -> DbResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM usage_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn hydrate_usage_event(&self, row: UsageEventRow) -> DbResult<UsageEvent> {
        let details = self.list_usage_details(&row.id)?;
        let movements = self.list_movements_for_usage_event(&row.id)?;
        Ok(UsageEvent {
            items: serde_json::from_str(&row.items)?,
            id: row.id,
            organization_id: row.organization_id,
            site_id: row.site_id,
            consultorio_id: row.consultorio_id,
            user_id: row.user_id,
            patient_ref: row.patient_ref,
            treatment_type: row.treatment_type,
            reaction_flag: row.reaction_flag,
            reaction_note: row.reaction_note,
            created_at: row.created_at,
            details,
            movements,
        })
    }
}

/// Intermediate row struct for database mapping.
struct UsageEventRow {
    id: String,
    organization_id: String,
    site_id: String,
    consultorio_id: String,
    user_id: String,
    patient_ref: String,
    treatment_type: String,
    reaction_flag: bool,
    reaction_note: Option<String>,
    items: String,
    created_at: String,
}

impl UsageEventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            site_id: row.get(2)?,
            consultorio_id: row.get(3)?,
            user_id: row.get(4)?,
            patient_ref: row.get(5)?,
            treatment_type: row.get(6)?,
            reaction_flag: row.get(7)?,
            reaction_note: row.get(8)?,
            items: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

/// Intermediate row struct for database mapping.
struct UsageDetailRow {
    id: String,
    usage_event_id: String,
    movement_id: String,
    item_index: u32,
    component_name: String,
    component_kind: String,
    product_id: String,
    quantity: String,
    unit_cost: String,
    total_cost: String,
}

impl UsageDetailRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            usage_event_id: row.get(1)?,
            movement_id: row.get(2)?,
            item_index: row.get(3)?,
            component_name: row.get(4)?,
            component_kind: row.get(5)?,
            product_id: row.get(6)?,
            quantity: row.get(7)?,
            unit_cost: row.get(8)?,
            total_cost: row.get(9)?,
        })
    }
}

impl TryFrom<UsageDetailRow> for UsageDetail {
    type Error = DbError;

    fn try_from(row: UsageDetailRow) -> Result<Self, Self::Error> {
        let component_kind = ComponentKind::parse(&row.component_kind).ok_or_else(|| {
            DbError::Constraint(format!("unknown component kind: {}", row.component_kind))
        })?;
        Ok(UsageDetail {
            id: row.id,
            usage_event_id: row.usage_event_id,
            movement_id: row.movement_id,
            item_index: row.item_index,
            component_name: row.component_name,
            component_kind,
            product_id: row.product_id,
            quantity: parse_decimal(&row.quantity)?,
            unit_cost: parse_decimal(&row.unit_cost)?,
            total_cost: parse_decimal(&row.total_cost)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuantityParams, TenantContext, TreatmentItem, UsageRequest};

    fn context() -> TenantContext {
        TenantContext {
            organization_id: "org-1".into(),
            site_id: "site-1".into(),
            consultorio_id: "cons-1".into(),
            user_id: "user-1".into(),
        }
    }

    fn request(patient: &str) -> UsageRequest {
        UsageRequest {
            patient_ref: patient.into(),
            treatment_type: "immunotherapy".into(),
            reaction_flag: false,
            reaction_note: None,
            items: vec![TreatmentItem {
                subtype: "glicerinado_frasco".into(),
                product_ref: None,
                params: QuantityParams::default(),
                allergen_names: vec!["Gato".into(), "Perro".into()],
            }],
        }
    }

    #[test]
    fn test_insert_and_get_event_header() {
        let db = Database::open_in_memory().unwrap();
        let event = UsageEvent::new(&context(), &request("patient-1"));
        db.insert_usage_event(&event).unwrap();

        let stored = db.get_usage_event(&event.id).unwrap().unwrap();
        assert_eq!(stored.patient_ref, "patient-1");
        assert_eq!(stored.items, event.items);
        assert!(stored.details.is_empty());
        assert!(stored.movements.is_empty());
        assert_eq!(db.count_usage_events().unwrap(), 1);
    }

    #[test]
    fn test_get_missing_event() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_usage_event("nope").unwrap().is_none());
    }

    #[test]
    fn test_list_for_patient_is_scoped() {
        let db = Database::open_in_memory().unwrap();
        db.insert_usage_event(&UsageEvent::new(&context(), &request("patient-1")))
            .unwrap();
        db.insert_usage_event(&UsageEvent::new(&context(), &request("patient-1")))
            .unwrap();
        db.insert_usage_event(&UsageEvent::new(&context(), &request("patient-2")))
            .unwrap();

        assert_eq!(db.list_usage_events_for_patient("org-1", "patient-1").unwrap().len(), 2);
        assert!(db.list_usage_events_for_patient("org-2", "patient-1").unwrap().is_empty());
    }
}
