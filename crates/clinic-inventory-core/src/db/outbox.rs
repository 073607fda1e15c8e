//! Clinical-record outbox database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};

/// Delivery state of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Delivered,
}

impl OutboxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Delivered => "delivered",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "delivered" => Some(OutboxStatus::Delivered),
            _ => None,
        }
    }
}

/// A domain event awaiting (or done with) delivery.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub id: String,
    pub usage_event_id: String,
    pub event_type: String,
    /// Serialized event JSON
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub delivered_at: Option<String>,
}

impl OutboxMessage {
    /// Create a pending message.
    pub fn pending(usage_event_id: &str, event_type: &str, payload: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            usage_event_id: usage_event_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            delivered_at: None,
        }
    }
}

const OUTBOX_COLUMNS: &str =
    "id, usage_event_id, event_type, payload, status, attempts, last_error, created_at, delivered_at";

impl Database {
    /// Queue a message.
    pub fn insert_outbox_message(&self, message: &OutboxMessage) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO outbox (
                id, usage_event_id, event_type, payload, status,
                attempts, last_error, created_at, delivered_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                message.id,
                message.usage_event_id,
                message.event_type,
                message.payload,
                message.status.as_str(),
                message.attempts,
                message.last_error,
                message.created_at,
                message.delivered_at,
            ],
        )?;
        Ok(())
    }

    /// Get a message by id.
    pub fn get_outbox_message(&self, id: &str) -> DbResult<Option<OutboxMessage>> {
        let sql = format!("SELECT {} FROM outbox WHERE id = ?", OUTBOX_COLUMNS);
        self.conn
            .query_row(&sql, [id], OutboxRow::from_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Pending messages, oldest first.
    pub fn list_pending_outbox(&self, limit: usize) -> DbResult<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {} FROM outbox WHERE status = 'pending' ORDER BY created_at, rowid LIMIT ?",
            OUTBOX_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], OutboxRow::from_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?.try_into()?);
        }
        Ok(messages)
    }

    /// Mark a message delivered. Returns false if it was not pending.
    pub fn mark_outbox_delivered(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE outbox
            SET status = 'delivered', attempts = attempts + 1, last_error = NULL, delivered_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Record a failed delivery attempt; the message stays pending.
    pub fn record_outbox_failure(&self, id: &str, error: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE outbox SET attempts = attempts + 1, last_error = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, error],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct OutboxRow {
    id: String,
    usage_event_id: String,
    event_type: String,
    payload: String,
    status: String,
    attempts: u32,
    last_error: Option<String>,
    created_at: String,
    delivered_at: Option<String>,
}

impl OutboxRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            usage_event_id: row.get(1)?,
            event_type: row.get(2)?,
            payload: row.get(3)?,
            status: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
            created_at: row.get(7)?,
            delivered_at: row.get(8)?,
        })
    }
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::from_str(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("unknown outbox status: {}", row.status)))?;
        Ok(OutboxMessage {
            id: row.id,
            usage_event_id: row.usage_event_id,
            event_type: row.event_type,
            payload: row.payload,
            status,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TenantContext, UsageEvent, UsageRequest};

    fn setup() -> (Database, UsageEvent) {
        let db = Database::open_in_memory().unwrap();
        let ctx = TenantContext {
            organization_id: "org-1".into(),
            site_id: "site-1".into(),
            consultorio_id: "cons-1".into(),
            user_id: "user-1".into(),
        };
        let request = UsageRequest {
            patient_ref: "patient-1".into(),
            treatment_type: "immunotherapy".into(),
            reaction_flag: false,
            reaction_note: None,
            items: vec![],
        };
        let event = UsageEvent::new(&ctx, &request);
        db.insert_usage_event(&event).unwrap();
        (db, event)
    }

    #[test]
    fn test_pending_lifecycle() {
        let (db, event) = setup();
        let message = OutboxMessage::pending(&event.id, "IMMUNOTHERAPY_TREATMENT", "{}".into());
        db.insert_outbox_message(&message).unwrap();

        assert_eq!(db.list_pending_outbox(10).unwrap().len(), 1);

        assert!(db.record_outbox_failure(&message.id, "connection refused").unwrap());
        let stored = db.get_outbox_message(&message.id).unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));

        assert!(db.mark_outbox_delivered(&message.id).unwrap());
        let stored = db.get_outbox_message(&message.id).unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Delivered);
        assert_eq!(stored.attempts, 2);
        assert!(stored.last_error.is_none());
        assert!(stored.delivered_at.is_some());

        assert!(db.list_pending_outbox(10).unwrap().is_empty());
        // Second ack is a no-op
        assert!(!db.mark_outbox_delivered(&message.id).unwrap());
    }
}
