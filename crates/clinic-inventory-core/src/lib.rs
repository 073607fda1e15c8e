//! Clinic Inventory Core Library
//!
//! Treatment consumption engine for multi-tenant clinics: turns one clinical
//! treatment administration into costed, hash-chained stock movements.
//!
//! # Architecture
//!
//! ```text
//! UsageRequest (patient, items[])
//!        │
//!        ▼
//! ┌──────────────────── BEGIN IMMEDIATE ─────────────────────┐
//! │  Received    insert usage event shell                    │
//! │  Validating  subtype → FormulaStrategy → ConsumptionPlan │
//! │              ProductResolver → StockValidator (all items)│
//! │  Consuming   CostingResolver → MovementLedger            │
//! │              EXIT movement + usage detail per component  │
//! │              outbox ← TreatmentAdministered              │
//! └──────────────────────── COMMIT ──────────────────────────┘
//!        │
//!        ▼
//! OutboxDispatcher → ClinicalRecordPublisher (at-least-once)
//! ```
//!
//! # Core Principle
//!
//! **A usage event is all or nothing.** Either every component of every item
//! is consumed, or the caller gets one error naming every cause and no row
//! is written.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence (products, stock, ledger, usage, outbox)
//! - [`models`]: Domain types (Product, Movement, UsageEvent, ConsumptionPlan)
//! - [`resolver`]: Tenant-scoped product resolution
//! - [`formula`]: Per-subtype dosage formulas and their registry
//! - [`engine`]: Validation, costing, ledger, orchestration, events
//! - [`config`]: Engine configuration
//! - [`logging`]: Tracing subscriber setup

pub mod config;
pub mod db;
pub mod engine;
pub mod formula;
pub mod logging;
pub mod models;
pub mod resolver;

// Re-export commonly used types
pub use config::EngineConfig;
pub use db::Database;
pub use engine::{
    EngineError, EngineResult, MovementLedger, NotificationStatus, UsageOrchestrator, UsageOutcome,
};
pub use formula::{FormulaRegistry, FormulaStrategy};
pub use models::{
    ConsumptionPlan, Movement, MovementType, Product, TenantContext, TreatmentItem, TreatmentSubtype,
    UsageEvent, UsageRequest,
};
pub use resolver::{Normalizer, ProductResolver};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use engine::BatchTag;
use models::{ExpirationBatch, MovementContext, QuantityParams, UsageDetail};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicInventoryError {
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Unsupported treatment subtype: {0}")]
    UnsupportedSubtype(String),

    #[error("Transaction timed out: {0}")]
    TransactionTimeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<db::DbError> for ClinicInventoryError {
    fn from(e: db::DbError) -> Self {
        EngineError::from(e).into()
    }
}

impl From<rusqlite::Error> for ClinicInventoryError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::from(e).into()
    }
}

impl From<config::ConfigError> for ClinicInventoryError {
    fn from(e: config::ConfigError) -> Self {
        ClinicInventoryError::InvalidInput(e.to_string())
    }
}

impl From<EngineError> for ClinicInventoryError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ProductNotFound {
                identifier,
                suggestions,
            } if suggestions.is_empty() => ClinicInventoryError::ProductNotFound(identifier),
            EngineError::ProductNotFound {
                identifier,
                suggestions,
            } => ClinicInventoryError::ProductNotFound(format!(
                "{} (did you mean: {}?)",
                identifier,
                suggestions.join(", ")
            )),
            EngineError::InsufficientStock(shortfalls) => {
                ClinicInventoryError::InsufficientStock(engine::describe_shortfalls(&shortfalls))
            }
            EngineError::UnsupportedSubtype(s) => ClinicInventoryError::UnsupportedSubtype(s),
            EngineError::TransactionTimeout(s) => ClinicInventoryError::TransactionTimeout(s),
            EngineError::InvalidParameters(s) => ClinicInventoryError::InvalidInput(s),
            EngineError::Database(e) => ClinicInventoryError::DatabaseError(e.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicInventoryError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ClinicInventoryError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create an engine database at the given path.
///
/// `config_json` overrides the defaults; `CLINIC_INVENTORY_*` environment
/// variables override both.
#[uniffi::export]
pub fn open_engine(
    path: String,
    config_json: Option<String>,
) -> Result<Arc<ClinicInventoryCore>, ClinicInventoryError> {
    let config = load_config(config_json)?;
    let db = Database::open_with_busy_timeout(&path, config.busy_timeout())?;
    Ok(Arc::new(ClinicInventoryCore::new(db, config)))
}

/// Create an in-memory engine (for testing).
#[uniffi::export]
pub fn open_engine_in_memory(
    config_json: Option<String>,
) -> Result<Arc<ClinicInventoryCore>, ClinicInventoryError> {
    let config = load_config(config_json)?;
    let db = Database::open_in_memory()?;
    Ok(Arc::new(ClinicInventoryCore::new(db, config)))
}

/// Open an engine database configured from a JSON file.
#[uniffi::export]
pub fn open_engine_with_config_file(
    path: String,
    config_path: String,
) -> Result<Arc<ClinicInventoryCore>, ClinicInventoryError> {
    let config = EngineConfig::from_file(&config_path)?;
    let db = Database::open_with_busy_timeout(&path, config.busy_timeout())?;
    Ok(Arc::new(ClinicInventoryCore::new(db, config)))
}

/// Route engine tracing events to stderr, filtered by `RUST_LOG`.
#[uniffi::export]
pub fn init_logging() {
    logging::init();
}

fn load_config(config_json: Option<String>) -> Result<EngineConfig, ClinicInventoryError> {
    match config_json {
        Some(json) => {
            let mut config = EngineConfig::from_json(&json)?;
            config.apply_env_overrides()?;
            Ok(config)
        }
        None => Ok(EngineConfig::from_env()?),
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ClinicInventoryCore {
    db: Arc<Mutex<Database>>,
    registry: FormulaRegistry,
    config: EngineConfig,
}

impl ClinicInventoryCore {
    fn new(db: Database, config: EngineConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            registry: FormulaRegistry::from_config(&config),
            config,
        }
    }
}

#[uniffi::export]
impl ClinicInventoryCore {
    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// Add or update a product. An empty id creates a new product.
    ///
    /// An id that belongs to another organization is reported as not found.
    pub fn upsert_product(&self, product: FfiProduct) -> Result<FfiProduct, ClinicInventoryError> {
        let db = self.db.lock()?;
        let product = product.into_product()?;
        if let Some(existing) = db.get_product(&product.id)? {
            if existing.organization_id != product.organization_id {
                return Err(ClinicInventoryError::ProductNotFound(product.id));
            }
        }
        db.upsert_product(&product)?;
        Ok(product.into())
    }

    /// Get a product by id within an organization.
    pub fn get_product(
        &self,
        organization_id: String,
        product_id: String,
    ) -> Result<Option<FfiProduct>, ClinicInventoryError> {
        let db = self.db.lock()?;
        let product = db.get_product_in_org(&organization_id, &product_id)?;
        Ok(product.map(|p| p.into()))
    }

    /// List an organization's products.
    pub fn list_products(
        &self,
        organization_id: String,
        active_only: bool,
    ) -> Result<Vec<FfiProduct>, ClinicInventoryError> {
        let db = self.db.lock()?;
        let products = db.list_products_for_org(&organization_id, active_only)?;
        Ok(products.into_iter().map(|p| p.into()).collect())
    }

    /// Soft-delete a product. Returns false if the organization has no such product.
    pub fn deactivate_product(&self, organization_id: String, product_id: String) -> Result<bool, ClinicInventoryError> {
        let db = self.db.lock()?;
        Ok(db.deactivate_product(&organization_id, &product_id)?)
    }

    // =========================================================================
    // Stock Operations
    // =========================================================================

    /// Receive stock: ENTRY movement, stock increment, optional batch.
    pub fn receive_stock(&self, receipt: FfiStockReceipt) -> Result<FfiMovement, ClinicInventoryError> {
        let quantity = parse_decimal("quantity", &receipt.quantity)?;
        let unit_cost = parse_decimal("unit_cost", &receipt.unit_cost)?;
        let batch = match (receipt.batch_number, receipt.expires_on) {
            (Some(batch_number), Some(expires_on)) => Some(BatchTag {
                batch_number,
                expires_on: parse_date("expires_on", &expires_on)?,
            }),
            (None, None) => None,
            _ => {
                return Err(ClinicInventoryError::InvalidInput(
                    "batch_number and expires_on must be given together".into(),
                ))
            }
        };
        let context = MovementContext {
            consultorio_id: receipt.consultorio_id,
            user_id: receipt.user_id,
            usage_event_id: None,
        };

        let db = self.db.lock()?;
        if db
            .get_product_in_org(&receipt.organization_id, &receipt.product_id)?
            .is_none()
        {
            return Err(ClinicInventoryError::ProductNotFound(receipt.product_id));
        }

        let tx = db.immediate_transaction()?;
        let movement = MovementLedger::new(&db).receive(
            &receipt.product_id,
            &receipt.site_id,
            quantity,
            unit_cost,
            batch.as_ref(),
            &context,
        )?;
        tx.commit()?;
        Ok(movement.into())
    }

    /// Register an expiration batch for stock already on hand.
    pub fn register_batch(&self, batch: FfiBatch) -> Result<(), ClinicInventoryError> {
        let organization_id = batch.organization_id;
        let batch = ExpirationBatch {
            quantity: parse_decimal("quantity", &batch.quantity)?,
            expires_on: parse_date("expires_on", &batch.expires_on)?,
            product_id: batch.product_id,
            site_id: batch.site_id,
            batch_number: batch.batch_number,
        };
        let db = self.db.lock()?;
        if db.get_product_in_org(&organization_id, &batch.product_id)?.is_none() {
            return Err(ClinicInventoryError::ProductNotFound(batch.product_id));
        }
        db.upsert_batch(&batch)?;
        Ok(())
    }

    /// Current stock of a product at a site, as a decimal string.
    pub fn stock_level(
        &self,
        organization_id: String,
        product_id: String,
        site_id: String,
    ) -> Result<String, ClinicInventoryError> {
        let db = self.db.lock()?;
        if db.get_product_in_org(&organization_id, &product_id)?.is_none() {
            return Err(ClinicInventoryError::ProductNotFound(product_id));
        }
        Ok(db.stock_quantity(&product_id, &site_id)?.to_string())
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Record a treatment administration (all or nothing).
    pub fn record_usage(
        &self,
        context: FfiTenantContext,
        request: FfiUsageRequest,
    ) -> Result<FfiUsageOutcome, ClinicInventoryError> {
        let request = request.into_request()?;
        let context = context.into();

        let db = self.db.lock()?;
        let outcome = UsageOrchestrator::new(&db, &self.registry, &self.config).record_usage(&context, &request)?;
        Ok(outcome.into())
    }

    /// Get a committed usage event of an organization.
    pub fn get_usage_event(
        &self,
        organization_id: String,
        usage_event_id: String,
    ) -> Result<Option<FfiUsageEvent>, ClinicInventoryError> {
        let db = self.db.lock()?;
        let event = UsageOrchestrator::new(&db, &self.registry, &self.config)
            .get_usage_event(&organization_id, &usage_event_id)?;
        Ok(event.map(|e| e.into()))
    }

    /// Usage events of a patient, newest first.
    pub fn list_usage_events_for_patient(
        &self,
        organization_id: String,
        patient_ref: String,
    ) -> Result<Vec<FfiUsageEvent>, ClinicInventoryError> {
        let db = self.db.lock()?;
        let events = db.list_usage_events_for_patient(&organization_id, &patient_ref)?;
        Ok(events.into_iter().map(|e| e.into()).collect())
    }

    // =========================================================================
    // Clinical Record Outbox
    // =========================================================================

    /// Pending clinical-record messages, oldest first.
    pub fn pending_notifications(&self, limit: u32) -> Result<Vec<FfiOutboxMessage>, ClinicInventoryError> {
        let db = self.db.lock()?;
        let messages = db.list_pending_outbox(limit as usize)?;
        Ok(messages.into_iter().map(|m| m.into()).collect())
    }

    /// Mark a message delivered. Returns false if it was not pending.
    pub fn acknowledge_notification(&self, message_id: String) -> Result<bool, ClinicInventoryError> {
        let db = self.db.lock()?;
        Ok(db.mark_outbox_delivered(&message_id)?)
    }

    /// Record a failed delivery; the message stays pending.
    pub fn report_notification_failure(
        &self,
        message_id: String,
        error: String,
    ) -> Result<bool, ClinicInventoryError> {
        let db = self.db.lock()?;
        Ok(db.record_outbox_failure(&message_id, &error)?)
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Recompute the movement ledger's hash chain.
    pub fn verify_ledger(&self) -> Result<FfiChainVerification, ClinicInventoryError> {
        let db = self.db.lock()?;
        let result = engine::verify_ledger_chain(&db)?;
        Ok(FfiChainVerification {
            intact: result.is_intact(),
            entries: result.entries,
            head: result.head,
            first_broken_seq: result.first_broken_seq,
        })
    }
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, ClinicInventoryError> {
    Decimal::from_str(value.trim())
        .map_err(|e| ClinicInventoryError::InvalidInput(format!("{}: {} ({})", field, value, e)))
}

fn parse_optional_decimal(field: &str, value: Option<String>) -> Result<Option<Decimal>, ClinicInventoryError> {
    value.map(|v| parse_decimal(field, &v)).transpose()
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ClinicInventoryError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| ClinicInventoryError::InvalidInput(format!("{}: {} ({})", field, value, e)))
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe product. Decimals travel as strings.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProduct {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub category: Option<String>,
    pub unit: String,
    pub default_unit_cost: String,
    pub min_stock: String,
    pub active: bool,
}

impl FfiProduct {
    fn into_product(self) -> Result<Product, ClinicInventoryError> {
        let mut product = Product::new(self.organization_id, self.name);
        if !self.id.trim().is_empty() {
            product.id = self.id;
        }
        product.category = self.category;
        product.unit = self.unit;
        product.default_unit_cost = parse_decimal("default_unit_cost", &self.default_unit_cost)?;
        product.min_stock = parse_decimal("min_stock", &self.min_stock)?;
        product.active = self.active;
        Ok(product)
    }
}

impl From<Product> for FfiProduct {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            organization_id: product.organization_id,
            name: product.name,
            category: product.category,
            unit: product.unit,
            default_unit_cost: product.default_unit_cost.to_string(),
            min_stock: product.min_stock.to_string(),
            active: product.active,
        }
    }
}

/// FFI-safe stock receipt.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockReceipt {
    pub organization_id: String,
    pub product_id: String,
    pub site_id: String,
    pub consultorio_id: String,
    pub user_id: String,
    pub quantity: String,
    pub unit_cost: String,
    pub batch_number: Option<String>,
    /// YYYY-MM-DD
    pub expires_on: Option<String>,
}

/// FFI-safe expiration batch.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBatch {
    pub organization_id: String,
    pub product_id: String,
    pub site_id: String,
    pub batch_number: String,
    pub expires_on: String,
    pub quantity: String,
}

/// FFI-safe movement.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMovement {
    pub id: String,
    pub seq: i64,
    pub movement_type: String,
    pub product_id: String,
    pub site_id: String,
    pub quantity: String,
    pub unit_cost: String,
    pub total_cost: String,
    pub batch_number: Option<String>,
    pub batch_expires_on: Option<String>,
    pub usage_event_id: Option<String>,
    pub created_at: String,
    pub entry_hash: String,
}

impl From<Movement> for FfiMovement {
    fn from(movement: Movement) -> Self {
        Self {
            id: movement.id,
            seq: movement.seq,
            movement_type: movement.movement_type.as_str().to_string(),
            product_id: movement.product_id,
            site_id: movement.site_id,
            quantity: movement.quantity.to_string(),
            unit_cost: movement.unit_cost.to_string(),
            total_cost: movement.total_cost.to_string(),
            batch_number: movement.batch_number,
            batch_expires_on: movement.batch_expires_on.map(|d| d.to_string()),
            usage_event_id: movement.usage_event_id,
            created_at: movement.created_at,
            entry_hash: movement.entry_hash,
        }
    }
}

/// FFI-safe tenant context.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTenantContext {
    pub organization_id: String,
    pub site_id: String,
    pub consultorio_id: String,
    pub user_id: String,
}

impl From<FfiTenantContext> for TenantContext {
    fn from(ctx: FfiTenantContext) -> Self {
        TenantContext {
            organization_id: ctx.organization_id,
            site_id: ctx.site_id,
            consultorio_id: ctx.consultorio_id,
            user_id: ctx.user_id,
        }
    }
}

/// FFI-safe treatment item.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTreatmentItem {
    pub subtype: String,
    pub product_ref: Option<String>,
    pub units: Option<String>,
    pub doses: Option<String>,
    pub frascos: Vec<u8>,
    pub allergen_names: Vec<String>,
}

/// FFI-safe usage request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUsageRequest {
    pub patient_ref: String,
    pub treatment_type: String,
    pub reaction_flag: bool,
    pub reaction_note: Option<String>,
    pub items: Vec<FfiTreatmentItem>,
}

impl FfiUsageRequest {
    fn into_request(self) -> Result<UsageRequest, ClinicInventoryError> {
        let items = self
            .items
            .into_iter()
            .map(|item| {
                Ok(TreatmentItem {
                    params: QuantityParams {
                        units: parse_optional_decimal("units", item.units)?,
                        doses: parse_optional_decimal("doses", item.doses)?,
                        frascos: item.frascos,
                    },
                    subtype: item.subtype,
                    product_ref: item.product_ref,
                    allergen_names: item.allergen_names,
                })
            })
            .collect::<Result<Vec<_>, ClinicInventoryError>>()?;

        Ok(UsageRequest {
            patient_ref: self.patient_ref,
            treatment_type: self.treatment_type,
            reaction_flag: self.reaction_flag,
            reaction_note: self.reaction_note,
            items,
        })
    }
}

/// FFI-safe usage detail.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUsageDetail {
    pub movement_id: String,
    pub item_index: u32,
    pub component_name: String,
    pub component_kind: String,
    pub product_id: String,
    pub quantity: String,
    pub unit_cost: String,
    pub total_cost: String,
}

impl From<UsageDetail> for FfiUsageDetail {
    fn from(detail: UsageDetail) -> Self {
        Self {
            movement_id: detail.movement_id,
            item_index: detail.item_index,
            component_name: detail.component_name,
            component_kind: detail.component_kind.as_str().to_string(),
            product_id: detail.product_id,
            quantity: detail.quantity.to_string(),
            unit_cost: detail.unit_cost.to_string(),
            total_cost: detail.total_cost.to_string(),
        }
    }
}

/// FFI-safe usage event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUsageEvent {
    pub id: String,
    pub organization_id: String,
    pub site_id: String,
    pub patient_ref: String,
    pub treatment_type: String,
    pub reaction_flag: bool,
    pub reaction_note: Option<String>,
    pub created_at: String,
    pub total_cost: String,
    pub details: Vec<FfiUsageDetail>,
    pub movements: Vec<FfiMovement>,
}

impl From<UsageEvent> for FfiUsageEvent {
    fn from(event: UsageEvent) -> Self {
        let total_cost = event.total_cost().to_string();
        Self {
            id: event.id,
            organization_id: event.organization_id,
            site_id: event.site_id,
            patient_ref: event.patient_ref,
            treatment_type: event.treatment_type,
            reaction_flag: event.reaction_flag,
            reaction_note: event.reaction_note,
            created_at: event.created_at,
            total_cost,
            details: event.details.into_iter().map(|d| d.into()).collect(),
            movements: event.movements.into_iter().map(|m| m.into()).collect(),
        }
    }
}

/// FFI-safe usage outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUsageOutcome {
    pub event: FfiUsageEvent,
    /// "delivered", "deferred" or "queued"
    pub notification_status: String,
    pub notification_error: Option<String>,
    pub outbox_message_id: String,
}

impl From<UsageOutcome> for FfiUsageOutcome {
    fn from(outcome: UsageOutcome) -> Self {
        let (notification_status, notification_error) = match outcome.notification {
            NotificationStatus::Delivered => ("delivered", None),
            NotificationStatus::Deferred { error } => ("deferred", Some(error)),
            NotificationStatus::Queued => ("queued", None),
        };
        Self {
            event: outcome.event.into(),
            notification_status: notification_status.to_string(),
            notification_error,
            outbox_message_id: outcome.outbox_message_id,
        }
    }
}

/// FFI-safe outbox message.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOutboxMessage {
    pub id: String,
    pub usage_event_id: String,
    pub event_type: String,
    pub payload: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
}

impl From<db::OutboxMessage> for FfiOutboxMessage {
    fn from(message: db::OutboxMessage) -> Self {
        Self {
            id: message.id,
            usage_event_id: message.usage_event_id,
            event_type: message.event_type,
            payload: message.payload,
            attempts: message.attempts,
            last_error: message.last_error,
            created_at: message.created_at,
        }
    }
}

/// FFI-safe ledger verification result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiChainVerification {
    pub intact: bool,
    pub entries: u64,
    pub head: Option<String>,
    pub first_broken_seq: Option<i64>,
}
