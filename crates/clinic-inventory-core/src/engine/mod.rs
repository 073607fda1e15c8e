//! Treatment consumption engine.
//!
//! Turns one usage request into validated, costed, hash-chained EXIT
//! movements inside a single transaction, then hands a clinical-record event
//! to the outbox.

pub mod audit;
pub mod costing;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod validator;

pub use audit::{verify_ledger_chain, ChainVerification};
pub use costing::CostingResolver;
pub use events::{
    ClinicalRecordPublisher, DispatchReport, NoOpPublisher, NotificationStatus, OutboxDispatcher,
    PublishError, TreatmentAdministered, TREATMENT_EVENT_TYPE,
};
pub use ledger::{BatchTag, MovementLedger};
pub use orchestrator::{UsageOrchestrator, UsageOutcome};
pub use validator::{PlanLine, ResolvedLine, Shortfall, StockValidator, ValidatedPlan};

use thiserror::Error;

use crate::db::DbError;
use crate::formula::FormulaError;
use crate::resolver::ResolverError;

/// Engine errors. Any of them means nothing was written.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Product not found: {identifier}")]
    ProductNotFound {
        identifier: String,
        suggestions: Vec<String>,
    },

    #[error("Insufficient stock: {}", describe_shortfalls(.0))]
    InsufficientStock(Vec<Shortfall>),

    #[error("Unsupported treatment subtype: {0}")]
    UnsupportedSubtype(String),

    #[error("Transaction timed out: {0}")]
    TransactionTimeout(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Database error: {0}")]
    Database(DbError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        if err.is_busy() {
            EngineError::TransactionTimeout(err.to_string())
        } else {
            EngineError::Database(err)
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::from(err).into()
    }
}

impl From<ResolverError> for EngineError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::Database(e) => e.into(),
            ResolverError::NotFound {
                identifier,
                suggestions,
            } => EngineError::ProductNotFound {
                identifier,
                suggestions,
            },
        }
    }
}

impl From<FormulaError> for EngineError {
    fn from(err: FormulaError) -> Self {
        match err {
            FormulaError::InvalidParameters(msg) => EngineError::InvalidParameters(msg),
            FormulaError::UnsupportedSubtype(subtype) => EngineError::UnsupportedSubtype(subtype),
        }
    }
}

pub(crate) fn describe_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| format!("{} short by {} (needs {}, has {})", s.component, s.missing, s.required, s.available))
        .collect::<Vec<_>>()
        .join("; ")
}
