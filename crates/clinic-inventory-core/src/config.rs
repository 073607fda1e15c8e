//! Engine configuration: timeouts, catalog conventions and protocol tables.
//!
//! Loaded from a JSON file or defaults, then overridden from the environment.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formula::CoefficientTable;
use crate::models::TreatmentSubtype;
use crate::resolver::Normalizer;

/// Environment variable overriding `transaction_timeout_ms`.
pub const ENV_TRANSACTION_TIMEOUT_MS: &str = "CLINIC_INVENTORY_TRANSACTION_TIMEOUT_MS";

/// Environment variable overriding `busy_timeout_ms`.
pub const ENV_BUSY_TIMEOUT_MS: &str = "CLINIC_INVENTORY_BUSY_TIMEOUT_MS";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for one usage event, lock wait included
    pub transaction_timeout_ms: u64,
    /// How long a writer waits for the SQLite lock
    pub busy_timeout_ms: u64,
    /// Category hint used when resolving allergens
    pub allergen_category: Option<String>,
    /// Category hint used when resolving diluents
    pub diluent_category: Option<String>,
    /// Catalog name of the Evans diluent
    pub evans_diluent: String,
    /// Catalog name of the bacterial diluent
    pub bacterial_diluent: String,
    /// Spoken or short names → catalog names
    pub aliases: BTreeMap<String, String>,
    /// Coefficient tables for protocols other than the built-in frasco formula
    pub protocols: HashMap<TreatmentSubtype, CoefficientTable>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: 30_000,
            busy_timeout_ms: 10_000,
            allergen_category: Some("allergen".to_string()),
            diluent_category: Some("diluent".to_string()),
            evans_diluent: "Evans".to_string(),
            bacterial_diluent: "Bacteriana".to_string(),
            aliases: BTreeMap::new(),
            protocols: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file and apply environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults with environment overrides.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override timeouts from `CLINIC_INVENTORY_*` variables.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TRANSACTION_TIMEOUT_MS) {
            self.transaction_timeout_ms = parse_millis(ENV_TRANSACTION_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_BUSY_TIMEOUT_MS) {
            self.busy_timeout_ms = parse_millis(ENV_BUSY_TIMEOUT_MS, &value)?;
        }
        Ok(())
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Normalizer carrying the configured aliases.
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::with_aliases(self.aliases.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }
}

fn parse_millis(key: &str, value: &str) -> ConfigResult<u64> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::QuantityBasis;
    use rust_decimal::Decimal;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.transaction_timeout(), Duration::from_secs(30));
        assert_eq!(config.busy_timeout(), Duration::from_secs(10));
        assert_eq!(config.allergen_category.as_deref(), Some("allergen"));
        assert!(config.protocols.is_empty());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"busy_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.transaction_timeout_ms, 30_000);
        assert_eq!(config.evans_diluent, "Evans");
    }

    #[test]
    fn test_protocols_by_subtype_tag() {
        let json = r#"{
            "protocols": {
                "sublingual": {"basis": "units", "item_product": "1"},
                "alxoid_b2": {"basis": "doses", "per_allergen": "0.5"}
            }
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.protocols.len(), 2);
        let alxoid = &config.protocols[&TreatmentSubtype::AlxoidB2];
        assert_eq!(alxoid.basis, QuantityBasis::Doses);
        assert_eq!(alxoid.per_allergen, Decimal::new(5, 1));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"evans_diluent": "Solución Evans"}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.evans_diluent, "Solución Evans");
    }

    #[test]
    fn test_example_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/engine.example.json");
        let contents = std::fs::read_to_string(path).unwrap();
        let config = EngineConfig::from_json(&contents).unwrap();
        assert!(config.protocols.contains_key(&TreatmentSubtype::Sublingual));
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::from_file("/nonexistent/engine.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| match key {
                ENV_TRANSACTION_TIMEOUT_MS => Some("500".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.transaction_timeout_ms, 500);
        assert_eq!(config.busy_timeout_ms, 10_000);

        let result = config.apply_overrides(|key| match key {
            ENV_BUSY_TIMEOUT_MS => Some("soon".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_aliases_feed_normalizer() {
        let mut config = EngineConfig::default();
        config.aliases.insert("bacteriana".into(), "Diluyente Bacteriano".into());
        assert_eq!(config.normalizer().expand_alias("Bacteriana"), "Diluyente Bacteriano");
    }
}
