//! Vault configuration.
//!
//! Loaded from a JSON file, then overridden by environment variables:
//!
//! - `SECVAULT_TRUST_STORE` - path of the JSON trust store to import
//! - `SECVAULT_ANCHOR_ENDPOINT` - ledger endpoint; names the ledger
//! - `SECVAULT_AUDIT_DB` - path of the SQLite audit database
//! - `SECVAULT_ANCHOR_TIMEOUT_MS` - how long `resolve_anchor` polls

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use secvault_verify::PolicyTable;

pub const ENV_TRUST_STORE: &str = "SECVAULT_TRUST_STORE";
pub const ENV_ANCHOR_ENDPOINT: &str = "SECVAULT_ANCHOR_ENDPOINT";
pub const ENV_AUDIT_DB: &str = "SECVAULT_AUDIT_DB";
pub const ENV_ANCHOR_TIMEOUT_MS: &str = "SECVAULT_ANCHOR_TIMEOUT_MS";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Settings for a [`crate::Vault`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Trust store to import at startup.
    pub trust_store: Option<PathBuf>,

    /// Ledger endpoint. Without one, an in-process ledger is used.
    pub anchor_endpoint: Option<String>,

    /// SQLite audit database. Without one, the audit log lives in memory.
    pub audit_db: Option<PathBuf>,

    /// Upper bound on a single `resolve_anchor` call.
    pub anchor_timeout_ms: u64,

    /// Delay between ledger polls.
    pub anchor_poll_interval_ms: u64,

    /// Mandatory gates and cosigner tiers, by document type.
    pub policies: PolicyTable,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            trust_store: None,
            anchor_endpoint: None,
            audit_db: None,
            anchor_timeout_ms: 5_000,
            anchor_poll_interval_ms: 100,
            policies: PolicyTable::default(),
        }
    }
}

impl VaultConfig {
    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Defaults, then the file if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply `SECVAULT_*` overrides read through `lookup`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = lookup(ENV_TRUST_STORE) {
            self.trust_store = Some(PathBuf::from(path));
        }
        if let Some(endpoint) = lookup(ENV_ANCHOR_ENDPOINT) {
            self.anchor_endpoint = Some(endpoint);
        }
        if let Some(path) = lookup(ENV_AUDIT_DB) {
            self.audit_db = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_ANCHOR_TIMEOUT_MS) {
            self.anchor_timeout_ms =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        var: ENV_ANCHOR_TIMEOUT_MS,
                        value: raw.clone(),
                    })?;
        }
        Ok(self)
    }

    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_millis(self.anchor_timeout_ms)
    }

    pub fn anchor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.anchor_poll_interval_ms)
    }

    /// Name for the ledger: the endpoint, or `"memory"`.
    pub fn ledger_name(&self) -> &str {
        self.anchor_endpoint.as_deref().unwrap_or("memory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secvault_core::DocumentType;
    use secvault_verify::Gate;
    use std::collections::BTreeMap;

    #[test]
    fn file_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        std::fs::write(
            &path,
            r#"{
                "anchor_timeout_ms": 250,
                "policies": {
                    "by_type": {
                        "rx.dispensation": { "mandatory": ["predicate", "anchor"] }
                    }
                }
            }"#,
        )
        .unwrap();

        let config = VaultConfig::from_file(&path).unwrap();
        assert_eq!(config.anchor_timeout(), Duration::from_millis(250));
        assert_eq!(config.anchor_poll_interval_ms, 100);
        assert_eq!(config.ledger_name(), "memory");

        let rx = DocumentType::new("rx.dispensation").unwrap();
        assert!(config.policies.policy_for(&rx).is_mandatory(Gate::Anchor));
        let other = DocumentType::new("edu.diploma").unwrap();
        assert!(!config.policies.policy_for(&other).is_mandatory(Gate::Anchor));
    }

    #[test]
    fn environment_overrides_file() {
        let env = BTreeMap::from([
            (ENV_AUDIT_DB, "/var/lib/secvault/audit.db"),
            (ENV_ANCHOR_ENDPOINT, "ledger.example:7000"),
            (ENV_ANCHOR_TIMEOUT_MS, " 1500 "),
        ]);
        let config = VaultConfig {
            audit_db: Some("other.db".into()),
            ..VaultConfig::default()
        }
        .with_overrides(|var| env.get(var).map(|v| v.to_string()))
        .unwrap();

        assert_eq!(config.audit_db, Some(PathBuf::from("/var/lib/secvault/audit.db")));
        assert_eq!(config.ledger_name(), "ledger.example:7000");
        assert_eq!(config.anchor_timeout_ms, 1500);
        assert_eq!(config.trust_store, None);
    }

    #[test]
    fn bad_timeout_rejected() {
        let err = VaultConfig::default()
            .with_overrides(|var| (var == ENV_ANCHOR_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: ENV_ANCHOR_TIMEOUT_MS, .. }
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            VaultConfig::from_file("/nonexistent/secvault.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
