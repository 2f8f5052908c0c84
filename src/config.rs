//! Adapter configuration.
//!
//! Options can be built in code (`AdapterOptions::default()` plus field
//! updates) or read from a TOML file whose keys mirror the field names:
//!
//! ```toml
//! namespace = "app"
//! shared_tables = true
//! timeout_ms = 2500
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::TenantScope;
use crate::model::collection::validate_key;
use crate::model::QueryLimits;

/// Failure while loading options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`AdapterOptions`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Offending path (empty for in-memory input).
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// The options parsed but are inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-adapter options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterOptions {
    /// Prefix of every physical table/collection name.
    pub namespace: String,
    /// Store all tenants in the same tables, isolated by a tenant column.
    pub shared_tables: bool,
    /// Let documents carry their own tenant under shared tables.
    pub tenant_per_document: bool,
    /// Per-call deadline in milliseconds; 0 disables it.
    pub timeout_ms: u64,
    /// Maximum values carried by one query.
    pub max_query_values: usize,
    /// Maximum nesting depth of logical queries.
    pub max_query_depth: usize,
    /// Polls allowed while waiting for a unique index to finish building.
    pub index_build_retries: u32,
    /// Initial backoff between index build polls, doubled on every retry.
    pub index_build_backoff_ms: u64,
    /// Whether the backend offers real transactions. Without them the
    /// transaction calls only maintain the depth counter.
    pub transactions: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            namespace: "docbase".to_string(),
            shared_tables: false,
            tenant_per_document: false,
            timeout_ms: 0,
            max_query_values: 5_000,
            max_query_depth: 8,
            index_build_retries: 5,
            index_build_backoff_ms: 10,
            transactions: true,
        }
    }
}

impl AdapterOptions {
    /// Parses options from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(input).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Checks the options for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_key(&self.namespace).map_err(|err| ConfigError::Invalid(err.message().to_string()))?;
        if self.tenant_per_document && !self.shared_tables {
            return Err(ConfigError::Invalid(
                "tenant_per_document requires shared_tables".to_string(),
            ));
        }
        if self.max_query_depth == 0 || self.max_query_values == 0 {
            return Err(ConfigError::Invalid(
                "query limits must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Query limits derived from the options.
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            max_depth: self.max_query_depth,
            max_values: self.max_query_values,
        }
    }

    /// Tenant scope derived from the options.
    pub fn tenant_scope(&self) -> TenantScope {
        TenantScope::new(self.shared_tables, self.tenant_per_document)
    }
}
