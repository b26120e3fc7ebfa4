use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Executor tuning shared by every persister.
///
/// ```ignore
/// let config = PersisterConfig::new()
///     .batch_size(50)
///     .max_keys_per_operation(500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersisterConfig {
    /// Parameter sets queued before a batched write is flushed.
    pub batch_size: usize,

    /// Upper bound on keys bound into a single keyed delete or select.
    pub max_keys_per_operation: usize,

    /// Whether write counts are compared with the number of rows written.
    pub row_count_check: bool,

    /// Distinct update statement shapes kept prepared per persister.
    pub statement_cache_size: usize,
}

impl PersisterConfig {
    pub fn new() -> Self {
        Self {
            batch_size: 100,
            max_keys_per_operation: 1000,
            row_count_check: true,
            statement_cache_size: 64,
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn max_keys_per_operation(mut self, max: usize) -> Self {
        self.max_keys_per_operation = max;
        self
    }

    pub fn row_count_check(mut self, enabled: bool) -> Self {
        self.row_count_check = enabled;
        self
    }

    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Parses a configuration; absent fields keep their defaults.
    ///
    /// ```ignore
    /// let config = PersisterConfig::from_json(r#"{"batch_size": 25}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DbError::ConfigError(format!("Invalid persister config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DbError::ConfigError("batch_size must be > 0".into()));
        }

        if self.max_keys_per_operation == 0 {
            return Err(DbError::ConfigError(
                "max_keys_per_operation must be > 0".into(),
            ));
        }

        if self.statement_cache_size == 0 {
            return Err(DbError::ConfigError(
                "statement_cache_size must be > 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self::new()
    }
}
