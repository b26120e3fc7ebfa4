use crate::core::{DbError, Result, Value};
use std::collections::HashMap;

static NULL: Value = Value::Null;

/// One decoded row of a read operation, keyed by projection alias.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    values: HashMap<String, Value>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, alias: impl Into<String>, value: Value) {
        self.values.insert(alias.into(), value);
    }

    pub fn with(mut self, alias: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(alias, value.into());
        self
    }

    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.values.get(alias)
    }

    /// Like [`ResultRow::get`] but a missing alias is an error.
    pub fn require(&self, alias: &str) -> Result<&Value> {
        self.values
            .get(alias)
            .ok_or_else(|| DbError::ColumnNotFound(alias.to_string(), "<result>".to_string()))
    }

    /// Missing aliases read as NULL (outer-join probes).
    pub fn get_or_null(&self, alias: &str) -> &Value {
        self.values.get(alias).unwrap_or(&NULL)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
