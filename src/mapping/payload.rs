use crate::core::Value;

/// Payload key: a written column or a predicate (WHERE) column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PayloadColumn {
    Value(String),
    Where(String),
}

impl PayloadColumn {
    pub fn name(&self) -> &str {
        match self {
            PayloadColumn::Value(name) | PayloadColumn::Where(name) => name,
        }
    }
}

/// Column-to-value map for one entity, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePayload {
    entries: Vec<(PayloadColumn, Value)>,
}

impl WritePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: PayloadColumn, value: Value) {
        match self.entries.iter_mut().find(|(key, _)| *key == column) {
            Some((_, current)) => *current = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.insert(PayloadColumn::Value(column.into()), value);
    }

    pub fn restrict(&mut self, column: impl Into<String>, value: Value) {
        self.insert(PayloadColumn::Where(column.into()), value);
    }

    pub fn get(&self, column: &PayloadColumn) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == column)
            .map(|(_, value)| value)
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.get(&PayloadColumn::Value(column.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_columns(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|(key, _)| match key {
                PayloadColumn::Value(name) => Some(name.clone()),
                PayloadColumn::Where(_) => None,
            })
            .collect()
    }

    pub fn predicate_columns(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|(key, _)| match key {
                PayloadColumn::Where(name) => Some(name.clone()),
                PayloadColumn::Value(_) => None,
            })
            .collect()
    }

    /// Set values first, then predicate values.
    pub fn bindings(&self) -> Vec<Value> {
        let set = self
            .entries
            .iter()
            .filter(|(key, _)| matches!(key, PayloadColumn::Value(_)));
        let predicate = self
            .entries
            .iter()
            .filter(|(key, _)| matches!(key, PayloadColumn::Where(_)));
        set.chain(predicate).map(|(_, value)| value.clone()).collect()
    }

    /// Values laid out for a statement with the given SET and WHERE columns;
    /// columns absent from the payload bind NULL.
    pub fn bindings_for(&self, set: &[String], predicate: &[String]) -> Vec<Value> {
        let set = set
            .iter()
            .map(|col| self.get(&PayloadColumn::Value(col.clone())));
        let predicate = predicate
            .iter()
            .map(|col| self.get(&PayloadColumn::Where(col.clone())));
        set.chain(predicate)
            .map(|value| value.cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// First written column for which `required` holds but whose value is NULL.
    pub fn null_violation(&self, required: impl Fn(&str) -> bool) -> Option<&str> {
        self.entries.iter().find_map(|(key, value)| match key {
            PayloadColumn::Value(name) if value.is_null() && required(name) => Some(name.as_str()),
            _ => None,
        })
    }
}
