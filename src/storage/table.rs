use crate::core::{Column, DbError, Result, Row, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primary key values of a row, in schema order.
pub type RowKey = Vec<Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Rows of one table keyed by primary key.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowKey, Row>,
    key_indexes: Vec<usize>,
    next_generated: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Result<Self> {
        let key_indexes = schema.schema().primary_key_indexes();
        if key_indexes.is_empty() {
            return Err(DbError::ConstraintViolation(format!(
                "Table '{}' must declare a primary key",
                schema.name()
            )));
        }

        Ok(Self {
            schema,
            rows: BTreeMap::new(),
            key_indexes,
            next_generated: 1,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.schema
            .schema()
            .find_column_index(column)
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), self.name().to_string()))
    }

    pub fn key_of(&self, row: &Row) -> RowKey {
        self.key_indexes.iter().map(|idx| row[*idx].clone()).collect()
    }

    pub fn get(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Inserts a row built from `columns`/`values`; unnamed columns are NULL
    /// and NULL generated columns receive the next counter value.
    ///
    /// Returns the key of the new row and the generated value, if any.
    pub fn insert(&mut self, columns: &[String], values: &[Value]) -> Result<(RowKey, Option<Value>)> {
        let column_defs = self.schema.schema().columns();
        let mut row: Row = vec![Value::Null; column_defs.len()];
        for (column, value) in columns.iter().zip(values) {
            let idx = self.column_index(column)?;
            row[idx] = value.clone();
        }

        let mut generated = None;
        for (idx, column) in column_defs.iter().enumerate() {
            if !column.generated {
                continue;
            }
            match &row[idx] {
                Value::Null => {
                    let value = Value::Integer(self.next_generated);
                    self.next_generated += 1;
                    row[idx] = value.clone();
                    generated.get_or_insert(value);
                }
                Value::Integer(explicit) if *explicit >= self.next_generated => {
                    self.next_generated = explicit + 1;
                }
                _ => {}
            }
        }

        self.validate_row(&row)?;

        let key = self.key_of(&row);
        if self.rows.contains_key(&key) {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate primary key {:?} in table '{}'",
                key,
                self.name()
            )));
        }
        self.rows.insert(key.clone(), row);
        Ok((key, generated))
    }

    /// Keys of the rows whose `columns` equal `values`. NULL never matches.
    pub fn matching_keys(&self, columns: &[usize], values: &[Value]) -> Vec<RowKey> {
        if values.iter().any(Value::is_null) {
            return Vec::new();
        }

        let key_lookup = columns.len() == self.key_indexes.len()
            && self.key_indexes.iter().all(|idx| columns.contains(idx));
        if key_lookup {
            let key: RowKey = self
                .key_indexes
                .iter()
                .filter_map(|key_idx| {
                    columns
                        .iter()
                        .position(|col| col == key_idx)
                        .map(|pos| values[pos].clone())
                })
                .collect();
            return match self.rows.get(&key) {
                Some(row) if Self::row_matches(row, columns, values) => vec![key],
                _ => Vec::new(),
            };
        }

        self.rows
            .iter()
            .filter(|(_, row)| Self::row_matches(row, columns, values))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn row_matches(row: &Row, columns: &[usize], values: &[Value]) -> bool {
        columns.iter().zip(values).all(|(idx, value)| &row[*idx] == value)
    }

    /// Applies `set` to the row under `key`, returning the previous row.
    pub fn update(&mut self, key: &RowKey, set: &[(usize, Value)]) -> Result<Option<Row>> {
        if set.iter().any(|(idx, _)| self.key_indexes.contains(idx)) {
            return Err(DbError::ConstraintViolation(format!(
                "Primary key of table '{}' cannot be updated",
                self.name()
            )));
        }

        let Some(current) = self.rows.get(key) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        for (idx, value) in set {
            updated[*idx] = value.clone();
        }
        self.validate_row(&updated)?;

        Ok(self.rows.insert(key.clone(), updated))
    }

    pub fn remove(&mut self, key: &RowKey) -> Option<Row> {
        self.rows.remove(key)
    }

    /// Puts a row back as it was, used when undoing changes.
    pub fn restore(&mut self, key: RowKey, row: Row) {
        self.rows.insert(key, row);
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }
}
