use super::VersionToken;
use crate::core::{DbError, Result, Value};
use crate::result::ResultRow;
use crate::sql::column_alias;
use chrono::{DateTime, Utc};

/// Read access to one selected row by column name.
///
/// Columns are looked up under each table alias in turn, so a subtype
/// reader also sees the columns of its joined parent table.
pub struct RowView<'a> {
    row: &'a ResultRow,
    aliases: &'a [String],
}

impl<'a> RowView<'a> {
    pub fn new(row: &'a ResultRow, aliases: &'a [String]) -> Self {
        Self { row, aliases }
    }

    pub fn get(&self, column: &str) -> Result<&'a Value> {
        self.aliases
            .iter()
            .find_map(|alias| self.row.get(&column_alias(alias, column)))
            .ok_or_else(|| {
                DbError::ColumnNotFound(column.to_string(), self.aliases.join(", "))
            })
    }

    pub fn value(&self, column: &str) -> Result<Value> {
        self.get(column).cloned()
    }

    fn mismatch(column: &str, expected: &str, value: &Value) -> DbError {
        DbError::TypeMismatch(format!(
            "Column '{}' expected {}, got {}",
            column,
            expected,
            value.type_name()
        ))
    }

    pub fn integer(&self, column: &str) -> Result<i64> {
        let value = self.get(column)?;
        value
            .as_i64()
            .ok_or_else(|| Self::mismatch(column, "INTEGER", value))
    }

    pub fn optional_integer(&self, column: &str) -> Result<Option<i64>> {
        match self.get(column)? {
            Value::Null => Ok(None),
            _ => self.integer(column).map(Some),
        }
    }

    pub fn float(&self, column: &str) -> Result<f64> {
        let value = self.get(column)?;
        value
            .as_f64()
            .ok_or_else(|| Self::mismatch(column, "FLOAT", value))
    }

    pub fn text(&self, column: &str) -> Result<String> {
        let value = self.get(column)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Self::mismatch(column, "TEXT", value))
    }

    pub fn optional_text(&self, column: &str) -> Result<Option<String>> {
        match self.get(column)? {
            Value::Null => Ok(None),
            _ => self.text(column).map(Some),
        }
    }

    pub fn boolean(&self, column: &str) -> Result<bool> {
        let value = self.get(column)?;
        value
            .as_bool()
            .ok_or_else(|| Self::mismatch(column, "BOOLEAN", value))
    }

    pub fn timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        let value = self.get(column)?;
        value
            .as_timestamp()
            .ok_or_else(|| Self::mismatch(column, "TIMESTAMP", value))
    }

    pub fn version(&self, column: &str) -> Result<VersionToken> {
        Ok(VersionToken::new(self.value(column)?))
    }
}
