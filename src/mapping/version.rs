use crate::core::{Column, DataType, DbError, Result, Value};
use chrono::{Duration, Utc};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Version value owned by an entity instance.
///
/// Cloning copies the value; rollback listeners hold a shared handle
/// obtained through [`VersionToken::share`] so they can restore it later.
#[derive(Default)]
pub struct VersionToken(Arc<RwLock<Value>>);

impl VersionToken {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(Arc::new(RwLock::new(value.into())))
    }

    pub fn get(&self) -> Value {
        match self.0.read() {
            Ok(value) => value.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, value: Value) {
        match self.0.write() {
            Ok(mut current) => *current = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    pub(crate) fn share(&self) -> VersionToken {
        VersionToken(Arc::clone(&self.0))
    }
}

impl Clone for VersionToken {
    fn clone(&self) -> Self {
        VersionToken::new(self.get())
    }
}

impl PartialEq for VersionToken {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl fmt::Debug for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionToken({:?})", self.get())
    }
}

impl From<Value> for VersionToken {
    fn from(value: Value) -> Self {
        VersionToken::new(value)
    }
}

/// Sequence function producing the next version.
pub trait VersioningStrategy: Send + Sync {
    fn data_type(&self) -> DataType;

    fn next(&self, previous: &Value) -> Result<Value>;
}

/// NULL -> 1, n -> n + 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerVersioning;

impl VersioningStrategy for IntegerVersioning {
    fn data_type(&self) -> DataType {
        DataType::Integer
    }

    fn next(&self, previous: &Value) -> Result<Value> {
        match previous {
            Value::Null => Ok(Value::Integer(1)),
            Value::Integer(n) => n
                .checked_add(1)
                .map(Value::Integer)
                .ok_or_else(|| DbError::InvalidArgument("Version counter overflow".into())),
            other => Err(DbError::InvalidArgument(format!(
                "Integer versioning cannot advance a {} version",
                other.type_name()
            ))),
        }
    }
}

/// Current UTC time, strictly after the previous version.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampVersioning;

impl VersioningStrategy for TimestampVersioning {
    fn data_type(&self) -> DataType {
        DataType::Timestamp
    }

    fn next(&self, previous: &Value) -> Result<Value> {
        let now = Utc::now();
        match previous {
            Value::Null => Ok(Value::Timestamp(now)),
            Value::Timestamp(prev) if *prev >= now => {
                Ok(Value::Timestamp(*prev + Duration::microseconds(1)))
            }
            Value::Timestamp(_) => Ok(Value::Timestamp(now)),
            other => Err(DbError::InvalidArgument(format!(
                "Timestamp versioning cannot advance a {} version",
                other.type_name()
            ))),
        }
    }
}

pub struct VersionMapping<C> {
    column: Column,
    token: Arc<dyn Fn(&C) -> &VersionToken + Send + Sync>,
    strategy: Arc<dyn VersioningStrategy>,
}

impl<C> VersionMapping<C> {
    pub fn new<F, S>(column: impl Into<String>, token: F, strategy: S) -> Self
    where
        F: Fn(&C) -> &VersionToken + Send + Sync + 'static,
        S: VersioningStrategy + 'static,
    {
        Self {
            column: Column::new(column, strategy.data_type()),
            token: Arc::new(token),
            strategy: Arc::new(strategy),
        }
    }

    /// Integer counter stored in `column`.
    pub fn counter<F>(column: impl Into<String>, token: F) -> Self
    where
        F: Fn(&C) -> &VersionToken + Send + Sync + 'static,
    {
        Self::new(column, token, IntegerVersioning)
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn token<'a>(&self, entity: &'a C) -> &'a VersionToken {
        (self.token)(entity)
    }

    pub fn current(&self, entity: &C) -> Value {
        self.token(entity).get()
    }

    pub fn next(&self, previous: &Value) -> Result<Value> {
        self.strategy.next(previous)
    }
}

impl<C> Clone for VersionMapping<C> {
    fn clone(&self) -> Self {
        Self {
            column: self.column.clone(),
            token: Arc::clone(&self.token),
            strategy: Arc::clone(&self.strategy),
        }
    }
}
