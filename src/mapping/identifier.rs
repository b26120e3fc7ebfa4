use crate::core::{Column, DbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Simple or composite primary key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identifier {
    Simple(Value),
    Composite(Vec<Value>),
}

impl Identifier {
    /// Key values in column order.
    pub fn components(&self) -> Vec<Value> {
        match self {
            Identifier::Simple(value) => vec![value.clone()],
            Identifier::Composite(values) => values.clone(),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Identifier::Simple(_) => 1,
            Identifier::Composite(values) => values.len(),
        }
    }

    /// True while any component is still NULL.
    pub fn is_unset(&self) -> bool {
        match self {
            Identifier::Simple(value) => value.is_null(),
            Identifier::Composite(values) => values.iter().any(Value::is_null),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Simple(value) => write!(f, "{}", value),
            Identifier::Composite(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

impl From<Value> for Identifier {
    fn from(value: Value) -> Self {
        Identifier::Simple(value)
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::Simple(Value::Integer(value))
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Simple(Value::from(value))
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::Simple(Value::Text(value))
    }
}

/// Maps an entity's identifier to and from its key columns.
pub trait IdentifierAssembler<C>: Send + Sync {
    fn columns(&self) -> &[Column];

    fn identifier(&self, entity: &C) -> Identifier;

    /// Key column values of `id`, in [`IdentifierAssembler::columns`] order.
    fn disassemble(&self, id: &Identifier) -> Result<Vec<Value>>;

    /// Rebuilds an identifier from key column values; `None` when any is NULL.
    fn assemble(&self, values: Vec<Value>) -> Result<Option<Identifier>>;

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|col| col.name.clone()).collect()
    }
}

pub struct SimpleIdentifier<C> {
    columns: [Column; 1],
    getter: Arc<dyn Fn(&C) -> Value + Send + Sync>,
}

impl<C> SimpleIdentifier<C> {
    pub fn new<F>(column: Column, getter: F) -> Self
    where
        F: Fn(&C) -> Value + Send + Sync + 'static,
    {
        Self {
            columns: [column.primary_key()],
            getter: Arc::new(getter),
        }
    }
}

impl<C> IdentifierAssembler<C> for SimpleIdentifier<C> {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn identifier(&self, entity: &C) -> Identifier {
        Identifier::Simple((self.getter)(entity))
    }

    fn disassemble(&self, id: &Identifier) -> Result<Vec<Value>> {
        match id {
            Identifier::Simple(value) => Ok(vec![value.clone()]),
            Identifier::Composite(_) => Err(DbError::InvalidArgument(format!(
                "Composite identifier {} given for single column '{}'",
                id, self.columns[0].name
            ))),
        }
    }

    fn assemble(&self, mut values: Vec<Value>) -> Result<Option<Identifier>> {
        if values.len() != 1 {
            return Err(DbError::InvalidArgument(format!(
                "Expected 1 key value, got {}",
                values.len()
            )));
        }
        let value = values.remove(0);
        Ok((!value.is_null()).then_some(Identifier::Simple(value)))
    }
}

pub struct CompositeIdentifier<C> {
    columns: Vec<Column>,
    getter: Arc<dyn Fn(&C) -> Vec<Value> + Send + Sync>,
}

impl<C> CompositeIdentifier<C> {
    pub fn new<F>(columns: Vec<Column>, getter: F) -> Self
    where
        F: Fn(&C) -> Vec<Value> + Send + Sync + 'static,
    {
        Self {
            columns: columns.into_iter().map(Column::primary_key).collect(),
            getter: Arc::new(getter),
        }
    }
}

impl<C> IdentifierAssembler<C> for CompositeIdentifier<C> {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn identifier(&self, entity: &C) -> Identifier {
        Identifier::Composite((self.getter)(entity))
    }

    fn disassemble(&self, id: &Identifier) -> Result<Vec<Value>> {
        let values = id.components();
        if values.len() != self.columns.len() {
            return Err(DbError::InvalidArgument(format!(
                "Identifier {} has {} component(s), key has {} column(s)",
                id,
                values.len(),
                self.columns.len()
            )));
        }
        Ok(values)
    }

    fn assemble(&self, values: Vec<Value>) -> Result<Option<Identifier>> {
        if values.len() != self.columns.len() {
            return Err(DbError::InvalidArgument(format!(
                "Expected {} key values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        if values.iter().any(Value::is_null) {
            return Ok(None);
        }
        Ok(Some(Identifier::Composite(values)))
    }
}

type IdSetter<C> = Arc<dyn Fn(&mut C, Value) + Send + Sync>;

/// How an entity obtains its identifier on insert.
pub enum IdentifierPolicy<C> {
    /// The entity carries its identifier.
    Assigned,
    /// Unset identifiers are generated before the insert payload is built.
    BeforeInsert {
        generator: Arc<dyn Fn() -> Value + Send + Sync>,
        setter: IdSetter<C>,
    },
    /// The store generates the key; it is read back after each flush.
    Generated { setter: IdSetter<C> },
}

impl<C> IdentifierPolicy<C> {
    pub fn before_insert<G, S>(generator: G, setter: S) -> Self
    where
        G: Fn() -> Value + Send + Sync + 'static,
        S: Fn(&mut C, Value) + Send + Sync + 'static,
    {
        IdentifierPolicy::BeforeInsert {
            generator: Arc::new(generator),
            setter: Arc::new(setter),
        }
    }

    /// Random v4 UUIDs rendered as text.
    pub fn uuid<S>(setter: S) -> Self
    where
        S: Fn(&mut C, Value) + Send + Sync + 'static,
    {
        Self::before_insert(|| Value::Text(uuid::Uuid::new_v4().to_string()), setter)
    }

    pub fn generated<S>(setter: S) -> Self
    where
        S: Fn(&mut C, Value) + Send + Sync + 'static,
    {
        IdentifierPolicy::Generated {
            setter: Arc::new(setter),
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, IdentifierPolicy::Generated { .. })
    }
}

impl<C> Clone for IdentifierPolicy<C> {
    fn clone(&self) -> Self {
        match self {
            IdentifierPolicy::Assigned => IdentifierPolicy::Assigned,
            IdentifierPolicy::BeforeInsert { generator, setter } => IdentifierPolicy::BeforeInsert {
                generator: Arc::clone(generator),
                setter: Arc::clone(setter),
            },
            IdentifierPolicy::Generated { setter } => IdentifierPolicy::Generated {
                setter: Arc::clone(setter),
            },
        }
    }
}

impl<C> fmt::Debug for IdentifierPolicy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierPolicy::Assigned => write!(f, "Assigned"),
            IdentifierPolicy::BeforeInsert { .. } => write!(f, "BeforeInsert"),
            IdentifierPolicy::Generated { .. } => write!(f, "Generated"),
        }
    }
}
