use crate::core::{Column, Value};
use std::sync::Arc;

/// One mapped column with its accessor.
pub struct PropertyMapping<C> {
    column: Column,
    getter: Arc<dyn Fn(&C) -> Value + Send + Sync>,
    insertable: bool,
    updatable: bool,
}

impl<C> PropertyMapping<C> {
    pub fn new<F>(column: Column, getter: F) -> Self
    where
        F: Fn(&C) -> Value + Send + Sync + 'static,
    {
        Self {
            column,
            getter: Arc::new(getter),
            insertable: true,
            updatable: true,
        }
    }

    /// Written on insert only.
    pub fn immutable(mut self) -> Self {
        self.updatable = false;
        self
    }

    /// Never written; read back on select.
    pub fn read_only(mut self) -> Self {
        self.insertable = false;
        self.updatable = false;
        self
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn name(&self) -> &str {
        &self.column.name
    }

    pub fn is_insertable(&self) -> bool {
        self.insertable
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    pub fn get(&self, entity: &C) -> Value {
        (self.getter)(entity)
    }
}

impl<C> Clone for PropertyMapping<C> {
    fn clone(&self) -> Self {
        Self {
            column: self.column.clone(),
            getter: Arc::clone(&self.getter),
            insertable: self.insertable,
            updatable: self.updatable,
        }
    }
}
