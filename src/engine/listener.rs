use crate::core::DbError;
use crate::mapping::Identifier;
use std::fmt;
use std::sync::Arc;

/// Persister operation a listener is notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistOperation {
    Insert,
    Update,
    UpdateById,
    Delete,
    DeleteById,
    Select,
    Persist,
}

impl fmt::Display for PersistOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PersistOperation::Insert => "insert",
            PersistOperation::Update => "update",
            PersistOperation::UpdateById => "update_by_id",
            PersistOperation::Delete => "delete",
            PersistOperation::DeleteById => "delete_by_id",
            PersistOperation::Select => "select",
            PersistOperation::Persist => "persist",
        };
        write!(f, "{}", name)
    }
}

/// Hooks around persister operations. Every hook defaults to a no-op.
///
/// `before_*` hooks see the input, `after_*` hooks run only on success and
/// `on_error` runs instead of the `after_*` hook on failure.
pub trait PersistListener<C>: Send + Sync {
    fn before_insert(&self, _entities: &[&C]) {}
    fn after_insert(&self, _entities: &[&C]) {}

    fn before_update(&self, _entities: &[&C]) {}
    fn after_update(&self, _entities: &[&C]) {}

    fn before_update_by_id(&self, _entities: &[&C]) {}
    fn after_update_by_id(&self, _entities: &[&C]) {}

    fn before_delete(&self, _entities: &[&C]) {}
    fn after_delete(&self, _entities: &[&C]) {}

    fn before_delete_by_id(&self, _ids: &[Identifier]) {}
    fn after_delete_by_id(&self, _ids: &[Identifier]) {}

    fn before_select(&self, _ids: &[Identifier]) {}
    fn after_select(&self, _entities: &[C]) {}

    fn before_persist(&self, _entities: &[&C]) {}
    fn after_persist(&self, _entities: &[&C]) {}

    fn on_error(&self, _operation: PersistOperation, _error: &DbError) {}
}

/// Ordered group of listeners, itself a listener.
pub struct ListenerCollection<C> {
    listeners: Vec<Arc<dyn PersistListener<C>>>,
}

impl<C> Default for ListenerCollection<C> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<C> Clone for ListenerCollection<C> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<C> ListenerCollection<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn PersistListener<C>>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn each(&self, f: impl Fn(&dyn PersistListener<C>)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}

impl<C> fmt::Debug for ListenerCollection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerCollection")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<C> PersistListener<C> for ListenerCollection<C> {
    fn before_insert(&self, entities: &[&C]) {
        self.each(|l| l.before_insert(entities));
    }

    fn after_insert(&self, entities: &[&C]) {
        self.each(|l| l.after_insert(entities));
    }

    fn before_update(&self, entities: &[&C]) {
        self.each(|l| l.before_update(entities));
    }

    fn after_update(&self, entities: &[&C]) {
        self.each(|l| l.after_update(entities));
    }

    fn before_update_by_id(&self, entities: &[&C]) {
        self.each(|l| l.before_update_by_id(entities));
    }

    fn after_update_by_id(&self, entities: &[&C]) {
        self.each(|l| l.after_update_by_id(entities));
    }

    fn before_delete(&self, entities: &[&C]) {
        self.each(|l| l.before_delete(entities));
    }

    fn after_delete(&self, entities: &[&C]) {
        self.each(|l| l.after_delete(entities));
    }

    fn before_delete_by_id(&self, ids: &[Identifier]) {
        self.each(|l| l.before_delete_by_id(ids));
    }

    fn after_delete_by_id(&self, ids: &[Identifier]) {
        self.each(|l| l.after_delete_by_id(ids));
    }

    fn before_select(&self, ids: &[Identifier]) {
        self.each(|l| l.before_select(ids));
    }

    fn after_select(&self, entities: &[C]) {
        self.each(|l| l.after_select(entities));
    }

    fn before_persist(&self, entities: &[&C]) {
        self.each(|l| l.before_persist(entities));
    }

    fn after_persist(&self, entities: &[&C]) {
        self.each(|l| l.after_persist(entities));
    }

    fn on_error(&self, operation: PersistOperation, error: &DbError) {
        self.each(|l| l.on_error(operation, error));
    }
}
