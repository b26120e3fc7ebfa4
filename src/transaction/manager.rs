// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Change, RollbackListener, RollbackObserver, Transaction, TransactionId};
use crate::core::{DbError, Result};
use crate::storage::MemoryStore;
use log::debug;
use std::sync::{Arc, Mutex};

/// Single-slot transaction manager over a [`MemoryStore`].
///
/// Statements executed while a transaction is active record their undo
/// entries here; outside a transaction they are autocommitted.
pub struct TransactionManager {
    store: Arc<MemoryStore>,
    current: Mutex<Option<Transaction>>,
}

impl TransactionManager {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            current: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub async fn begin(&self) -> Result<TransactionId> {
        let mut slot = self.current.lock()?;
        if let Some(active) = slot.as_ref() {
            return Err(DbError::TransactionError(format!(
                "Transaction {} is already active",
                active.id()
            )));
        }
        let id = TransactionId::new();
        *slot = Some(Transaction::new(id));
        debug!("Began transaction {}", id);
        Ok(id)
    }

    /// Appends undo entries to the active transaction, if any.
    pub fn record_changes(&self, changes: Vec<Change>) -> Result<()> {
        let mut slot = self.current.lock()?;
        if let Some(txn) = slot.as_mut() {
            for change in changes {
                txn.record_change(change)?;
            }
        }
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        let mut txn = self
            .current
            .lock()?
            .take()
            .ok_or_else(|| DbError::TransactionError("No active transaction".into()))?;
        txn.commit()?;
        debug!("Committed transaction {} in {:?}", txn.id(), txn.duration());
        Ok(())
    }

    /// Undoes every change of the active transaction and fires all listeners.
    pub async fn rollback(&self) -> Result<()> {
        let mut txn = self
            .current
            .lock()?
            .take()
            .ok_or_else(|| DbError::TransactionError("No active transaction".into()))?;
        let (changes, listeners) = txn.unwind();

        self.undo(None, changes, &listeners).await?;
        txn.rollback()?;
        debug!("Rolled back transaction {}", txn.id());
        Ok(())
    }

    pub fn savepoint(&self, name: &str) -> Result<()> {
        let mut slot = self.current.lock()?;
        let txn = slot
            .as_mut()
            .ok_or_else(|| DbError::TransactionError("No active transaction".into()))?;
        txn.savepoint(name)
    }

    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        let mut slot = self.current.lock()?;
        let txn = slot
            .as_mut()
            .ok_or_else(|| DbError::TransactionError("No active transaction".into()))?;
        txn.release_savepoint(name)
    }

    /// Undoes the changes made after `name` and fires the listeners
    /// registered after it. The savepoint stays usable.
    pub async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let (changes, listeners) = {
            let mut slot = self.current.lock()?;
            let txn = slot
                .as_mut()
                .ok_or_else(|| DbError::TransactionError("No active transaction".into()))?;
            txn.unwind_to(name)?
        };

        self.undo(Some(name), changes, &listeners).await?;
        debug!(
            "Rolled back to savepoint '{}', notified {} listener(s)",
            name,
            listeners.len()
        );
        Ok(())
    }

    async fn undo(
        &self,
        savepoint: Option<&str>,
        changes: Vec<Change>,
        listeners: &[Arc<dyn RollbackListener>],
    ) -> Result<()> {
        for listener in listeners {
            listener.before_rollback(savepoint);
        }
        for change in changes.into_iter().rev() {
            self.store.undo(change).await?;
        }
        for listener in listeners {
            listener.after_rollback(savepoint);
        }
        Ok(())
    }
}

impl RollbackObserver for TransactionManager {
    fn add_rollback_listener(&self, listener: Arc<dyn RollbackListener>) -> Result<()> {
        let mut slot = self.current.lock()?;
        match slot.as_mut() {
            Some(txn) => {
                txn.add_listener(listener)?;
            }
            None => debug!("No active transaction, rollback listener dropped"),
        }
        Ok(())
    }
}
