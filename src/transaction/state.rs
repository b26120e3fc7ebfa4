// ============================================================================
// Transaction State Management
// ============================================================================
//
// Implements the State Pattern for transaction lifecycle management.
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// Besides the undo log, a transaction owns its savepoints and the rollback
// listeners registered while it is active. Listeners carry a sequence number
// so a savepoint rollback fires exactly those registered after the savepoint.
//
// ============================================================================

use super::{Change, RollbackListener};
use crate::core::{DbError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state following the State Pattern
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Position in a transaction that can be rolled back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
    /// Number of changes recorded when the savepoint was taken.
    pub change_mark: usize,
    /// Sequence number of the first listener registered after it.
    pub listener_mark: u64,
}

pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    /// Undo log (Command Pattern)
    changes: Vec<Change>,
    savepoints: Vec<Savepoint>,
    listeners: Vec<(u64, Arc<dyn RollbackListener>)>,
    next_listener: u64,
    start_time: std::time::Instant,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .field("savepoints", &self.savepoints)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            changes: Vec::new(),
            savepoints: Vec::new(),
            listeners: Vec::new(),
            next_listener: 0,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionError(format!(
                "Cannot {}: transaction {} is {}",
                action, self.id, self.state
            )));
        }
        Ok(())
    }

    /// Record a change in this transaction
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_active("record change")?;
        self.changes.push(change);
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Arc<dyn RollbackListener>) -> Result<u64> {
        self.ensure_active("register rollback listener")?;
        let seq = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((seq, listener));
        Ok(seq)
    }

    /// Takes a savepoint; a savepoint with the same name is replaced.
    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_active("create savepoint")?;
        self.savepoints.retain(|sp| sp.name != name);
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            change_mark: self.changes.len(),
            listener_mark: self.next_listener,
        });
        Ok(())
    }

    pub fn find_savepoint(&self, name: &str) -> Result<&Savepoint> {
        self.savepoints
            .iter()
            .find(|sp| sp.name == name)
            .ok_or_else(|| DbError::TransactionError(format!("Savepoint '{}' not found", name)))
    }

    /// Forgets `name` and every savepoint taken after it.
    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let pos = self
            .savepoints
            .iter()
            .position(|sp| sp.name == name)
            .ok_or_else(|| DbError::TransactionError(format!("Savepoint '{}' not found", name)))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    /// Detaches what a rollback to `name` must undo and notify.
    ///
    /// Returns the changes recorded after the savepoint, oldest first, and
    /// the listeners registered after it. Temporary listeners are removed;
    /// savepoints taken after `name` are discarded, `name` itself survives.
    pub fn unwind_to(
        &mut self,
        name: &str,
    ) -> Result<(Vec<Change>, Vec<Arc<dyn RollbackListener>>)> {
        self.ensure_active("rollback to savepoint")?;
        let savepoint = self.find_savepoint(name)?.clone();

        if let Some(pos) = self.savepoints.iter().position(|sp| sp.name == name) {
            self.savepoints.truncate(pos + 1);
        }
        let changes = self.changes.split_off(savepoint.change_mark.min(self.changes.len()));
        let fired = self
            .listeners
            .iter()
            .filter(|(seq, _)| *seq >= savepoint.listener_mark)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        self.listeners
            .retain(|(seq, listener)| *seq < savepoint.listener_mark || !listener.is_temporary());

        Ok((changes, fired))
    }

    /// Detaches the whole undo log and every listener.
    pub fn unwind(&mut self) -> (Vec<Change>, Vec<Arc<dyn RollbackListener>>) {
        self.savepoints.clear();
        let changes = std::mem::take(&mut self.changes);
        let listeners = std::mem::take(&mut self.listeners)
            .into_iter()
            .map(|(_, listener)| listener)
            .collect();
        (changes, listeners)
    }

    /// Mark transaction as committed
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;
        self.changes.clear();
        self.savepoints.clear();
        self.listeners.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active("rollback")?;
        self.changes.clear();
        self.savepoints.clear();
        self.listeners.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }
}
