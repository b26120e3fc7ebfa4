// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Undo-log transactions over the in-memory row store, with savepoints and
// rollback listeners.
//
// Design Patterns Used:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: Reversible row changes for rollback
// - Observer Pattern: Rollback listeners
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod rollback;
pub mod state;

pub use change::Change;
pub use manager::TransactionManager;
pub use rollback::{RollbackListener, RollbackObserver};
pub use state::{Savepoint, Transaction, TransactionId, TransactionState};
