use crate::core::Result;
use std::sync::Arc;

/// Callback invoked around a transaction or savepoint rollback.
///
/// `savepoint` is `None` for a full rollback.
pub trait RollbackListener: Send + Sync {
    fn before_rollback(&self, _savepoint: Option<&str>) {}

    fn after_rollback(&self, savepoint: Option<&str>);

    /// Temporary listeners are removed once they have fired.
    fn is_temporary(&self) -> bool {
        true
    }
}

/// Connection-side registry of rollback listeners for the active transaction.
pub trait RollbackObserver: Send + Sync {
    /// Registers `listener`; outside a transaction the listener is dropped.
    fn add_rollback_listener(&self, listener: Arc<dyn RollbackListener>) -> Result<()>;
}
