pub mod memory;

use crate::core::{Result, Value};
use crate::result::ResultRow;
use crate::sql::{Bindings, Operation};
use crate::transaction::RollbackObserver;
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::{MemoryConnection, MemoryConnectionProvider, MemoryPreparedOperation};

/// Prepared operation handle
///
/// Bindings are positional, in the order described by [`Operation`].
/// Dropping the handle closes it.
#[async_trait]
pub trait PreparedOperation: Send {
    fn sql(&self) -> &str;

    /// Queues one parameter set for [`PreparedOperation::execute_batch`].
    fn add_batch(&mut self, bindings: Bindings) -> Result<()>;

    /// Number of queued parameter sets.
    fn pending(&self) -> usize;

    /// Executes the queued parameter sets, returning one count per set.
    async fn execute_batch(&mut self) -> Result<Vec<u64>>;

    async fn execute_update(&mut self, bindings: Bindings) -> Result<u64>;

    async fn execute_query(&mut self, bindings: Bindings) -> Result<Vec<ResultRow>>;

    /// Store-generated values of the inserts executed since the last call.
    fn take_generated_keys(&mut self) -> Vec<Value>;
}

/// Database connection handle
pub trait Connection: Send + Sync {
    fn prepare(&self, operation: &Operation) -> Result<Box<dyn PreparedOperation>>;
}

/// Source of connections for the executors.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connection(&self) -> Result<Box<dyn Connection>>;

    /// Present only when connections run inside rollback-aware transactions.
    fn rollback_observer(&self) -> Option<Arc<dyn RollbackObserver>> {
        None
    }
}
