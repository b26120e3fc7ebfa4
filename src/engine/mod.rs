// ============================================================================
// Persistence engine
// ============================================================================
//
// Chunking, batched write executors, the optimistic lock manager and the
// keyed select executor, composed by `SimplePersister`.
//
// ============================================================================

pub mod batch;
pub mod chunk;
pub mod delete;
pub mod insert;
pub mod listener;
pub mod lock;
pub mod persister;
pub mod select;
pub mod update;

pub use chunk::{Chunks, chunk};
pub use delete::DeleteExecutor;
pub use insert::InsertExecutor;
pub use listener::{ListenerCollection, PersistListener, PersistOperation};
pub use lock::{OptimisticLockManager, VersionRevertListener};
pub use persister::{EntityPersister, PersisterCore, SimplePersister};
pub use select::SelectExecutor;
pub use update::{Duo, UpdateExecutor, UpdatePlan};
