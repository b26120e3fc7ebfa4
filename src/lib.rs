// ============================================================================
// RustMemDB ORM
// ============================================================================
//
// Batched entity persistence over a keyed row store: chunked keyed reads,
// batched writes with row-count verification, optimistic locking with
// rollback-aware version tokens, and polymorphic layouts with two-phase
// relation loading.
//
// ============================================================================

pub mod config;
pub mod connection;
pub mod core;
pub mod engine;
pub mod mapping;
pub mod polymorphic;
pub mod prelude;
pub mod result;
pub mod sql;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::PersisterConfig;
pub use core::{Column, DataType, DbError, Result, Value};
pub use result::ResultRow;

pub use connection::{ConnectionProvider, MemoryConnectionProvider};
pub use engine::{
    Duo, EntityPersister, ListenerCollection, PersistListener, PersistOperation, SimplePersister,
};
pub use mapping::{
    CompositeIdentifier, Entity, EntityMapping, Identifier, IdentifierPolicy, PropertyMapping,
    RowView, SimpleIdentifier, VersionMapping, VersionToken,
};
pub use polymorphic::{
    JoinedTablesPersister, LoadContext, PolymorphicPersister, PolymorphicRelation,
    SingleTablePersister, Subtype, TablePerClassPersister,
};
pub use storage::MemoryStore;
pub use transaction::TransactionManager;
