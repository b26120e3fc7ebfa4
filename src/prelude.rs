//! Everything needed to map and persist entities against the in-memory store.
//!
//! `use rustmemodb_orm::prelude::*;` brings the public persister capability
//! into scope together with the mapping builders.

pub use crate::config::PersisterConfig;
pub use crate::connection::{ConnectionProvider, MemoryConnectionProvider};
pub use crate::core::{Column, DataType, DbError, Result, Value};
pub use crate::engine::{Duo, EntityPersister, PersistListener, PersistOperation, SimplePersister};
pub use crate::mapping::{
    CompositeIdentifier, EntityMapping, Identifier, IdentifierPolicy, PropertyMapping, RowView,
    SimpleIdentifier, VersionMapping, VersionToken,
};
pub use crate::polymorphic::{
    JoinedTablesPersister, LoadContext, PolymorphicPersister, PolymorphicRelation,
    SingleTablePersister, Subtype, TablePerClassPersister,
};
pub use crate::storage::{MemoryStore, TableSchema};
pub use crate::transaction::{RollbackListener, TransactionManager};
