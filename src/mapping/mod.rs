// ============================================================================
// Entity Mapping
// ============================================================================
//
// Immutable description of how an entity type maps onto a table. Column
// access goes through accessor closures supplied when the mapping is built.
//
// ============================================================================

pub mod entity;
pub mod identifier;
pub mod payload;
pub mod property;
pub mod row;
pub mod version;

pub use entity::{Entity, EntityMapping, EntityReader, ParentTable};
pub use identifier::{
    CompositeIdentifier, Identifier, IdentifierAssembler, IdentifierPolicy, SimpleIdentifier,
};
pub use payload::{PayloadColumn, WritePayload};
pub use property::PropertyMapping;
pub use row::RowView;
pub use version::{
    IntegerVersioning, TimestampVersioning, VersionMapping, VersionToken, VersioningStrategy,
};
