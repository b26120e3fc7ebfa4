// ============================================================================
// Polymorphic dispatch
// ============================================================================
//
// A polymorphic entity type is persisted through one of three layouts,
// selected once at construction time:
//
// - joined tables:   root table + one child table per subtype
// - single table:    one table, subtype told by a discriminator column
// - table per class: one complete table per subtype
//
// Writes are routed per entity to the subtype claiming it. Relations to a
// polymorphic type load in two phases through `RelationLoader`.
//
// ============================================================================

pub mod context;
pub mod joined;
pub mod relation;
pub mod single_table;
pub mod subtype;
pub mod table_per_class;

pub use context::{LoadContext, PendingRelation, PendingRelationSet};
pub use joined::JoinedTablesPersister;
pub use relation::{PolymorphicRelation, RelationLoader};
pub use single_table::SingleTablePersister;
pub use subtype::Subtype;
pub use table_per_class::TablePerClassPersister;

use crate::core::Result;
use crate::engine::{Duo, ListenerCollection, PersistListener, PersisterCore};
use crate::mapping::{Entity, Identifier};
use crate::result::ResultRow;
use crate::sql::{Join, Projection};
use crate::storage::TableSchema;
use async_trait::async_trait;
use std::sync::Arc;

pub enum PolymorphicPersister<C> {
    JoinedTables(JoinedTablesPersister<C>),
    SingleTable(SingleTablePersister<C>),
    TablePerClass(TablePerClassPersister<C>),
}

macro_rules! each_layout {
    ($self:expr, $layout:ident => $body:expr) => {
        match $self {
            PolymorphicPersister::JoinedTables($layout) => $body,
            PolymorphicPersister::SingleTable($layout) => $body,
            PolymorphicPersister::TablePerClass($layout) => $body,
        }
    };
}

impl<C: Entity> PolymorphicPersister<C> {
    pub fn with_listener(mut self, listener: Arc<dyn PersistListener<C>>) -> Self {
        each_layout!(&mut self, layout => layout.listeners_mut().add(listener));
        self
    }

    pub fn layout_name(&self) -> &'static str {
        match self {
            PolymorphicPersister::JoinedTables(_) => "joined",
            PolymorphicPersister::SingleTable(_) => "single_table",
            PolymorphicPersister::TablePerClass(_) => "table_per_class",
        }
    }

    /// Schemas of every table the layout writes to.
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        each_layout!(self, layout => layout.table_schemas())
    }

    pub fn subtypes(&self) -> &[Subtype<C>] {
        each_layout!(self, layout => layout.subtypes())
    }

    /// First-phase joins locating the target of `foreign_key` on the owner.
    pub fn probe(&self, owner_alias: &str, foreign_key: &[String], prefix: &str) -> (Vec<Join>, Vec<Projection>) {
        each_layout!(self, layout => layout.probe(owner_alias, foreign_key, prefix))
    }

    /// Subtype and id of the target found by [`PolymorphicPersister::probe`].
    pub fn resolve(&self, row: &ResultRow, prefix: &str) -> Result<Option<(String, Identifier)>> {
        each_layout!(self, layout => layout.resolve(row, prefix))
    }

    /// Loads `ids` through the subtype named `name`.
    pub async fn select_subtype(
        &self,
        name: &str,
        ids: Vec<Identifier>,
        ctx: &mut LoadContext,
    ) -> Result<Vec<C>> {
        each_layout!(self, layout => layout.select_subtype(name, ids, ctx).await)
    }
}

impl<C: Entity> From<JoinedTablesPersister<C>> for PolymorphicPersister<C> {
    fn from(layout: JoinedTablesPersister<C>) -> Self {
        PolymorphicPersister::JoinedTables(layout)
    }
}

impl<C: Entity> From<SingleTablePersister<C>> for PolymorphicPersister<C> {
    fn from(layout: SingleTablePersister<C>) -> Self {
        PolymorphicPersister::SingleTable(layout)
    }
}

impl<C: Entity> From<TablePerClassPersister<C>> for PolymorphicPersister<C> {
    fn from(layout: TablePerClassPersister<C>) -> Self {
        PolymorphicPersister::TablePerClass(layout)
    }
}

#[async_trait]
impl<C: Entity> PersisterCore<C> for PolymorphicPersister<C> {
    fn table(&self) -> &str {
        each_layout!(self, layout => layout.table())
    }

    fn listeners(&self) -> &ListenerCollection<C> {
        each_layout!(self, layout => layout.listeners())
    }

    fn entity_id(&self, entity: &C) -> Identifier {
        each_layout!(self, layout => layout.entity_id(entity))
    }

    fn entity_is_new(&self, entity: &C) -> bool {
        each_layout!(self, layout => layout.entity_is_new(entity))
    }

    fn has_changes(&self, modified: &C, unmodified: &C) -> bool {
        each_layout!(self, layout => layout.has_changes(modified, unmodified))
    }

    async fn insert_entities(&self, entities: &mut [&mut C]) -> Result<u64> {
        each_layout!(self, layout => layout.insert_entities(entities).await)
    }

    async fn update_entities<'a>(&self, pairs: &mut [Duo<'a, C>], all_columns: bool) -> Result<u64> {
        each_layout!(self, layout => layout.update_entities(pairs, all_columns).await)
    }

    async fn update_entities_by_id(&self, entities: &[&C]) -> Result<u64> {
        each_layout!(self, layout => layout.update_entities_by_id(entities).await)
    }

    async fn delete_entities(&self, entities: &[&C]) -> Result<u64> {
        each_layout!(self, layout => layout.delete_entities(entities).await)
    }

    async fn delete_ids(&self, ids: Vec<Identifier>) -> Result<u64> {
        each_layout!(self, layout => layout.delete_ids(ids).await)
    }

    async fn delete_entities_by_id(&self, entities: &[&C]) -> Result<u64> {
        each_layout!(self, layout => layout.delete_entities_by_id(entities).await)
    }

    async fn select_entities(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>> {
        each_layout!(self, layout => layout.select_entities(ids, ctx).await)
    }

    async fn reload_entities(&self, ids: Vec<Identifier>) -> Result<Vec<C>> {
        each_layout!(self, layout => layout.reload_entities(ids).await)
    }
}
