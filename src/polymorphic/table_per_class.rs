// ============================================================================
// Table-per-class layout
// ============================================================================
//
// Every subtype owns a complete table and there is no shared one. Writes
// are routed to the claiming subtype; select asks every subtype for the
// requested ids and unions the answers.
//
// ============================================================================

use super::context::LoadContext;
use super::subtype::{self, Subtype};
use crate::core::{DbError, Result};
use crate::engine::select::{dedup_ids, projected_id};
use crate::engine::{Duo, ListenerCollection, PersisterCore};
use crate::mapping::{Entity, Identifier};
use crate::result::ResultRow;
use crate::sql::{ColumnRef, Join, JoinKind, Projection, TableRef};
use crate::storage::TableSchema;
use async_trait::async_trait;

pub struct TablePerClassPersister<C> {
    name: String,
    subtypes: Vec<Subtype<C>>,
    listeners: ListenerCollection<C>,
}

impl<C: Entity> TablePerClassPersister<C> {
    /// `name` labels the hierarchy in logs and errors.
    pub fn new(name: impl Into<String>, subtypes: Vec<Subtype<C>>) -> Result<Self> {
        let name = name.into();
        if subtypes.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "Table-per-class hierarchy '{}' declares no subtypes",
                name
            )));
        }
        Ok(Self {
            name,
            subtypes,
            listeners: ListenerCollection::new(),
        })
    }

    pub fn subtypes(&self) -> &[Subtype<C>] {
        &self.subtypes
    }

    pub(crate) fn listeners_mut(&mut self) -> &mut ListenerCollection<C> {
        &mut self.listeners
    }

    pub fn table_schemas(&self) -> Vec<TableSchema> {
        self.subtypes
            .iter()
            .map(|subtype| subtype.persister().mapping().table_schema())
            .collect()
    }

    fn alias(prefix: &str, idx: usize) -> String {
        format!("{}c{}", prefix, idx)
    }

    /// One outer join per subtype table on the owner's foreign key.
    pub fn probe(&self, owner_alias: &str, foreign_key: &[String], prefix: &str) -> (Vec<Join>, Vec<Projection>) {
        let mut joins = Vec::with_capacity(self.subtypes.len());
        let mut projection = Vec::new();
        for (idx, subtype) in self.subtypes.iter().enumerate() {
            let alias = Self::alias(prefix, idx);
            let mapping = subtype.persister().mapping();
            let id_columns = mapping.id_columns();
            let on = foreign_key
                .iter()
                .zip(&id_columns)
                .map(|(fk, id)| (ColumnRef::new(owner_alias, fk.as_str()), ColumnRef::new(&alias, id.as_str())))
                .collect();
            joins.push(Join::new(JoinKind::LeftOuter, TableRef::new(mapping.table(), &alias), on));
            projection.extend(id_columns.iter().map(|col| Projection::of(&alias, col)));
        }
        (joins, projection)
    }

    pub fn resolve(&self, row: &ResultRow, prefix: &str) -> Result<Option<(String, Identifier)>> {
        for (idx, subtype) in self.subtypes.iter().enumerate() {
            let assembler = subtype.persister().mapping().assembler();
            if let Some(id) = projected_id(assembler, row, &Self::alias(prefix, idx))? {
                return Ok(Some((subtype.name().to_string(), id)));
            }
        }
        Ok(None)
    }

    pub(crate) async fn select_subtype(
        &self,
        name: &str,
        ids: Vec<Identifier>,
        ctx: &mut LoadContext,
    ) -> Result<Vec<C>> {
        subtype::find(&self.subtypes, name)?
            .persister()
            .select_entities(ids, ctx)
            .await
    }

    /// Asks every subtype table for all of `ids`.
    async fn fetch(&self, ids: Vec<Identifier>, mut ctx: Option<&mut LoadContext>) -> Result<Vec<C>> {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut loaded = Vec::with_capacity(ids.len());
        for subtype in &self.subtypes {
            loaded.extend(subtype.persister().fetch(ids.clone(), ctx.as_deref_mut()).await?);
        }
        Ok(subtype::in_id_order(&ids, loaded, |entity| self.entity_id(entity)))
    }

    fn claimant(&self, entity: &C) -> &Subtype<C> {
        let idx = subtype::route(&self.subtypes, entity).unwrap_or(0);
        &self.subtypes[idx]
    }

    fn routes<'e>(&self, entities: impl Iterator<Item = &'e C>) -> Result<Vec<usize>> {
        subtype::route_all(&self.subtypes, entities, &self.name)
    }
}

#[async_trait]
impl<C: Entity> PersisterCore<C> for TablePerClassPersister<C> {
    fn table(&self) -> &str {
        &self.name
    }

    fn listeners(&self) -> &ListenerCollection<C> {
        &self.listeners
    }

    fn entity_id(&self, entity: &C) -> Identifier {
        self.claimant(entity).persister().entity_id(entity)
    }

    fn entity_is_new(&self, entity: &C) -> bool {
        self.claimant(entity).persister().entity_is_new(entity)
    }

    fn has_changes(&self, modified: &C, unmodified: &C) -> bool {
        // Unclaimed entities count as changed so the update rejects them.
        subtype::route(&self.subtypes, modified)
            .is_none_or(|idx| self.subtypes[idx].persister().has_changes(modified, unmodified))
    }

    async fn insert_entities(&self, entities: &mut [&mut C]) -> Result<u64> {
        let routes = self.routes(entities.iter().map(|e| &**e))?;
        subtype::insert_routed(&self.subtypes, entities, &routes).await
    }

    async fn update_entities<'a>(&self, pairs: &mut [Duo<'a, C>], all_columns: bool) -> Result<u64> {
        let routes = self.routes(pairs.iter().map(|pair| &*pair.modified))?;
        let plans = subtype::plan_routed(&self.subtypes, pairs, &routes, all_columns)?;
        subtype::execute_routed(&self.subtypes, pairs, &routes, plans).await
    }

    async fn update_entities_by_id(&self, entities: &[&C]) -> Result<u64> {
        let routes = self.routes(entities.iter().copied())?;
        subtype::update_by_id_routed(&self.subtypes, entities, &routes).await
    }

    async fn delete_entities(&self, entities: &[&C]) -> Result<u64> {
        let routes = self.routes(entities.iter().copied())?;
        subtype::delete_routed(&self.subtypes, entities, &routes).await
    }

    async fn delete_entities_by_id(&self, entities: &[&C]) -> Result<u64> {
        let routes = self.routes(entities.iter().copied())?;
        subtype::delete_by_id_routed(&self.subtypes, entities, &routes).await
    }

    /// Ids carry no subtype here, so every table is asked.
    async fn delete_ids(&self, ids: Vec<Identifier>) -> Result<u64> {
        let mut total = 0;
        for subtype in &self.subtypes {
            total += subtype.persister().delete_ids(ids.clone()).await?;
        }
        Ok(total)
    }

    async fn select_entities(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>> {
        self.fetch(ids, Some(ctx)).await
    }

    async fn reload_entities(&self, ids: Vec<Identifier>) -> Result<Vec<C>> {
        self.fetch(ids, None).await
    }
}
