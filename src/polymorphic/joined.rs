// ============================================================================
// Joined-table layout
// ============================================================================
//
// A root table holds the shared columns; every subtype has a child table
// sharing the root's primary key. Writes hit the root first (it may
// generate the id) and the children after; deletes go the other way.
//
// ============================================================================

use super::context::LoadContext;
use super::subtype::{self, Subtype};
use crate::config::PersisterConfig;
use crate::connection::ConnectionProvider;
use crate::core::{DbError, Result};
use crate::engine::select::{dedup_ids, keyed_rows, projected_id};
use crate::engine::{Duo, ListenerCollection, PersisterCore, SimplePersister};
use crate::mapping::{Entity, Identifier};
use crate::result::ResultRow;
use crate::sql::{
    ColumnRef, Join, JoinKind, KeyFilter, Operation, Projection, SelectOperation, TableRef,
};
use crate::storage::TableSchema;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

const ROOT_ALIAS: &str = "r";

fn subtype_alias(prefix: &str, idx: usize) -> String {
    format!("{}s{}", prefix, idx)
}

pub struct JoinedTablesPersister<C> {
    root: SimplePersister<C>,
    subtypes: Vec<Subtype<C>>,
    provider: Arc<dyn ConnectionProvider>,
    config: PersisterConfig,
    listeners: ListenerCollection<C>,
}

impl<C: Entity> JoinedTablesPersister<C> {
    /// Every subtype mapping must name the root table as its parent.
    pub fn new(
        root: SimplePersister<C>,
        subtypes: Vec<Subtype<C>>,
        provider: Arc<dyn ConnectionProvider>,
        config: PersisterConfig,
    ) -> Result<Self> {
        if subtypes.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "Joined hierarchy '{}' declares no subtypes",
                root.mapping().table()
            )));
        }
        for subtype in &subtypes {
            let parent = subtype.persister().mapping().parent();
            if parent.map(|p| p.table.as_str()) != Some(root.mapping().table()) {
                return Err(DbError::InvalidArgument(format!(
                    "Subtype '{}' must join root table '{}'",
                    subtype.name(),
                    root.mapping().table()
                )));
            }
        }
        config.validate()?;

        Ok(Self {
            root,
            subtypes,
            provider,
            config,
            listeners: ListenerCollection::new(),
        })
    }

    pub fn root(&self) -> &SimplePersister<C> {
        &self.root
    }

    pub fn subtypes(&self) -> &[Subtype<C>] {
        &self.subtypes
    }

    pub(crate) fn listeners_mut(&mut self) -> &mut ListenerCollection<C> {
        &mut self.listeners
    }

    pub fn table_schemas(&self) -> Vec<TableSchema> {
        std::iter::once(self.root.mapping().table_schema())
            .chain(
                self.subtypes
                    .iter()
                    .map(|subtype| subtype.persister().mapping().table_schema()),
            )
            .collect()
    }

    /// Outer joins of every child table against the root under `prefix`.
    fn subtype_probes(&self, prefix: &str) -> (Vec<Join>, Vec<Projection>) {
        let id_columns = self.root.mapping().id_columns();
        let mut joins = Vec::with_capacity(self.subtypes.len());
        let mut projection = Vec::new();
        for (idx, subtype) in self.subtypes.iter().enumerate() {
            let alias = subtype_alias(prefix, idx);
            let on = id_columns
                .iter()
                .map(|col| (ColumnRef::new(prefix, col.as_str()), ColumnRef::new(&alias, col.as_str())))
                .collect();
            joins.push(Join::new(
                JoinKind::LeftOuter,
                TableRef::new(subtype.persister().mapping().table(), &alias),
                on,
            ));
            projection.extend(id_columns.iter().map(|col| Projection::of(&alias, col)));
        }
        (joins, projection)
    }

    /// Joins the root under `prefix` to `foreign_key` of the owner, then
    /// probes the child tables.
    pub fn probe(&self, owner_alias: &str, foreign_key: &[String], prefix: &str) -> (Vec<Join>, Vec<Projection>) {
        let id_columns = self.root.mapping().id_columns();
        let on = foreign_key
            .iter()
            .zip(&id_columns)
            .map(|(fk, id)| (ColumnRef::new(owner_alias, fk.as_str()), ColumnRef::new(prefix, id.as_str())))
            .collect();
        let mut joins = vec![Join::new(
            JoinKind::LeftOuter,
            TableRef::new(self.root.mapping().table(), prefix),
            on,
        )];
        let (probes, projection) = self.subtype_probes(prefix);
        joins.extend(probes);
        (joins, projection)
    }

    /// First subtype, in declaration order, with a row for the probed id.
    pub fn resolve(&self, row: &ResultRow, prefix: &str) -> Result<Option<(String, Identifier)>> {
        Ok(self
            .resolve_index(row, prefix)?
            .map(|(idx, id)| (self.subtypes[idx].name().to_string(), id)))
    }

    fn resolve_index(&self, row: &ResultRow, prefix: &str) -> Result<Option<(usize, Identifier)>> {
        let assembler = self.root.mapping().assembler();
        for idx in 0..self.subtypes.len() {
            if let Some(id) = projected_id(assembler, row, &subtype_alias(prefix, idx))? {
                return Ok(Some((idx, id)));
            }
        }
        Ok(None)
    }

    fn probe_operation(&self, key_count: usize) -> Operation {
        let (joins, probes) = self.subtype_probes(ROOT_ALIAS);
        let mut projection: Vec<Projection> = self
            .root
            .mapping()
            .id_columns()
            .iter()
            .map(|col| Projection::of(ROOT_ALIAS, col))
            .collect();
        projection.extend(probes);
        Operation::Select(SelectOperation {
            from: TableRef::new(self.root.mapping().table(), ROOT_ALIAS),
            joins,
            projection,
            filter: KeyFilter {
                columns: self
                    .root
                    .mapping()
                    .id_columns()
                    .iter()
                    .map(|col| ColumnRef::new(ROOT_ALIAS, col.as_str()))
                    .collect(),
                key_count,
            },
        })
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

    /// Root probe, then a keyed select per subtype; relations load only
    /// under a context.
    async fn fetch(&self, ids: Vec<Identifier>, mut ctx: Option<&mut LoadContext>) -> Result<Vec<C>> {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = keyed_rows(
            self.provider.as_ref(),
            self.config.max_keys_per_operation,
            self.root.mapping().assembler(),
            &ids,
            |key_count| self.probe_operation(key_count),
        )
        .await?;

        let mut per_subtype: Vec<Vec<Identifier>> = vec![Vec::new(); self.subtypes.len()];
        for row in &rows {
            match self.resolve_index(row, ROOT_ALIAS)? {
                Some((idx, id)) => per_subtype[idx].push(id),
                None => debug!(
                    "Row {:?} of '{}' has no subtype row",
                    projected_id(self.root.mapping().assembler(), row, ROOT_ALIAS)?,
                    self.table()
                ),
            }
        }

        let mut loaded = Vec::with_capacity(ids.len());
        for (subtype, members) in self.subtypes.iter().zip(per_subtype) {
            if !members.is_empty() {
                loaded.extend(subtype.persister().fetch(members, ctx.as_deref_mut()).await?);
            }
        }
        Ok(subtype::in_id_order(&ids, loaded, |entity| self.root.entity_id(entity)))
    }

    fn routes<'e>(&self, entities: impl Iterator<Item = &'e C>) -> Result<Vec<usize>> {
        subtype::route_all(&self.subtypes, entities, self.root.mapping().table())
    }
}

#[async_trait]
impl<C: Entity> PersisterCore<C> for JoinedTablesPersister<C> {
    fn table(&self) -> &str {
        self.root.mapping().table()
    }

    fn listeners(&self) -> &ListenerCollection<C> {
        &self.listeners
    }

    fn entity_id(&self, entity: &C) -> Identifier {
        self.root.entity_id(entity)
    }

    fn entity_is_new(&self, entity: &C) -> bool {
        self.root.entity_is_new(entity)
    }

    fn has_changes(&self, modified: &C, unmodified: &C) -> bool {
        self.root.has_changes(modified, unmodified)
            || subtype::route(&self.subtypes, modified).is_none_or(|idx| {
                self.subtypes[idx]
                    .persister()
                    .has_changes(modified, unmodified)
            })
    }

    async fn insert_entities(&self, entities: &mut [&mut C]) -> Result<u64> {
        let routes = self.routes(entities.iter().map(|e| &**e))?;
        let mut total = self.root.insert_entities(entities).await?;
        total += subtype::insert_routed(&self.subtypes, entities, &routes).await?;
        Ok(total)
    }

    async fn update_entities<'a>(&self, pairs: &mut [Duo<'a, C>], all_columns: bool) -> Result<u64> {
        let routes = self.routes(pairs.iter().map(|pair| &*pair.modified))?;
        let forced: Vec<bool> = pairs
            .iter()
            .zip(&routes)
            .map(|(pair, idx)| {
                self.subtypes[*idx]
                    .persister()
                    .has_changes(&*pair.modified, pair.unmodified)
            })
            .collect();

        // Every payload is validated before the root row is touched.
        let root_plan = self.root.plan_update(pairs, all_columns, &forced)?;
        let plans = subtype::plan_routed(&self.subtypes, pairs, &routes, all_columns)?;

        let mut total = self.root.execute_update(pairs, root_plan).await?;
        total += subtype::execute_routed(&self.subtypes, pairs, &routes, plans).await?;
        Ok(total)
    }

    async fn update_entities_by_id(&self, entities: &[&C]) -> Result<u64> {
        let routes = self.routes(entities.iter().copied())?;
        let mut total = self.root.update_entities_by_id(entities).await?;
        total += subtype::update_by_id_routed(&self.subtypes, entities, &routes).await?;
        Ok(total)
    }

    async fn delete_entities(&self, entities: &[&C]) -> Result<u64> {
        let routes = self.routes(entities.iter().copied())?;
        let mut total = subtype::delete_by_id_routed(&self.subtypes, entities, &routes).await?;
        total += self.root.delete_entities(entities).await?;
        Ok(total)
    }

    async fn delete_ids(&self, ids: Vec<Identifier>) -> Result<u64> {
        let mut total = 0;
        for subtype in &self.subtypes {
            total += subtype.persister().delete_ids(ids.clone()).await?;
        }
        total += self.root.delete_ids(ids).await?;
        Ok(total)
    }

    async fn select_entities(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>> {
        self.fetch(ids, Some(ctx)).await
    }

    async fn reload_entities(&self, ids: Vec<Identifier>) -> Result<Vec<C>> {
        self.fetch(ids, None).await
    }
}
