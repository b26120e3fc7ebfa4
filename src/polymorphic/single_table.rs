// ============================================================================
// Single-table layout
// ============================================================================
//
// All subtypes share one table; a discriminator column written on insert
// tells them apart. Select reads the discriminator of every requested id
// first and routes the ids to the matching subtype. Unknown discriminator
// values are skipped.
//
// ============================================================================

use super::context::LoadContext;
use super::subtype::{self, Subtype};
use crate::config::PersisterConfig;
use crate::connection::ConnectionProvider;
use crate::core::{Column, DbError, Result, Value};
use crate::engine::select::{dedup_ids, keyed_rows, projected_id};
use crate::engine::{Duo, ListenerCollection, PersisterCore};
use crate::mapping::{Entity, IdentifierAssembler, Identifier};
use crate::result::ResultRow;
use crate::sql::{
    column_alias, ColumnRef, Join, JoinKind, KeyFilter, Operation, Projection, SelectOperation,
    TableRef,
};
use crate::storage::TableSchema;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

const TABLE_ALIAS: &str = "d";

pub struct SingleTablePersister<C> {
    table: String,
    discriminator: String,
    subtypes: Vec<Subtype<C>>,
    provider: Arc<dyn ConnectionProvider>,
    config: PersisterConfig,
    listeners: ListenerCollection<C>,
}

impl<C: Entity> SingleTablePersister<C> {
    /// Every subtype must map `table` with a distinct value of `discriminator`.
    pub fn new(
        table: impl Into<String>,
        discriminator: impl Into<String>,
        subtypes: Vec<Subtype<C>>,
        provider: Arc<dyn ConnectionProvider>,
        config: PersisterConfig,
    ) -> Result<Self> {
        let table = table.into();
        let discriminator = discriminator.into();
        if subtypes.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "Single-table hierarchy '{}' declares no subtypes",
                table
            )));
        }

        let mut seen: Vec<&Value> = Vec::with_capacity(subtypes.len());
        for subtype in &subtypes {
            let mapping = subtype.persister().mapping();
            if mapping.table() != table {
                return Err(DbError::InvalidArgument(format!(
                    "Subtype '{}' maps '{}' instead of '{}'",
                    subtype.name(),
                    mapping.table(),
                    table
                )));
            }
            match mapping.discriminator() {
                Some((column, value)) if *column == discriminator && !seen.contains(&value) => {
                    seen.push(value)
                }
                _ => {
                    return Err(DbError::InvalidArgument(format!(
                        "Subtype '{}' needs its own value of discriminator '{}'",
                        subtype.name(),
                        discriminator
                    )));
                }
            }
        }
        config.validate()?;

        Ok(Self {
            table,
            discriminator,
            subtypes,
            provider,
            config,
            listeners: ListenerCollection::new(),
        })
    }

    pub fn subtypes(&self) -> &[Subtype<C>] {
        &self.subtypes
    }

    pub(crate) fn listeners_mut(&mut self) -> &mut ListenerCollection<C> {
        &mut self.listeners
    }

    fn assembler(&self) -> &dyn IdentifierAssembler<C> {
        self.subtypes[0].persister().mapping().assembler()
    }

    /// Union of the subtype columns; a column some subtype lacks is nullable.
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        let mut columns: Vec<Column> = Vec::new();
        for subtype in &self.subtypes {
            for column in subtype.persister().mapping().columns() {
                if !columns.iter().any(|known| known.name == column.name) {
                    columns.push(column);
                }
            }
        }
        for column in columns.iter_mut() {
            let shared = self.subtypes.iter().all(|subtype| {
                subtype
                    .persister()
                    .mapping()
                    .columns()
                    .iter()
                    .any(|col| col.name == column.name)
            });
            if !shared {
                column.nullable = true;
            }
        }
        vec![TableSchema::new(self.table.clone(), columns)]
    }

    fn id_and_discriminator(&self, alias: &str) -> Vec<Projection> {
        let mut projection: Vec<Projection> = self
            .assembler()
            .column_names()
            .iter()
            .map(|col| Projection::of(alias, col))
            .collect();
        projection.push(Projection::of(alias, &self.discriminator));
        projection
    }

    pub fn probe(&self, owner_alias: &str, foreign_key: &[String], prefix: &str) -> (Vec<Join>, Vec<Projection>) {
        let on = foreign_key
            .iter()
            .zip(self.assembler().column_names())
            .map(|(fk, id)| (ColumnRef::new(owner_alias, fk.as_str()), ColumnRef::new(prefix, id)))
            .collect();
        let join = Join::new(JoinKind::LeftOuter, TableRef::new(&self.table, prefix), on);
        (vec![join], self.id_and_discriminator(prefix))
    }

    pub fn resolve(&self, row: &ResultRow, prefix: &str) -> Result<Option<(String, Identifier)>> {
        Ok(self
            .resolve_index(row, prefix)?
            .map(|(idx, id)| (self.subtypes[idx].name().to_string(), id)))
    }

    fn resolve_index(&self, row: &ResultRow, prefix: &str) -> Result<Option<(usize, Identifier)>> {
        let Some(id) = projected_id(self.assembler(), row, prefix)? else {
            return Ok(None);
        };
        let value = row.get_or_null(&column_alias(prefix, &self.discriminator));
        let found = self.subtypes.iter().position(|subtype| {
            subtype
                .persister()
                .mapping()
                .discriminator()
                .is_some_and(|(_, known)| known == value)
        });
        if found.is_none() {
            debug!(
                "Ignoring unmapped discriminator {:?} of {} in '{}'",
                value, id, self.table
            );
        }
        Ok(found.map(|idx| (idx, id)))
    }

    fn discriminator_operation(&self, key_count: usize) -> Operation {
        Operation::Select(SelectOperation {
            from: TableRef::new(&self.table, TABLE_ALIAS),
            joins: Vec::new(),
            projection: self.id_and_discriminator(TABLE_ALIAS),
            filter: KeyFilter {
                columns: self
                    .assembler()
                    .column_names()
                    .iter()
                    .map(|col| ColumnRef::new(TABLE_ALIAS, col.as_str()))
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

    async fn fetch(&self, ids: Vec<Identifier>, mut ctx: Option<&mut LoadContext>) -> Result<Vec<C>> {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = keyed_rows(
            self.provider.as_ref(),
            self.config.max_keys_per_operation,
            self.assembler(),
            &ids,
            |key_count| self.discriminator_operation(key_count),
        )
        .await?;

        let mut per_subtype: Vec<Vec<Identifier>> = vec![Vec::new(); self.subtypes.len()];
        for row in &rows {
            if let Some((idx, id)) = self.resolve_index(row, TABLE_ALIAS)? {
                per_subtype[idx].push(id);
            }
        }

        let mut loaded = Vec::with_capacity(ids.len());
        for (subtype, members) in self.subtypes.iter().zip(per_subtype) {
            if !members.is_empty() {
                loaded.extend(subtype.persister().fetch(members, ctx.as_deref_mut()).await?);
            }
        }
        Ok(subtype::in_id_order(&ids, loaded, |entity| self.entity_id(entity)))
    }

    fn routes<'e>(&self, entities: impl Iterator<Item = &'e C>) -> Result<Vec<usize>> {
        subtype::route_all(&self.subtypes, entities, &self.table)
    }
}

#[async_trait]
impl<C: Entity> PersisterCore<C> for SingleTablePersister<C> {
    fn table(&self) -> &str {
        &self.table
    }

    fn listeners(&self) -> &ListenerCollection<C> {
        &self.listeners
    }

    fn entity_id(&self, entity: &C) -> Identifier {
        self.assembler().identifier(entity)
    }

    fn entity_is_new(&self, entity: &C) -> bool {
        let idx = subtype::route(&self.subtypes, entity).unwrap_or(0);
        self.subtypes[idx].persister().entity_is_new(entity)
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

    async fn delete_ids(&self, ids: Vec<Identifier>) -> Result<u64> {
        // Any subtype deletes by key from the shared table.
        self.subtypes[0].persister().delete_ids(ids).await
    }

    async fn select_entities(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>> {
        self.fetch(ids, Some(ctx)).await
    }

    async fn reload_entities(&self, ids: Vec<Identifier>) -> Result<Vec<C>> {
        self.fetch(ids, None).await
    }
}
