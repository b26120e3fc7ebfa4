// ============================================================================
// Keyed Select Executor
// ============================================================================
//
// Loads entities by identifier. Ids are chunked by the max-keys limit and
// every chunk runs on the same connection: full chunks reuse one prepared
// `in (...)` statement, the trailing chunk gets its own right-sized one.
//
// ============================================================================

use super::batch;
use super::chunk::Chunks;
use crate::config::PersisterConfig;
use crate::connection::ConnectionProvider;
use crate::core::{DbError, Result, Value};
use crate::mapping::{Entity, EntityMapping, Identifier, IdentifierAssembler, RowView};
use crate::polymorphic::{LoadContext, PendingRelation, RelationLoader};
use crate::result::ResultRow;
use crate::sql::{
    column_alias, ColumnRef, Join, JoinKind, KeyFilter, Operation, Projection, SelectOperation,
    TableRef,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const OWNER_ALIAS: &str = "t";
pub const PARENT_ALIAS: &str = "p";

/// Table alias prefix of the `index`-th relation probe.
pub fn relation_alias(index: usize) -> String {
    format!("r{}", index)
}

/// Drops repeated ids, keeping first occurrences in order.
pub fn dedup_ids(ids: Vec<Identifier>) -> Vec<Identifier> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Key tuples flattened row-major, one parameter per component.
pub fn key_bindings<C>(assembler: &dyn IdentifierAssembler<C>, ids: &[Identifier]) -> Result<Vec<Value>> {
    let mut bindings = Vec::with_capacity(ids.len() * assembler.columns().len());
    for id in ids {
        bindings.extend(assembler.disassemble(id)?);
    }
    Ok(bindings)
}

/// Reads the key columns projected under `alias` back into an identifier.
pub fn projected_id<C>(
    assembler: &dyn IdentifierAssembler<C>,
    row: &ResultRow,
    alias: &str,
) -> Result<Option<Identifier>> {
    let values = assembler
        .column_names()
        .iter()
        .map(|column| row.get_or_null(&column_alias(alias, column)).clone())
        .collect();
    assembler.assemble(values)
}

/// Runs `build(key_count)` for every chunk of `ids` on one connection.
pub async fn keyed_rows<C, F>(
    provider: &dyn ConnectionProvider,
    max_keys: usize,
    assembler: &dyn IdentifierAssembler<C>,
    ids: &[Identifier],
    build: F,
) -> Result<Vec<ResultRow>>
where
    F: Fn(usize) -> Operation + Send,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let chunks = Chunks::split(ids.to_vec(), max_keys)?;
    let conn = provider.connection().await?;
    let mut rows = Vec::new();

    if !chunks.full.is_empty() {
        let mut stmt = conn.prepare(&build(max_keys))?;
        for window in &chunks.full {
            let bindings = key_bindings(assembler, window)?;
            rows.extend(batch::execute_query(stmt.as_mut(), bindings).await?);
        }
    }
    if let Some(rest) = &chunks.remainder {
        let mut stmt = conn.prepare(&build(rest.len()))?;
        let bindings = key_bindings(assembler, rest)?;
        rows.extend(batch::execute_query(stmt.as_mut(), bindings).await?);
    }
    Ok(rows)
}

pub struct SelectExecutor<C> {
    mapping: Arc<EntityMapping<C>>,
    provider: Arc<dyn ConnectionProvider>,
    config: PersisterConfig,
}

impl<C: Entity> SelectExecutor<C> {
    pub fn new(
        mapping: Arc<EntityMapping<C>>,
        provider: Arc<dyn ConnectionProvider>,
        config: PersisterConfig,
    ) -> Self {
        Self {
            mapping,
            provider,
            config,
        }
    }

    fn aliases(&self) -> Vec<String> {
        match self.mapping.parent() {
            Some(_) => vec![OWNER_ALIAS.to_string(), PARENT_ALIAS.to_string()],
            None => vec![OWNER_ALIAS.to_string()],
        }
    }

    /// Select of `key_count` ids, with the first-phase probes of `relations`.
    pub fn operation(&self, key_count: usize, relations: &[Arc<dyn RelationLoader<C>>]) -> Operation {
        let id_columns = self.mapping.id_columns();
        let mut projection: Vec<Projection> = self
            .mapping
            .columns()
            .iter()
            .map(|column| Projection::of(OWNER_ALIAS, &column.name))
            .collect();
        let mut joins = Vec::new();

        if let Some(parent) = self.mapping.parent() {
            let on = id_columns
                .iter()
                .map(|col| {
                    (
                        ColumnRef::new(OWNER_ALIAS, col.as_str()),
                        ColumnRef::new(PARENT_ALIAS, col.as_str()),
                    )
                })
                .collect();
            joins.push(Join::new(
                JoinKind::Inner,
                TableRef::new(parent.table.clone(), PARENT_ALIAS),
                on,
            ));
            projection.extend(
                parent
                    .columns
                    .iter()
                    .map(|column| Projection::of(PARENT_ALIAS, column)),
            );
        }

        for (idx, relation) in relations.iter().enumerate() {
            let (relation_joins, relation_projection) =
                relation.first_phase(OWNER_ALIAS, &relation_alias(idx));
            joins.extend(relation_joins);
            projection.extend(relation_projection);
        }

        Operation::Select(SelectOperation {
            from: TableRef::new(self.mapping.table(), OWNER_ALIAS),
            joins,
            projection,
            filter: KeyFilter {
                columns: id_columns
                    .iter()
                    .map(|col| ColumnRef::new(OWNER_ALIAS, col.as_str()))
                    .collect(),
                key_count,
            },
        })
    }

    /// Loads the entities of `ids` in first-occurrence order of the ids.
    ///
    /// With relations, a pending set is pushed on `ctx` for the first phase
    /// and popped before the second phase runs, on every exit path.
    pub async fn select(
        &self,
        ids: Vec<Identifier>,
        relations: &[Arc<dyn RelationLoader<C>>],
        ctx: &mut LoadContext,
    ) -> Result<Vec<C>> {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if relations.is_empty() {
            let loaded = self.load(&ids, relations, ctx).await?;
            return Ok(loaded.into_iter().map(|(_, entity)| entity).collect());
        }

        ctx.push_set();
        let loaded = self.load(&ids, relations, ctx).await;
        let pending = ctx.pop_set();
        let loaded = loaded?;
        let mut pending = pending.ok_or_else(|| {
            DbError::ExecutionError("Pending relation stack underflow".into())
        })?;

        let index: HashMap<Identifier, usize> = loaded
            .iter()
            .enumerate()
            .map(|(pos, (id, _))| (id.clone(), pos))
            .collect();
        let mut entities: Vec<C> = loaded.into_iter().map(|(_, entity)| entity).collect();

        for (idx, relation) in relations.iter().enumerate() {
            let entries = pending.take_relation(idx);
            if entries.is_empty() {
                continue;
            }
            relation
                .second_phase(entries, &mut entities, &index, ctx)
                .await?;
        }
        Ok(entities)
    }

    async fn load(
        &self,
        ids: &[Identifier],
        relations: &[Arc<dyn RelationLoader<C>>],
        ctx: &mut LoadContext,
    ) -> Result<Vec<(Identifier, C)>> {
        let rows = keyed_rows(
            self.provider.as_ref(),
            self.config.max_keys_per_operation,
            self.mapping.assembler(),
            ids,
            |key_count| self.operation(key_count, relations),
        )
        .await?;

        let aliases = self.aliases();
        let mut by_id: HashMap<Identifier, C> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let Some(id) = projected_id(self.mapping.assembler(), row, OWNER_ALIAS)? else {
                continue;
            };
            if by_id.contains_key(&id) {
                continue;
            }
            for (idx, relation) in relations.iter().enumerate() {
                if let Some((selector, target)) = relation.first_phase_read(row, &relation_alias(idx))? {
                    ctx.record(PendingRelation {
                        relation: idx,
                        selector,
                        owner: id.clone(),
                        target,
                    })?;
                }
            }
            let entity = self.mapping.read(&RowView::new(row, &aliases))?;
            by_id.insert(id, entity);
        }

        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id).map(|entity| (id.clone(), entity)))
            .collect())
    }
}
