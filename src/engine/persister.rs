// ============================================================================
// Entity Persister
// ============================================================================
//
// `PersisterCore` is implemented by every concrete persister (the simple
// one below and the polymorphic layouts). `EntityPersister` is the public
// capability, blanket-implemented over any core: it wraps each call in a
// tracing span and invokes the listener hooks exactly once per call, around
// the whole batch.
//
// ============================================================================

use super::delete::DeleteExecutor;
use super::insert::InsertExecutor;
use super::listener::{ListenerCollection, PersistListener, PersistOperation};
use super::lock::OptimisticLockManager;
use super::select::SelectExecutor;
use super::update::{Duo, UpdateExecutor, UpdatePlan};
use crate::config::PersisterConfig;
use crate::connection::ConnectionProvider;
use crate::core::{DbError, Result};
use crate::mapping::{Entity, EntityMapping, Identifier};
use crate::polymorphic::{LoadContext, RelationLoader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Operations a concrete persister provides, without listeners or spans.
#[async_trait]
pub trait PersisterCore<C: Entity>: Send + Sync {
    fn table(&self) -> &str;

    fn listeners(&self) -> &ListenerCollection<C>;

    fn entity_id(&self, entity: &C) -> Identifier;

    fn entity_is_new(&self, entity: &C) -> bool;

    /// True when writing `modified` over `unmodified` would change a row.
    fn has_changes(&self, modified: &C, unmodified: &C) -> bool;

    async fn insert_entities(&self, entities: &mut [&mut C]) -> Result<u64>;

    async fn update_entities<'a>(&self, pairs: &mut [Duo<'a, C>], all_columns: bool) -> Result<u64>;

    async fn update_entities_by_id(&self, entities: &[&C]) -> Result<u64>;

    async fn delete_entities(&self, entities: &[&C]) -> Result<u64>;

    async fn delete_ids(&self, ids: Vec<Identifier>) -> Result<u64>;

    /// Delete by key of each entity, from the tables its own type maps.
    async fn delete_entities_by_id(&self, entities: &[&C]) -> Result<u64> {
        let ids = entities.iter().map(|entity| self.entity_id(entity)).collect();
        self.delete_ids(ids).await
    }

    async fn select_entities(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>>;

    /// Stored state of `ids` without loading relations.
    async fn reload_entities(&self, ids: Vec<Identifier>) -> Result<Vec<C>>;
}

/// Batched persistence of one entity type.
#[async_trait]
pub trait EntityPersister<C: Entity>: Send + Sync {
    fn is_new(&self, entity: &C) -> bool;

    fn identifier(&self, entity: &C) -> Identifier;

    /// Inserts in input order; generated ids and versions are written back.
    async fn insert(&self, entities: &mut [&mut C]) -> Result<u64>;

    /// Differential update; pairs without changes are skipped entirely.
    async fn update<'a>(&self, pairs: &mut [Duo<'a, C>], all_columns: bool) -> Result<u64>;

    /// Full-column update keyed by identifier, without version checks.
    async fn update_by_id(&self, entities: &[&C]) -> Result<u64>;

    async fn delete(&self, entities: &[&C]) -> Result<u64>;

    async fn delete_by_id(&self, entities: &[&C]) -> Result<u64>;

    async fn delete_by_ids(&self, ids: Vec<Identifier>) -> Result<u64>;

    /// Select sharing a pending-relation stack with an enclosing load.
    async fn select_with_context(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>>;

    async fn select(&self, ids: Vec<Identifier>) -> Result<Vec<C>>;

    /// Inserts new entities and diff-updates existing ones against their
    /// stored state.
    async fn persist(&self, entities: &mut [&mut C]) -> Result<u64>;
}

fn report<C, T>(
    listeners: &ListenerCollection<C>,
    operation: PersistOperation,
    result: Result<T>,
) -> Result<T> {
    if let Err(err) = &result {
        listeners.on_error(operation, err);
        event!(Level::ERROR, error = %err, operation = %operation, "persister operation failed");
    }
    result
}

fn views<'a, C>(entities: &'a [&mut C]) -> Vec<&'a C> {
    entities.iter().map(|entity| &**entity).collect()
}

fn touched<'p, C>(pairs: &'p [Duo<'_, C>], changed: &[usize]) -> Vec<&'p C> {
    changed.iter().map(|idx| &*pairs[*idx].modified).collect()
}

#[async_trait]
impl<C: Entity, P: PersisterCore<C>> EntityPersister<C> for P {
    fn is_new(&self, entity: &C) -> bool {
        self.entity_is_new(entity)
    }

    fn identifier(&self, entity: &C) -> Identifier {
        self.entity_id(entity)
    }

    async fn insert(&self, entities: &mut [&mut C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let span = info_span!("orm.persister.insert", table = %self.table(), entities = entities.len());
        async {
            self.listeners().before_insert(&views(entities));
            let result = self.insert_entities(entities).await;
            let count = report(self.listeners(), PersistOperation::Insert, result)?;
            self.listeners().after_insert(&views(entities));
            Ok(count)
        }
        .instrument(span)
        .await
    }

    async fn update<'a>(&self, pairs: &mut [Duo<'a, C>], all_columns: bool) -> Result<u64> {
        let changed: Vec<usize> = pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| self.has_changes(&*pair.modified, pair.unmodified))
            .map(|(idx, _)| idx)
            .collect();
        if changed.is_empty() {
            return Ok(0);
        }
        let span = info_span!("orm.persister.update", table = %self.table(), entities = changed.len());
        async {
            self.listeners().before_update(&touched(pairs, &changed));
            let result = self.update_entities(pairs, all_columns).await;
            let count = report(self.listeners(), PersistOperation::Update, result)?;
            self.listeners().after_update(&touched(pairs, &changed));
            Ok(count)
        }
        .instrument(span)
        .await
    }

    async fn update_by_id(&self, entities: &[&C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let span = info_span!("orm.persister.update_by_id", table = %self.table(), entities = entities.len());
        async {
            self.listeners().before_update_by_id(entities);
            let result = self.update_entities_by_id(entities).await;
            let count = report(self.listeners(), PersistOperation::UpdateById, result)?;
            self.listeners().after_update_by_id(entities);
            Ok(count)
        }
        .instrument(span)
        .await
    }

    async fn delete(&self, entities: &[&C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let span = info_span!("orm.persister.delete", table = %self.table(), entities = entities.len());
        async {
            self.listeners().before_delete(entities);
            let result = self.delete_entities(entities).await;
            let count = report(self.listeners(), PersistOperation::Delete, result)?;
            self.listeners().after_delete(entities);
            Ok(count)
        }
        .instrument(span)
        .await
    }

    async fn delete_by_id(&self, entities: &[&C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Identifier> = entities
            .iter()
            .map(|entity| self.entity_id(entity))
            .collect();
        let span = info_span!("orm.persister.delete_by_id", table = %self.table(), ids = ids.len());
        async {
            self.listeners().before_delete_by_id(&ids);
            let result = self.delete_entities_by_id(entities).await;
            let count = report(self.listeners(), PersistOperation::DeleteById, result)?;
            self.listeners().after_delete_by_id(&ids);
            Ok(count)
        }
        .instrument(span)
        .await
    }

    async fn delete_by_ids(&self, ids: Vec<Identifier>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let span = info_span!("orm.persister.delete_by_id", table = %self.table(), ids = ids.len());
        async {
            self.listeners().before_delete_by_id(&ids);
            let result = self.delete_ids(ids.clone()).await;
            let count = report(self.listeners(), PersistOperation::DeleteById, result)?;
            self.listeners().after_delete_by_id(&ids);
            Ok(count)
        }
        .instrument(span)
        .await
    }

    async fn select_with_context(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let span = info_span!(
            "orm.persister.select",
            table = %self.table(),
            ids = ids.len(),
            depth = ctx.depth()
        );
        async {
            self.listeners().before_select(&ids);
            let result = self.select_entities(ids, ctx).await;
            let entities = report(self.listeners(), PersistOperation::Select, result)?;
            self.listeners().after_select(&entities);
            Ok(entities)
        }
        .instrument(span)
        .await
    }

    async fn select(&self, ids: Vec<Identifier>) -> Result<Vec<C>> {
        let mut ctx = LoadContext::new();
        self.select_with_context(ids, &mut ctx).await
    }

    async fn persist(&self, entities: &mut [&mut C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        let span = info_span!("orm.persister.persist", table = %self.table(), entities = entities.len());
        async {
            self.listeners().before_persist(&views(entities));
            let result = persist_entities(self, entities).await;
            let count = report(self.listeners(), PersistOperation::Persist, result)?;
            self.listeners().after_persist(&views(entities));
            Ok(count)
        }
        .instrument(span)
        .await
    }
}

async fn persist_entities<C: Entity, P: PersisterCore<C>>(
    persister: &P,
    entities: &mut [&mut C],
) -> Result<u64> {
    let existing: Vec<Identifier> = entities
        .iter()
        .filter(|entity| !persister.entity_is_new(entity))
        .map(|entity| persister.entity_id(entity))
        .collect();

    let snapshots: HashMap<Identifier, C> = if existing.is_empty() {
        HashMap::new()
    } else {
        let loaded = persister.reload_entities(existing.clone()).await?;
        loaded
            .into_iter()
            .map(|entity| (persister.entity_id(&entity), entity))
            .collect()
    };
    let missing = existing.iter().filter(|id| !snapshots.contains_key(id)).count();
    if missing > 0 {
        return Err(DbError::StaleState {
            expected: existing.len() as u64,
            actual: (existing.len() - missing) as u64,
            sql: format!("select from {} by id", persister.table()),
        });
    }

    let mut fresh: Vec<&mut C> = Vec::new();
    let mut pairs: Vec<Duo<'_, C>> = Vec::new();
    for entity in entities.iter_mut() {
        let entity: &mut C = entity;
        if persister.entity_is_new(entity) {
            fresh.push(entity);
            continue;
        }
        let id = persister.entity_id(entity);
        let snapshot = snapshots.get(&id).ok_or_else(|| {
            DbError::ExecutionError(format!("No stored state for {} in '{}'", id, persister.table()))
        })?;
        pairs.push(Duo::new(entity, snapshot));
    }

    let mut total = persister.insert_entities(&mut fresh).await?;
    total += persister.update_entities(&mut pairs, false).await?;
    Ok(total)
}

/// Persister of a single-table entity with optional polymorphic relations.
pub struct SimplePersister<C> {
    mapping: Arc<EntityMapping<C>>,
    lock: Arc<OptimisticLockManager<C>>,
    inserter: InsertExecutor<C>,
    updater: UpdateExecutor<C>,
    deleter: DeleteExecutor<C>,
    selector: SelectExecutor<C>,
    listeners: ListenerCollection<C>,
    relations: Vec<Arc<dyn RelationLoader<C>>>,
}

impl<C: Entity> SimplePersister<C> {
    /// # Errors
    /// `ConfigError` for an invalid config, `UnsupportedOperation` when the
    /// mapping is versioned but `provider` cannot observe rollbacks.
    pub fn new(
        mapping: EntityMapping<C>,
        provider: Arc<dyn ConnectionProvider>,
        config: PersisterConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mapping = Arc::new(mapping);
        let lock = Arc::new(OptimisticLockManager::configure(&mapping, provider.as_ref())?);

        Ok(Self {
            inserter: InsertExecutor::new(
                Arc::clone(&mapping),
                Arc::clone(&provider),
                config.clone(),
                Arc::clone(&lock),
            ),
            updater: UpdateExecutor::new(
                Arc::clone(&mapping),
                Arc::clone(&provider),
                config.clone(),
                Arc::clone(&lock),
            ),
            deleter: DeleteExecutor::new(
                Arc::clone(&mapping),
                Arc::clone(&provider),
                config.clone(),
                Arc::clone(&lock),
            ),
            selector: SelectExecutor::new(Arc::clone(&mapping), provider, config),
            mapping,
            lock,
            listeners: ListenerCollection::new(),
            relations: Vec::new(),
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn PersistListener<C>>) -> Self {
        self.listeners.add(listener);
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn PersistListener<C>>) {
        self.listeners.add(listener);
    }

    pub fn with_relation(mut self, relation: Arc<dyn RelationLoader<C>>) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn mapping(&self) -> &EntityMapping<C> {
        &self.mapping
    }

    pub fn is_versioned(&self) -> bool {
        self.lock.is_active()
    }

    /// Number of differential update statements currently cached.
    pub fn cached_update_statements(&self) -> usize {
        self.updater.cached_operations()
    }

    /// Validated payloads of a differential update, nothing executed yet.
    /// `forced` pairs get at least a version bump.
    pub(crate) fn plan_update(
        &self,
        pairs: &[Duo<'_, C>],
        all_columns: bool,
        forced: &[bool],
    ) -> Result<UpdatePlan> {
        self.updater.plan(pairs, all_columns, forced)
    }

    pub(crate) async fn execute_update(&self, pairs: &mut [Duo<'_, C>], plan: UpdatePlan) -> Result<u64> {
        self.updater.execute(pairs, plan).await
    }

    /// Keyed select; without a context the relation loads are skipped.
    pub(crate) async fn fetch(&self, ids: Vec<Identifier>, ctx: Option<&mut LoadContext>) -> Result<Vec<C>> {
        match ctx {
            Some(ctx) => self.selector.select(ids, &self.relations, ctx).await,
            None => self.selector.select(ids, &[], &mut LoadContext::new()).await,
        }
    }
}

#[async_trait]
impl<C: Entity> PersisterCore<C> for SimplePersister<C> {
    fn table(&self) -> &str {
        self.mapping.table()
    }

    fn listeners(&self) -> &ListenerCollection<C> {
        &self.listeners
    }

    fn entity_id(&self, entity: &C) -> Identifier {
        self.mapping.identifier(entity)
    }

    fn entity_is_new(&self, entity: &C) -> bool {
        self.mapping.is_new(entity)
    }

    fn has_changes(&self, modified: &C, unmodified: &C) -> bool {
        !self.mapping.changed_properties(modified, unmodified).is_empty()
    }

    async fn insert_entities(&self, entities: &mut [&mut C]) -> Result<u64> {
        self.inserter.execute(entities).await
    }

    async fn update_entities<'a>(&self, pairs: &mut [Duo<'a, C>], all_columns: bool) -> Result<u64> {
        self.updater.update(pairs, all_columns).await
    }

    async fn update_entities_by_id(&self, entities: &[&C]) -> Result<u64> {
        self.updater.update_by_id(entities).await
    }

    async fn delete_entities(&self, entities: &[&C]) -> Result<u64> {
        self.deleter.delete(entities).await
    }

    async fn delete_ids(&self, ids: Vec<Identifier>) -> Result<u64> {
        self.deleter.delete_by_ids(ids).await
    }

    async fn select_entities(&self, ids: Vec<Identifier>, ctx: &mut LoadContext) -> Result<Vec<C>> {
        self.fetch(ids, Some(ctx)).await
    }

    async fn reload_entities(&self, ids: Vec<Identifier>) -> Result<Vec<C>> {
        self.fetch(ids, None).await
    }
}
