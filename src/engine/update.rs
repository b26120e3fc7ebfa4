use super::batch::{self, StepCounter};
use super::lock::OptimisticLockManager;
use crate::config::PersisterConfig;
use crate::connection::{ConnectionProvider, PreparedOperation};
use crate::core::{DbError, Result};
use crate::mapping::{EntityMapping, WritePayload};
use crate::sql::{Operation, UpdateOperation};
use log::debug;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// A modified entity and the snapshot it is compared against.
pub struct Duo<'a, C> {
    pub modified: &'a mut C,
    pub unmodified: &'a C,
}

impl<'a, C> Duo<'a, C> {
    pub fn new(modified: &'a mut C, unmodified: &'a C) -> Self {
        Self {
            modified,
            unmodified,
        }
    }
}

/// SET columns and WHERE columns of an update statement.
type UpdateShape = (Vec<String>, Vec<String>);

/// Payloads to write, each tagged with the index of its pair.
pub type UpdatePlan = Vec<(usize, WritePayload)>;

pub struct UpdateExecutor<C> {
    mapping: Arc<EntityMapping<C>>,
    provider: Arc<dyn ConnectionProvider>,
    config: PersisterConfig,
    lock: Arc<OptimisticLockManager<C>>,
    operations: Mutex<LruCache<UpdateShape, Arc<Operation>>>,
}

impl<C: std::fmt::Debug> UpdateExecutor<C> {
    pub fn new(
        mapping: Arc<EntityMapping<C>>,
        provider: Arc<dyn ConnectionProvider>,
        config: PersisterConfig,
        lock: Arc<OptimisticLockManager<C>>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.statement_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            mapping,
            provider,
            config,
            lock,
            operations: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Full-column update keyed by identifier only.
    pub async fn update_by_id(&self, entities: &[&C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        if !self.mapping.has_updatable_properties() {
            debug!("'{}' has no updatable columns", self.mapping.table());
            return Ok(0);
        }

        let set: Vec<String> = self
            .mapping
            .properties()
            .iter()
            .filter(|p| p.is_updatable())
            .map(|p| p.name().to_string())
            .collect();
        let predicate = self.mapping.id_columns();
        let operation = Operation::Update(UpdateOperation {
            table: self.mapping.table().to_string(),
            set: set.clone(),
            predicate: predicate.clone(),
        });

        let conn = self.provider.connection().await?;
        let mut stmt = conn.prepare(&operation)?;
        let mut counter = StepCounter::new(self.config.batch_size);
        let mut total = 0;

        for entity in entities {
            let payload = self.mapping.update_payload(entity)?;
            if let Some(column) = payload.null_violation(|col| self.mapping.is_required(col)) {
                return Err(DbError::Binding {
                    column: column.to_string(),
                    entity: format!("{:?}", entity),
                });
            }
            batch::add_batch(stmt.as_mut(), payload.bindings_for(&set, &predicate))?;
            if counter.tick() {
                total += self.flush(stmt.as_mut()).await?;
            }
        }
        total += self.flush(stmt.as_mut()).await?;
        Ok(total)
    }

    /// Builds one payload per pair with changes, validating all of them.
    ///
    /// `forced` pairs are kept even without changed columns so the lock
    /// manager can issue a version-only update.
    pub fn plan(&self, pairs: &[Duo<'_, C>], all_columns: bool, forced: &[bool]) -> Result<UpdatePlan> {
        let mut plan = Vec::new();
        for (idx, pair) in pairs.iter().enumerate() {
            let modified: &C = &*pair.modified;
            let changed = self.mapping.changed_properties(modified, pair.unmodified);
            let force = forced.get(idx).copied().unwrap_or(false) && self.lock.is_active();
            if changed.is_empty() && !force {
                continue;
            }

            let mut payload = WritePayload::new();
            if all_columns {
                for property in self.mapping.properties().iter().filter(|p| p.is_updatable()) {
                    payload.set(property.name(), property.get(modified));
                }
            } else {
                for property in changed {
                    payload.set(property.name(), property.get(modified));
                }
            }
            self.mapping.restrict_by_id(modified, &mut payload)?;
            plan.push((idx, payload));
        }

        for (idx, payload) in &plan {
            if let Some(column) = payload.null_violation(|col| self.mapping.is_required(col)) {
                return Err(DbError::InvalidArgument(format!(
                    "Column '{}' of '{}' cannot be set to NULL for entity {:?}",
                    column,
                    self.mapping.table(),
                    pairs[*idx].modified
                )));
            }
        }

        let skipped = pairs.len() - plan.len();
        if skipped > 0 {
            debug!(
                "Skipping {} unchanged entit(ies) of '{}'",
                skipped,
                self.mapping.table()
            );
        }
        Ok(plan)
    }

    /// Differential update of the pairs with changes.
    pub async fn update(&self, pairs: &mut [Duo<'_, C>], all_columns: bool) -> Result<u64> {
        self.update_forced(pairs, all_columns, &[]).await
    }

    pub async fn update_forced(
        &self,
        pairs: &mut [Duo<'_, C>],
        all_columns: bool,
        forced: &[bool],
    ) -> Result<u64> {
        let plan = self.plan(pairs, all_columns, forced)?;
        self.execute(pairs, plan).await
    }

    /// Executes a plan, grouping payloads by statement shape.
    pub async fn execute(&self, pairs: &mut [Duo<'_, C>], plan: UpdatePlan) -> Result<u64> {
        if plan.is_empty() {
            return Ok(0);
        }

        let conn = self.provider.connection().await?;
        let mut statements: Vec<(UpdateShape, Box<dyn PreparedOperation>)> = Vec::new();
        let mut counter = StepCounter::new(self.config.batch_size);
        let mut total = 0;

        for (idx, mut payload) in plan {
            self.lock.manage_update(&*pairs[idx].modified, &mut payload)?;
            let shape = (payload.set_columns(), payload.predicate_columns());
            if shape.0.is_empty() {
                continue;
            }

            let pos = match statements.iter().position(|(known, _)| *known == shape) {
                Some(pos) => pos,
                None => {
                    let operation = self.operation(&shape)?;
                    statements.push((shape, conn.prepare(&operation)?));
                    statements.len() - 1
                }
            };
            let ((set, predicate), stmt) = &mut statements[pos];
            batch::add_batch(stmt.as_mut(), payload.bindings_for(set, predicate))?;

            if counter.tick() {
                total += self.flush_all(&mut statements).await?;
            }
        }
        total += self.flush_all(&mut statements).await?;
        Ok(total)
    }

    fn operation(&self, shape: &UpdateShape) -> Result<Arc<Operation>> {
        let mut cache = self.operations.lock()?;
        if let Some(operation) = cache.get(shape) {
            return Ok(Arc::clone(operation));
        }
        let operation = Arc::new(Operation::Update(UpdateOperation {
            table: self.mapping.table().to_string(),
            set: shape.0.clone(),
            predicate: shape.1.clone(),
        }));
        cache.put(shape.clone(), Arc::clone(&operation));
        Ok(operation)
    }

    /// Number of distinct statement shapes currently cached.
    pub fn cached_operations(&self) -> usize {
        self.operations.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    async fn flush_all(
        &self,
        statements: &mut [(UpdateShape, Box<dyn PreparedOperation>)],
    ) -> Result<u64> {
        let mut total = 0;
        for (_, stmt) in statements.iter_mut() {
            total += self.flush(stmt.as_mut()).await?;
        }
        Ok(total)
    }

    async fn flush(&self, stmt: &mut dyn PreparedOperation) -> Result<u64> {
        let expected = stmt.pending() as u64;
        if expected == 0 {
            return Ok(0);
        }
        let counts = batch::execute_batch(stmt).await?;
        batch::verify_row_count(expected, &counts, stmt.sql(), self.config.row_count_check)?;
        debug!("Flushed {} update(s): {}", expected, stmt.sql());
        Ok(counts.iter().sum())
    }
}
