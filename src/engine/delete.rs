use super::batch::{self, StepCounter};
use super::chunk::Chunks;
use super::lock::OptimisticLockManager;
use super::select::key_bindings;
use crate::config::PersisterConfig;
use crate::connection::ConnectionProvider;
use crate::core::Result;
use crate::mapping::{EntityMapping, Identifier, WritePayload};
use crate::sql::{DeleteOperation, KeyedDeleteOperation, Operation};
use log::debug;
use std::sync::Arc;

pub struct DeleteExecutor<C> {
    mapping: Arc<EntityMapping<C>>,
    provider: Arc<dyn ConnectionProvider>,
    config: PersisterConfig,
    lock: Arc<OptimisticLockManager<C>>,
}

impl<C> DeleteExecutor<C> {
    pub fn new(
        mapping: Arc<EntityMapping<C>>,
        provider: Arc<dyn ConnectionProvider>,
        config: PersisterConfig,
        lock: Arc<OptimisticLockManager<C>>,
    ) -> Self {
        Self {
            mapping,
            provider,
            config,
            lock,
        }
    }

    /// Deletes by identifier and, when versioned, by version.
    ///
    /// The affected-row total is compared with the entity count once every
    /// window has run; rows already deleted stay deleted on mismatch.
    pub async fn delete(&self, entities: &[&C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }

        let mut predicate = self.mapping.id_columns();
        if let Some(version) = self.lock.version_column() {
            predicate.push(version.to_string());
        }
        let operation = Operation::Delete(DeleteOperation {
            table: self.mapping.table().to_string(),
            predicate: predicate.clone(),
        });

        let conn = self.provider.connection().await?;
        let mut stmt = conn.prepare(&operation)?;
        let mut counter = StepCounter::new(self.config.batch_size);
        let mut counts = Vec::with_capacity(entities.len());

        for entity in entities {
            let mut payload = WritePayload::new();
            self.mapping.restrict_by_id(entity, &mut payload)?;
            self.lock.manage_delete(entity, &mut payload);
            batch::add_batch(stmt.as_mut(), payload.bindings_for(&[], &predicate))?;
            if counter.tick() {
                counts.extend(batch::execute_batch(stmt.as_mut()).await?);
            }
        }
        if stmt.pending() > 0 {
            counts.extend(batch::execute_batch(stmt.as_mut()).await?);
        }

        batch::verify_row_count(
            entities.len() as u64,
            &counts,
            stmt.sql(),
            self.config.row_count_check,
        )?;
        Ok(counts.iter().sum())
    }

    /// Deletes by identifier only, ignoring versions and row counts.
    ///
    /// Full windows share one batched `in (...)` statement; the trailing
    /// smaller window runs once through its own right-sized statement.
    pub async fn delete_by_ids(&self, ids: Vec<Identifier>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let max_keys = self.config.max_keys_per_operation;
        let chunks = Chunks::split(ids, max_keys)?;
        let conn = self.provider.connection().await?;
        let mut total = 0;

        if !chunks.full.is_empty() {
            let mut stmt = conn.prepare(&self.operation(max_keys))?;
            let mut counter = StepCounter::new(self.config.batch_size);
            for window in &chunks.full {
                let bindings = key_bindings(self.mapping.assembler(), window)?;
                batch::add_batch(stmt.as_mut(), bindings)?;
                if counter.tick() {
                    total += batch::execute_batch(stmt.as_mut()).await?.iter().sum::<u64>();
                }
            }
            if stmt.pending() > 0 {
                total += batch::execute_batch(stmt.as_mut()).await?.iter().sum::<u64>();
            }
        }

        if let Some(rest) = &chunks.remainder {
            let mut stmt = conn.prepare(&self.operation(rest.len()))?;
            let bindings = key_bindings(self.mapping.assembler(), rest)?;
            total += batch::execute_update(stmt.as_mut(), bindings).await?;
        }

        debug!(
            "Deleted {} row(s) from '{}' in {} window(s)",
            total,
            self.mapping.table(),
            chunks.window_count()
        );
        Ok(total)
    }

    pub async fn delete_by_id(&self, entities: &[&C]) -> Result<u64> {
        let ids = entities
            .iter()
            .map(|entity| self.mapping.identifier(entity))
            .collect();
        self.delete_by_ids(ids).await
    }

    fn operation(&self, key_count: usize) -> Operation {
        Operation::DeleteByKeys(KeyedDeleteOperation {
            table: self.mapping.table().to_string(),
            key_columns: self.mapping.id_columns(),
            key_count,
        })
    }
}
