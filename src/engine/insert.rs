use super::batch::{self, StepCounter};
use super::lock::OptimisticLockManager;
use crate::config::PersisterConfig;
use crate::connection::{ConnectionProvider, PreparedOperation};
use crate::core::{DbError, Result};
use crate::mapping::{EntityMapping, IdentifierPolicy, WritePayload};
use crate::sql::{InsertOperation, Operation};
use log::debug;
use std::sync::Arc;

/// Batched insert of entities into one table.
pub struct InsertExecutor<C> {
    mapping: Arc<EntityMapping<C>>,
    provider: Arc<dyn ConnectionProvider>,
    config: PersisterConfig,
    lock: Arc<OptimisticLockManager<C>>,
}

impl<C: std::fmt::Debug> InsertExecutor<C> {
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

    /// Mapped insert columns followed by the version column.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.mapping.insert_columns();
        if let Some(version) = self.lock.version_column() {
            columns.push(version.to_string());
        }
        columns
    }

    pub fn operation(&self) -> Operation {
        Operation::Insert(InsertOperation {
            table: self.mapping.table().to_string(),
            columns: self.columns(),
            generated: self.mapping.generated_column(),
        })
    }

    /// Inserts `entities` in input order, flushing every `batch_size` rows.
    ///
    /// A failing entity aborts the call; windows flushed before it stay written.
    pub async fn execute(&self, entities: &mut [&mut C]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }

        let columns = self.columns();
        let conn = self.provider.connection().await?;
        let mut stmt = conn.prepare(&self.operation())?;
        let mut counter = StepCounter::new(self.config.batch_size);
        let mut window_start = 0;
        let mut total = 0;

        for idx in 0..entities.len() {
            let payload = self.payload(&mut *entities[idx])?;
            batch::add_batch(stmt.as_mut(), payload.bindings_for(&columns, &[]))?;

            if counter.tick() {
                total += self
                    .flush(stmt.as_mut(), &mut entities[window_start..=idx])
                    .await?;
                window_start = idx + 1;
            }
        }
        if window_start < entities.len() {
            total += self
                .flush(stmt.as_mut(), &mut entities[window_start..])
                .await?;
        }
        Ok(total)
    }

    fn payload(&self, entity: &mut C) -> Result<WritePayload> {
        if let IdentifierPolicy::BeforeInsert { generator, setter } = self.mapping.id_policy() {
            if self.mapping.identifier(entity).is_unset() {
                setter(entity, generator());
            }
        }

        let mut payload = self.mapping.insert_payload(entity)?;
        if let Some(column) = payload.null_violation(|col| self.mapping.is_required(col)) {
            return Err(DbError::Binding {
                column: column.to_string(),
                entity: format!("{:?}", entity),
            });
        }
        self.lock.manage_insert(entity, &mut payload)?;
        Ok(payload)
    }

    async fn flush(&self, stmt: &mut dyn PreparedOperation, window: &mut [&mut C]) -> Result<u64> {
        let expected = stmt.pending() as u64;
        let counts = batch::execute_batch(stmt).await?;
        batch::verify_row_count(expected, &counts, stmt.sql(), self.config.row_count_check)?;

        if let IdentifierPolicy::Generated { setter } = self.mapping.id_policy() {
            let keys = stmt.take_generated_keys();
            if keys.len() != window.len() {
                return Err(DbError::ExecutionError(format!(
                    "'{}' generated {} key(s) for {} row(s)",
                    stmt.sql(),
                    keys.len(),
                    window.len()
                )));
            }
            for (entity, key) in window.iter_mut().zip(keys) {
                setter(&mut **entity, key);
            }
        }

        debug!(
            "Flushed {} insert(s) into '{}'",
            window.len(),
            self.mapping.table()
        );
        Ok(counts.iter().sum())
    }
}
