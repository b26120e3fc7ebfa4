use super::{Connection, ConnectionProvider, PreparedOperation};
use crate::core::{DbError, Result, Value};
use crate::result::ResultRow;
use crate::sql::{Bindings, Operation};
use crate::storage::{ExecutedStatement, MemoryStore};
use crate::transaction::{Change, RollbackObserver, TransactionManager};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Connection provider over a shared [`MemoryStore`].
///
/// Built with [`MemoryConnectionProvider::autocommit`] connections apply
/// every statement immediately and expose no rollback observer.
pub struct MemoryConnectionProvider {
    store: Arc<MemoryStore>,
    transactions: Option<Arc<TransactionManager>>,
    opened: AtomicU64,
}

impl MemoryConnectionProvider {
    pub fn autocommit(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            transactions: None,
            opened: AtomicU64::new(0),
        }
    }

    pub fn transactional(manager: Arc<TransactionManager>) -> Self {
        Self {
            store: Arc::clone(manager.store()),
            transactions: Some(manager),
            opened: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn transactions(&self) -> Option<&Arc<TransactionManager>> {
        self.transactions.as_ref()
    }

    /// Connections handed out so far.
    pub fn connections_opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for MemoryConnectionProvider {
    async fn connection(&self) -> Result<Box<dyn Connection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
            transactions: self.transactions.clone(),
        }))
    }

    fn rollback_observer(&self) -> Option<Arc<dyn RollbackObserver>> {
        self.transactions
            .clone()
            .map(|manager| manager as Arc<dyn RollbackObserver>)
    }
}

pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    transactions: Option<Arc<TransactionManager>>,
}

impl Connection for MemoryConnection {
    fn prepare(&self, operation: &Operation) -> Result<Box<dyn PreparedOperation>> {
        Ok(Box::new(MemoryPreparedOperation::new(
            Arc::clone(&self.store),
            self.transactions.clone(),
            operation.clone(),
        )))
    }
}

pub struct MemoryPreparedOperation {
    store: Arc<MemoryStore>,
    transactions: Option<Arc<TransactionManager>>,
    operation: Operation,
    sql: String,
    batch: Vec<Bindings>,
    generated: Vec<Value>,
}

impl MemoryPreparedOperation {
    fn new(
        store: Arc<MemoryStore>,
        transactions: Option<Arc<TransactionManager>>,
        operation: Operation,
    ) -> Self {
        store.statement_prepared();
        Self {
            sql: operation.sql(),
            store,
            transactions,
            operation,
            batch: Vec::new(),
            generated: Vec::new(),
        }
    }

    fn check_arity(&self, bindings: &Bindings) -> Result<()> {
        let expected = self.operation.parameter_count();
        if bindings.len() != expected {
            return Err(DbError::InvalidArgument(format!(
                "'{}' expects {} parameter(s), got {}",
                self.sql,
                expected,
                bindings.len()
            )));
        }
        Ok(())
    }

    fn record_changes(&self, changes: Vec<Change>) -> Result<()> {
        match &self.transactions {
            Some(manager) => manager.record_changes(changes),
            None => Ok(()),
        }
    }

    async fn run(&mut self, bindings: &Bindings) -> Result<(u64, Vec<ResultRow>)> {
        let applied = self.store.apply(&self.operation, bindings).await?;
        self.record_changes(applied.changes)?;
        if let Some(generated) = applied.generated {
            self.generated.push(generated);
        }
        Ok((applied.affected, applied.rows))
    }
}

impl Drop for MemoryPreparedOperation {
    fn drop(&mut self) {
        self.store.statement_closed();
    }
}

#[async_trait]
impl PreparedOperation for MemoryPreparedOperation {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn add_batch(&mut self, bindings: Bindings) -> Result<()> {
        self.check_arity(&bindings)?;
        self.batch.push(bindings);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.batch.len()
    }

    async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        let batch = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(batch.len());
        for bindings in &batch {
            let (affected, _) = self.run(bindings).await?;
            counts.push(affected);
        }
        self.store.record(ExecutedStatement {
            sql: self.sql.clone(),
            bindings: batch,
            affected: counts.clone(),
        });
        Ok(counts)
    }

    async fn execute_update(&mut self, bindings: Bindings) -> Result<u64> {
        self.check_arity(&bindings)?;
        let (affected, _) = self.run(&bindings).await?;
        self.store.record(ExecutedStatement {
            sql: self.sql.clone(),
            bindings: vec![bindings],
            affected: vec![affected],
        });
        Ok(affected)
    }

    async fn execute_query(&mut self, bindings: Bindings) -> Result<Vec<ResultRow>> {
        if !self.operation.is_query() {
            return Err(DbError::InvalidArgument(format!(
                "'{}' does not return rows",
                self.sql
            )));
        }
        self.check_arity(&bindings)?;
        let (_, rows) = self.run(&bindings).await?;
        self.store.record(ExecutedStatement {
            sql: self.sql.clone(),
            bindings: vec![bindings],
            affected: vec![rows.len() as u64],
        });
        Ok(rows)
    }

    fn take_generated_keys(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.generated)
    }
}
