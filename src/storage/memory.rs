use super::{RowKey, Table, TableSchema};
use crate::core::{DbError, Result, Row, Value};
use crate::result::ResultRow;
use crate::sql::{
    Bindings, ColumnRef, DeleteOperation, JoinKind, KeyedDeleteOperation, Operation,
    SelectOperation, UpdateOperation,
};
use crate::transaction::Change;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// One `execute` call against the store, as seen by the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    /// One entry per batched parameter set.
    pub bindings: Vec<Bindings>,
    pub affected: Vec<u64>,
}

impl ExecutedStatement {
    pub fn total_affected(&self) -> u64 {
        self.affected.iter().sum()
    }
}

/// Outcome of applying one parameter set.
#[derive(Debug, Default)]
pub struct Applied {
    pub affected: u64,
    pub generated: Option<Value>,
    pub rows: Vec<ResultRow>,
    pub changes: Vec<Change>,
}

/// Keyed in-memory row store executing [`Operation`] descriptors.
pub struct MemoryStore {
    /// Tables with individual locks
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    log: Mutex<Vec<ExecutedStatement>>,
    prepared: AtomicU64,
    closed: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            prepared: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        let mut tables = self.tables.write().await;
        if tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }
        tables.insert(name, Arc::new(RwLock::new(Table::new(schema)?)));
        Ok(())
    }

    pub async fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    /// All rows of `table` in key order.
    pub async fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.rows().cloned().collect())
    }

    pub async fn row(&self, table: &str, key: &RowKey) -> Result<Option<Row>> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.get(key).cloned())
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.row_count())
    }

    /// Applies one parameter set of `operation`.
    pub async fn apply(&self, operation: &Operation, bindings: &[Value]) -> Result<Applied> {
        if bindings.len() != operation.parameter_count() {
            return Err(DbError::InvalidArgument(format!(
                "Operation expects {} parameter(s), got {}",
                operation.parameter_count(),
                bindings.len()
            )));
        }

        match operation {
            Operation::Insert(op) => {
                let handle = self.get_table(&op.table).await?;
                let mut table = handle.write().await;
                let (key, generated) = table.insert(&op.columns, bindings)?;
                Ok(Applied {
                    affected: 1,
                    generated,
                    rows: Vec::new(),
                    changes: vec![Change::InsertRow {
                        table: op.table.clone(),
                        key,
                    }],
                })
            }
            Operation::Update(op) => self.apply_update(op, bindings).await,
            Operation::Delete(op) => self.apply_delete(op, bindings).await,
            Operation::DeleteByKeys(op) => self.apply_keyed_delete(op, bindings).await,
            Operation::Select(op) => Ok(Applied {
                rows: self.apply_select(op, bindings).await?,
                ..Applied::default()
            }),
        }
    }

    async fn apply_update(&self, op: &UpdateOperation, bindings: &[Value]) -> Result<Applied> {
        let handle = self.get_table(&op.table).await?;
        let mut table = handle.write().await;

        let (set_values, predicate_values) = bindings.split_at(op.set.len());
        let set = op
            .set
            .iter()
            .zip(set_values)
            .map(|(column, value)| Ok((table.column_index(column)?, value.clone())))
            .collect::<Result<Vec<_>>>()?;
        let predicate = Self::column_indexes(&table, &op.predicate)?;

        let mut applied = Applied::default();
        for key in table.matching_keys(&predicate, predicate_values) {
            if let Some(old_row) = table.update(&key, &set)? {
                applied.changes.push(Change::UpdateRow {
                    table: op.table.clone(),
                    key,
                    old_row,
                });
                applied.affected += 1;
            }
        }
        Ok(applied)
    }

    async fn apply_delete(&self, op: &DeleteOperation, bindings: &[Value]) -> Result<Applied> {
        let handle = self.get_table(&op.table).await?;
        let mut table = handle.write().await;
        let predicate = Self::column_indexes(&table, &op.predicate)?;

        let mut applied = Applied::default();
        for key in table.matching_keys(&predicate, bindings) {
            Self::remove_row(&mut table, &op.table, key, &mut applied);
        }
        Ok(applied)
    }

    async fn apply_keyed_delete(
        &self,
        op: &KeyedDeleteOperation,
        bindings: &[Value],
    ) -> Result<Applied> {
        if op.key_columns.is_empty() {
            return Err(DbError::InvalidArgument(
                "Keyed delete requires at least one key column".into(),
            ));
        }
        let handle = self.get_table(&op.table).await?;
        let mut table = handle.write().await;
        let columns = Self::column_indexes(&table, &op.key_columns)?;

        let mut applied = Applied::default();
        for tuple in bindings.chunks(op.key_columns.len()) {
            for key in table.matching_keys(&columns, tuple) {
                Self::remove_row(&mut table, &op.table, key, &mut applied);
            }
        }
        Ok(applied)
    }

    fn remove_row(table: &mut Table, name: &str, key: RowKey, applied: &mut Applied) {
        if let Some(old_row) = table.remove(&key) {
            applied.changes.push(Change::DeleteRow {
                table: name.to_string(),
                key,
                old_row,
            });
            applied.affected += 1;
        }
    }

    fn column_indexes(table: &Table, columns: &[String]) -> Result<Vec<usize>> {
        columns.iter().map(|col| table.column_index(col)).collect()
    }

    /// Joins, restricts to the bound key tuples and projects by alias.
    async fn apply_select(&self, op: &SelectOperation, bindings: &[Value]) -> Result<Vec<ResultRow>> {
        let width = op.filter.columns.len();
        if width == 0 {
            return Err(DbError::InvalidArgument(
                "Keyed select requires at least one key column".into(),
            ));
        }
        let keys: HashSet<&[Value]> = bindings.chunks(width).collect();

        let aliases: Vec<(&str, &str)> = std::iter::once(&op.from)
            .chain(op.joins.iter().map(|join| &join.table))
            .map(|table| (table.alias.as_str(), table.name.as_str()))
            .collect();
        let mut handles: BTreeMap<&str, Arc<RwLock<Table>>> = BTreeMap::new();
        for (_, name) in &aliases {
            if !handles.contains_key(name) {
                handles.insert(*name, self.get_table(name).await?);
            }
        }
        // A self-join shares one guard; a second read behind a queued
        // writer would never be granted.
        let mut guards = BTreeMap::new();
        for (name, handle) in &handles {
            guards.insert(*name, handle.read().await);
        }
        let tables: HashMap<&str, &Table> = aliases
            .iter()
            .map(|(alias, name)| (*alias, &*guards[name]))
            .collect();

        let root = tables[op.from.alias.as_str()];
        let mut tuples: Vec<HashMap<&str, Option<&Row>>> = root
            .rows()
            .map(|row| HashMap::from([(op.from.alias.as_str(), Some(row))]))
            .collect();

        for join in &op.joins {
            let alias = join.table.alias.as_str();
            let joined = tables[alias];
            let right = join
                .on
                .iter()
                .map(|(_, right)| joined.column_index(&right.column))
                .collect::<Result<Vec<_>>>()?;

            let mut next = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                let left = join
                    .on
                    .iter()
                    .map(|(left, _)| Self::value_at(&tables, &tuple, left))
                    .collect::<Result<Vec<_>>>()?;
                let matches: Vec<&Row> = if left.iter().any(Value::is_null) {
                    Vec::new()
                } else {
                    joined
                        .rows()
                        .filter(|row| right.iter().zip(&left).all(|(idx, v)| &row[*idx] == v))
                        .collect()
                };

                if matches.is_empty() {
                    if join.kind == JoinKind::LeftOuter {
                        let mut extended = tuple.clone();
                        extended.insert(alias, None);
                        next.push(extended);
                    }
                    continue;
                }
                for row in matches {
                    let mut extended = tuple.clone();
                    extended.insert(alias, Some(row));
                    next.push(extended);
                }
            }
            tuples = next;
        }

        let mut rows = Vec::new();
        for tuple in &tuples {
            let key = op
                .filter
                .columns
                .iter()
                .map(|col| Self::value_at(&tables, tuple, col))
                .collect::<Result<Vec<_>>>()?;
            if key.iter().any(Value::is_null) || !keys.contains(key.as_slice()) {
                continue;
            }

            let mut row = ResultRow::new();
            for projection in &op.projection {
                row.insert(
                    projection.alias.clone(),
                    Self::value_at(&tables, tuple, &projection.column)?,
                );
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn value_at(
        tables: &HashMap<&str, &Table>,
        tuple: &HashMap<&str, Option<&Row>>,
        column: &ColumnRef,
    ) -> Result<Value> {
        let table = tables.get(column.table.as_str()).ok_or_else(|| {
            DbError::ExecutionError(format!("Unknown table alias '{}'", column.table))
        })?;
        let idx = table.column_index(&column.column)?;
        Ok(match tuple.get(column.table.as_str()) {
            Some(Some(row)) => row[idx].clone(),
            _ => Value::Null,
        })
    }

    /// Reverses one recorded change.
    pub async fn undo(&self, change: Change) -> Result<()> {
        let handle = self.get_table(change.table_name()).await?;
        let mut table = handle.write().await;
        match change {
            Change::InsertRow { key, .. } => {
                table.remove(&key);
            }
            Change::UpdateRow { key, old_row, .. } | Change::DeleteRow { key, old_row, .. } => {
                table.restore(key, old_row);
            }
        }
        Ok(())
    }

    pub fn record(&self, statement: ExecutedStatement) {
        match self.log.lock() {
            Ok(mut log) => log.push(statement),
            Err(poisoned) => poisoned.into_inner().push(statement),
        }
    }

    /// Execution log, oldest first.
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear_statements(&self) {
        match self.log.lock() {
            Ok(mut log) => log.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub(crate) fn statement_prepared(&self) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn statement_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn prepared_count(&self) -> u64 {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}
