use crate::connection::PreparedOperation;
use crate::core::{DbError, Result};
use crate::result::ResultRow;
use crate::sql::Bindings;

/// Counts entities added to the current window.
#[derive(Debug, Clone)]
pub struct StepCounter {
    batch_size: usize,
    steps: usize,
}

impl StepCounter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            steps: 0,
        }
    }

    /// Records one step; true when the window is full, which resets it.
    pub fn tick(&mut self) -> bool {
        self.steps += 1;
        if self.steps >= self.batch_size {
            self.steps = 0;
            return true;
        }
        false
    }

    pub fn pending(&self) -> usize {
        self.steps
    }
}

/// Compares the affected-row total with the number of rows written.
pub fn verify_row_count(expected: u64, counts: &[u64], sql: &str, enabled: bool) -> Result<()> {
    let actual: u64 = counts.iter().sum();
    if enabled && actual != expected {
        return Err(DbError::StaleState {
            expected,
            actual,
            sql: sql.to_string(),
        });
    }
    Ok(())
}

/// Store failures come back wrapped with the statement text.
pub async fn execute_batch(stmt: &mut dyn PreparedOperation) -> Result<Vec<u64>> {
    match stmt.execute_batch().await {
        Ok(counts) => Ok(counts),
        Err(err) => Err(DbError::statement(stmt.sql(), err)),
    }
}

pub async fn execute_update(stmt: &mut dyn PreparedOperation, bindings: Bindings) -> Result<u64> {
    match stmt.execute_update(bindings).await {
        Ok(count) => Ok(count),
        Err(err) => Err(DbError::statement(stmt.sql(), err)),
    }
}

pub async fn execute_query(
    stmt: &mut dyn PreparedOperation,
    bindings: Bindings,
) -> Result<Vec<ResultRow>> {
    match stmt.execute_query(bindings).await {
        Ok(rows) => Ok(rows),
        Err(err) => Err(DbError::statement(stmt.sql(), err)),
    }
}

pub fn add_batch(stmt: &mut dyn PreparedOperation, bindings: Bindings) -> Result<()> {
    match stmt.add_batch(bindings) {
        Ok(()) => Ok(()),
        Err(err) => Err(DbError::statement(stmt.sql(), err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_counter_resets_on_full_window() {
        let mut counter = StepCounter::new(3);
        let flushes: Vec<bool> = (0..7).map(|_| counter.tick()).collect();
        assert_eq!(flushes, vec![false, false, true, false, false, true, false]);
        assert_eq!(counter.pending(), 1);
    }

    #[test]
    fn test_row_count_mismatch() {
        let err = verify_row_count(3, &[1, 1, 0], "delete from t where id = ?", true).unwrap_err();
        match err {
            DbError::StaleState {
                expected, actual, ..
            } => assert_eq!((expected, actual), (3, 2)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(verify_row_count(3, &[1], "x", false).is_ok());
    }
}
