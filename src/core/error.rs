use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A non-nullable column would have been bound to NULL.
    #[error("Binding error: column '{column}' cannot be NULL for entity {entity}")]
    Binding { column: String, entity: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The number of affected rows differs from the number of rows written.
    #[error("Stale state: expected {expected} row(s) to be affected by '{sql}', actual {actual}")]
    StaleState {
        expected: u64,
        actual: u64,
        sql: String,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Row-store failure, wrapped with the text of the failing operation.
    #[error("Failed to execute '{sql}': {source}")]
    Statement {
        sql: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    pub fn statement(sql: impl Into<String>, source: DbError) -> Self {
        Self::Statement {
            sql: sql.into(),
            source: Box::new(source),
        }
    }

    pub fn is_stale_state(&self) -> bool {
        matches!(self, Self::StaleState { .. })
    }

    pub fn is_binding(&self) -> bool {
        matches!(self, Self::Binding { .. })
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
