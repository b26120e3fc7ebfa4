pub mod operation;

pub use operation::{
    ColumnRef, DeleteOperation, InsertOperation, Join, JoinKind, KeyFilter, KeyedDeleteOperation,
    Operation, Projection, SelectOperation, TableRef, UpdateOperation, column_alias,
};

/// Positional parameter values for one execution of an operation.
pub type Bindings = Vec<crate::core::Value>;
