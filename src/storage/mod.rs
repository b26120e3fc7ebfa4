pub mod memory;
pub mod table;

pub use memory::{Applied, ExecutedStatement, MemoryStore};
pub use table::{RowKey, Table, TableSchema};
