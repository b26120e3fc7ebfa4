// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Command Pattern for reversible row changes. Each Change carries what is
// needed to put the row store back as it was; rollback applies them in
// reverse order.
//
// ============================================================================

use crate::core::Row;
use crate::storage::RowKey;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A row was inserted under `key`.
    InsertRow { table: String, key: RowKey },

    /// The row under `key` was overwritten; `old_row` is its previous image.
    UpdateRow {
        table: String,
        key: RowKey,
        old_row: Row,
    },

    /// The row under `key` was removed.
    DeleteRow {
        table: String,
        key: RowKey,
        old_row: Row,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn key(&self) -> &RowKey {
        match self {
            Change::InsertRow { key, .. } => key,
            Change::UpdateRow { key, .. } => key,
            Change::DeleteRow { key, .. } => key,
        }
    }
}
