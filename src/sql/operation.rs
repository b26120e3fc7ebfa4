// ============================================================================
// Operation descriptors
// ============================================================================
//
// Structural description of every statement the engine issues. The row
// store executes operations structurally; the rendered SQL text is the
// statement identity used for diagnostics and the execution log.
//
// Parameter order (positional bindings):
// - insert:        columns
// - update:        set columns, then predicate columns
// - delete:        predicate columns
// - keyed delete:  key tuples, row-major
// - select:        key tuples, row-major
//
// ============================================================================

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub name: String,
    pub alias: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Alias of the table the column belongs to.
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    /// Equality pairs: (column of an already joined alias, column of `table`).
    pub on: Vec<(ColumnRef, ColumnRef)>,
}

impl Join {
    pub fn new(kind: JoinKind, table: TableRef, on: Vec<(ColumnRef, ColumnRef)>) -> Self {
        Self { kind, table, on }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Projection {
    pub column: ColumnRef,
    pub alias: String,
}

impl Projection {
    /// Projects `table.column` as `table_column`.
    pub fn of(table: &str, column: &str) -> Self {
        Self {
            column: ColumnRef::new(table, column),
            alias: column_alias(table, column),
        }
    }
}

pub fn column_alias(table_alias: &str, column: &str) -> String {
    format!("{}_{}", table_alias, column)
}

/// `(c1, c2) in ((?, ?), ...)` restriction with `key_count` tuples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyFilter {
    pub columns: Vec<ColumnRef>,
    pub key_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsertOperation {
    pub table: String,
    pub columns: Vec<String>,
    /// Column left to the store to generate, if any.
    pub generated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateOperation {
    pub table: String,
    pub set: Vec<String>,
    pub predicate: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteOperation {
    pub table: String,
    pub predicate: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyedDeleteOperation {
    pub table: String,
    pub key_columns: Vec<String>,
    pub key_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectOperation {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub projection: Vec<Projection>,
    pub filter: KeyFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert(InsertOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
    DeleteByKeys(KeyedDeleteOperation),
    Select(SelectOperation),
}

impl Operation {
    pub fn sql(&self) -> String {
        self.to_string()
    }

    pub fn table(&self) -> &str {
        match self {
            Operation::Insert(op) => &op.table,
            Operation::Update(op) => &op.table,
            Operation::Delete(op) => &op.table,
            Operation::DeleteByKeys(op) => &op.table,
            Operation::Select(op) => &op.from.name,
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Operation::Insert(op) => op.columns.len(),
            Operation::Update(op) => op.set.len() + op.predicate.len(),
            Operation::Delete(op) => op.predicate.len(),
            Operation::DeleteByKeys(op) => op.key_columns.len() * op.key_count,
            Operation::Select(op) => op.filter.columns.len() * op.filter.key_count,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Operation::Select(_))
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn equalities<S: fmt::Display>(columns: &[S], separator: &str) -> String {
    columns
        .iter()
        .map(|col| format!("{} = ?", col))
        .collect::<Vec<_>>()
        .join(separator)
}

/// `id = ?`, `id in (?, ?)`, `a = ? and b = ?` or `(a, b) in ((?, ?), (?, ?))`.
fn key_predicate<S: fmt::Display>(columns: &[S], key_count: usize) -> String {
    if key_count == 1 {
        return equalities(columns, " and ");
    }
    if columns.len() == 1 {
        return format!("{} in ({})", columns[0], placeholders(key_count));
    }
    let tuple = format!("({})", placeholders(columns.len()));
    let names = columns
        .iter()
        .map(|col| col.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({}) in ({})", names, vec![tuple; key_count].join(", "))
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert(op) => write!(
                f,
                "insert into {}({}) values ({})",
                op.table,
                op.columns.join(", "),
                placeholders(op.columns.len())
            ),
            Operation::Update(op) => write!(
                f,
                "update {} set {} where {}",
                op.table,
                equalities(&op.set, ", "),
                equalities(&op.predicate, " and ")
            ),
            Operation::Delete(op) => write!(
                f,
                "delete from {} where {}",
                op.table,
                equalities(&op.predicate, " and ")
            ),
            Operation::DeleteByKeys(op) => write!(
                f,
                "delete from {} where {}",
                op.table,
                key_predicate(&op.key_columns, op.key_count)
            ),
            Operation::Select(op) => {
                let projection = op
                    .projection
                    .iter()
                    .map(|p| format!("{} as {}", p.column, p.alias))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "select {} from {} {}",
                    projection, op.from.name, op.from.alias
                )?;
                for join in &op.joins {
                    let kind = match join.kind {
                        JoinKind::Inner => "inner join",
                        JoinKind::LeftOuter => "left outer join",
                    };
                    let on = join
                        .on
                        .iter()
                        .map(|(left, right)| format!("{} = {}", left, right))
                        .collect::<Vec<_>>()
                        .join(" and ");
                    write!(
                        f,
                        " {} {} {} on {}",
                        kind, join.table.name, join.table.alias, on
                    )?;
                }
                write!(
                    f,
                    " where {}",
                    key_predicate(&op.filter.columns, op.filter.key_count)
                )
            }
        }
    }
}
