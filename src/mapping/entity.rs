use super::{
    Identifier, IdentifierAssembler, IdentifierPolicy, PropertyMapping, RowView, VersionMapping,
    WritePayload,
};
use crate::core::{Column, DataType, DbError, Result, Value};
use crate::storage::TableSchema;
use std::fmt;
use std::sync::Arc;

/// Anything a persister can manage.
pub trait Entity: fmt::Debug + Send + Sync + 'static {}

impl<T: fmt::Debug + Send + Sync + 'static> Entity for T {}

pub type EntityReader<C> = Arc<dyn Fn(&RowView<'_>) -> Result<C> + Send + Sync>;

/// Table whose row shares the entity's primary key and contributes columns
/// on select (the root table of a joined-table subtype).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentTable {
    pub table: String,
    pub columns: Vec<String>,
}

/// Binding of an entity type to one table.
pub struct EntityMapping<C> {
    table: String,
    identifier: Arc<dyn IdentifierAssembler<C>>,
    id_policy: IdentifierPolicy<C>,
    properties: Vec<PropertyMapping<C>>,
    version: Option<VersionMapping<C>>,
    reader: EntityReader<C>,
    is_new: Option<Arc<dyn Fn(&C) -> bool + Send + Sync>>,
    parent: Option<ParentTable>,
    discriminator: Option<(String, Value)>,
}

impl<C> EntityMapping<C> {
    pub fn new<I, R>(table: impl Into<String>, identifier: I, reader: R) -> Self
    where
        I: IdentifierAssembler<C> + 'static,
        R: Fn(&RowView<'_>) -> Result<C> + Send + Sync + 'static,
    {
        Self {
            table: table.into(),
            identifier: Arc::new(identifier),
            id_policy: IdentifierPolicy::Assigned,
            properties: Vec::new(),
            version: None,
            reader: Arc::new(reader),
            is_new: None,
            parent: None,
            discriminator: None,
        }
    }

    /// Mapping of a root table that is never read on its own: rows are
    /// materialized through a subtype mapping.
    pub fn abstract_root<I>(table: impl Into<String>, identifier: I) -> Self
    where
        I: IdentifierAssembler<C> + 'static,
    {
        let table = table.into();
        let name = table.clone();
        Self::new(table, identifier, move |_: &RowView<'_>| {
            Err(DbError::UnsupportedOperation(format!(
                "Rows of abstract root '{}' are read through a subtype",
                name
            )))
        })
    }

    pub fn with_id_policy(mut self, policy: IdentifierPolicy<C>) -> Self {
        self.id_policy = policy;
        self
    }

    pub fn with_property(mut self, property: PropertyMapping<C>) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_version(mut self, version: VersionMapping<C>) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_is_new<F>(mut self, is_new: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.is_new = Some(Arc::new(is_new));
        self
    }

    pub fn with_parent(mut self, table: impl Into<String>, columns: &[&str]) -> Self {
        self.parent = Some(ParentTable {
            table: table.into(),
            columns: columns.iter().map(|col| col.to_string()).collect(),
        });
        self
    }

    /// Constant column written on insert, identifying the subtype.
    pub fn with_discriminator(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.discriminator = Some((column.into(), value.into()));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn assembler(&self) -> &dyn IdentifierAssembler<C> {
        self.identifier.as_ref()
    }

    pub fn identifier(&self, entity: &C) -> Identifier {
        self.identifier.identifier(entity)
    }

    pub fn id_columns(&self) -> Vec<String> {
        self.identifier.column_names()
    }

    pub fn id_policy(&self) -> &IdentifierPolicy<C> {
        &self.id_policy
    }

    pub fn properties(&self) -> &[PropertyMapping<C>] {
        &self.properties
    }

    pub fn version(&self) -> Option<&VersionMapping<C>> {
        self.version.as_ref()
    }

    pub fn parent(&self) -> Option<&ParentTable> {
        self.parent.as_ref()
    }

    pub fn discriminator(&self) -> Option<&(String, Value)> {
        self.discriminator.as_ref()
    }

    /// An explicit predicate wins; otherwise a NULL version, or failing
    /// that an unset identifier, marks the entity as new.
    pub fn is_new(&self, entity: &C) -> bool {
        if let Some(is_new) = &self.is_new {
            return is_new(entity);
        }
        match &self.version {
            Some(version) => version.current(entity).is_null(),
            None => self.identifier(entity).is_unset(),
        }
    }

    pub fn read(&self, row: &RowView<'_>) -> Result<C> {
        (self.reader)(row)
    }

    /// Column definitions of this table: key, properties, version, discriminator.
    pub fn columns(&self) -> Vec<Column> {
        let mut columns: Vec<Column> = self.identifier.columns().to_vec();
        if self.id_policy.is_generated() {
            for column in columns.iter_mut() {
                column.generated = true;
            }
        }
        columns.extend(self.properties.iter().map(|p| p.column().clone()));
        if let Some(version) = &self.version {
            columns.push(version.column().clone());
        }
        if let Some((column, value)) = &self.discriminator {
            let data_type = match value {
                Value::Integer(_) => DataType::Integer,
                _ => DataType::Text,
            };
            columns.push(Column::new(column.clone(), data_type).not_null());
        }
        columns
    }

    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(self.table.clone(), self.columns())
    }

    /// Whether `column` of this table rejects NULL.
    pub fn is_required(&self, column: &str) -> bool {
        self.columns()
            .iter()
            .any(|col| col.name == column && !col.nullable)
    }

    /// Column the store generates on insert, if any.
    pub fn generated_column(&self) -> Option<String> {
        match (&self.id_policy, self.identifier.columns()) {
            (IdentifierPolicy::Generated { .. }, [column]) => Some(column.name.clone()),
            _ => None,
        }
    }

    /// Columns of [`EntityMapping::insert_payload`], in payload order.
    pub fn insert_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        if !self.id_policy.is_generated() {
            columns.extend(self.id_columns());
        }
        columns.extend(
            self.properties
                .iter()
                .filter(|p| p.is_insertable())
                .map(|p| p.name().to_string()),
        );
        if let Some((column, _)) = &self.discriminator {
            columns.push(column.clone());
        }
        columns
    }

    /// Insert payload without the version column.
    pub fn insert_payload(&self, entity: &C) -> Result<WritePayload> {
        let mut payload = WritePayload::new();
        if !self.id_policy.is_generated() {
            let id = self.identifier(entity);
            let columns = self.id_columns();
            for (column, value) in columns.into_iter().zip(self.identifier.disassemble(&id)?) {
                payload.set(column, value);
            }
        }
        for property in self.properties.iter().filter(|p| p.is_insertable()) {
            payload.set(property.name(), property.get(entity));
        }
        if let Some((column, value)) = &self.discriminator {
            payload.set(column.clone(), value.clone());
        }
        Ok(payload)
    }

    /// Adds `id = ?` predicates for `entity` to `payload`.
    pub fn restrict_by_id(&self, entity: &C, payload: &mut WritePayload) -> Result<()> {
        let id = self.identifier(entity);
        for (column, value) in self.id_columns().into_iter().zip(self.identifier.disassemble(&id)?) {
            payload.restrict(column, value);
        }
        Ok(())
    }

    /// Every updatable property, keyed by identifier.
    pub fn update_payload(&self, entity: &C) -> Result<WritePayload> {
        let mut payload = WritePayload::new();
        for property in self.properties.iter().filter(|p| p.is_updatable()) {
            payload.set(property.name(), property.get(entity));
        }
        self.restrict_by_id(entity, &mut payload)?;
        Ok(payload)
    }

    /// Updatable properties whose values differ between the two snapshots.
    pub fn changed_properties(&self, modified: &C, unmodified: &C) -> Vec<&PropertyMapping<C>> {
        self.properties
            .iter()
            .filter(|p| p.is_updatable() && p.get(modified) != p.get(unmodified))
            .collect()
    }

    pub fn has_updatable_properties(&self) -> bool {
        self.properties.iter().any(|p| p.is_updatable())
    }
}

impl<C> fmt::Debug for EntityMapping<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMapping")
            .field("table", &self.table)
            .field("id", &self.id_columns())
            .field("id_policy", &self.id_policy)
            .field(
                "properties",
                &self.properties.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("version", &self.version.as_ref().map(|v| v.column().name.clone()))
            .field("parent", &self.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{SimpleIdentifier, VersionToken};

    #[derive(Debug, Clone)]
    struct Person {
        id: Option<i64>,
        name: String,
        nick: Option<String>,
        version: VersionToken,
    }

    fn mapping() -> EntityMapping<Person> {
        EntityMapping::new(
            "person",
            SimpleIdentifier::new(Column::new("id", DataType::Integer), |p: &Person| {
                p.id.into()
            }),
            |row| {
                Ok(Person {
                    id: row.optional_integer("id")?,
                    name: row.text("name")?,
                    nick: row.optional_text("nick")?,
                    version: row.version("version")?,
                })
            },
        )
        .with_id_policy(IdentifierPolicy::generated(|p: &mut Person, id| {
            p.id = id.as_i64()
        }))
        .with_property(PropertyMapping::new(
            Column::new("name", DataType::Text).not_null(),
            |p: &Person| p.name.as_str().into(),
        ))
        .with_property(PropertyMapping::new(
            Column::new("nick", DataType::Text),
            |p: &Person| p.nick.clone().into(),
        ))
        .with_version(VersionMapping::counter("version", |p: &Person| &p.version))
    }

    fn person() -> Person {
        Person {
            id: None,
            name: "ann".into(),
            nick: None,
            version: VersionToken::default(),
        }
    }

    #[test]
    fn test_insert_payload_skips_generated_key() {
        let mapping = mapping();
        let payload = mapping.insert_payload(&person()).unwrap();
        assert_eq!(payload.set_columns(), vec!["name", "nick"]);
        assert_eq!(mapping.generated_column(), Some("id".to_string()));
        assert!(mapping.columns()[0].generated);
    }

    #[test]
    fn test_is_new_follows_version() {
        let mapping = mapping();
        let mut entity = person();
        assert!(mapping.is_new(&entity));
        entity.version.set(Value::Integer(1));
        assert!(!mapping.is_new(&entity));
    }

    #[test]
    fn test_changed_properties() {
        let mapping = mapping();
        let before = person();
        let mut after = before.clone();
        assert!(mapping.changed_properties(&after, &before).is_empty());

        after.nick = Some("a".into());
        let changed: Vec<&str> = mapping
            .changed_properties(&after, &before)
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(changed, vec!["nick"]);
        assert!(mapping.is_required("name"));
        assert!(!mapping.is_required("nick"));
    }
}
