//! Entity type metadata and the schema registry.

use crate::error::{Error, Result};
use crate::listener::{ListenerChain, RecordListener, Suppression};
use crate::relation::Relation;
use crate::validate::RecordValidator;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How identifier values are produced for new rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentifierKind {
    /// The database generates the value; read back with `last_insert_id`.
    #[default]
    Autoincrement,
    /// Drawn from the named sequence before the insert.
    Sequence(String),
    /// Supplied by the caller.
    Natural,
}

/// A mapped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name as used on records.
    pub name: String,
    /// Column name in the table.
    pub column: String,
}

/// Metadata for one persistable component: table, fields, identifier,
/// relations, listeners and validators.
///
/// Built once with the consuming builder methods and shared as
/// `Arc<EntityType>` by every record of the type.
pub struct EntityType {
    name: String,
    table_name: String,
    fields: Vec<Field>,
    identifier: Vec<String>,
    identifier_kind: IdentifierKind,
    relations: Vec<Relation>,
    inheritance: Vec<(String, Value)>,
    listeners: ListenerChain,
    validators: Vec<Box<dyn RecordValidator>>,
}

impl EntityType {
    /// Start describing a component stored in `table_name`.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            fields: Vec::new(),
            identifier: Vec::new(),
            identifier_kind: IdentifierKind::default(),
            relations: Vec::new(),
            inheritance: Vec::new(),
            listeners: ListenerChain::new(),
            validators: Vec::new(),
        }
    }

    /// Map a field onto a column of the same name.
    pub fn field(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let column = name.clone();
        self.field_with_column(name, column)
    }

    /// Map a field onto a differently named column.
    pub fn field_with_column(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            column: column.into(),
        });
        self
    }

    /// Single-field identifier.
    pub fn identifier(mut self, field: impl Into<String>) -> Self {
        self.identifier = vec![field.into()];
        self
    }

    /// Composite identifier. Composite identifiers are always natural.
    pub fn composite_identifier(mut self, fields: Vec<String>) -> Self {
        self.identifier = fields;
        self.identifier_kind = IdentifierKind::Natural;
        self
    }

    /// Draw identifiers from a sequence.
    pub fn sequence(mut self, name: impl Into<String>) -> Self {
        self.identifier_kind = IdentifierKind::Sequence(name.into());
        self
    }

    /// Identifier values are supplied by the caller.
    pub fn natural(mut self) -> Self {
        self.identifier_kind = IdentifierKind::Natural;
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Discriminator value assigned before every save.
    pub fn inheritance(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inheritance.push((field.into(), value.into()));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn RecordListener>) -> Self {
        self.listeners.add(listener);
        self
    }

    pub fn named_listener(mut self, name: impl Into<String>, listener: Arc<dyn RecordListener>) -> Self {
        self.listeners.set(name, listener);
        self
    }

    /// Suppress hooks for every listener of this type.
    pub fn suppress_listeners(mut self, suppression: Suppression) -> Self {
        self.listeners.set_suppression(suppression);
        self
    }

    /// Suppress hooks for one named listener.
    pub fn suppress_listener(mut self, name: &str, suppression: Suppression) -> Self {
        if !self.listeners.set_listener_suppression(name, suppression) {
            tracing::warn!(entity = %self.name, listener = name, "No listener with that name to suppress");
        }
        self
    }

    pub fn validator(mut self, validator: impl RecordValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    // ------------------------------------------------------------------

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Column for a field; unmapped names are returned unchanged.
    pub fn column_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map_or(field, |f| f.column.as_str())
    }

    /// Field for a column; unmapped names are returned unchanged.
    pub fn field_name<'a>(&'a self, column: &'a str) -> &'a str {
        self.fields
            .iter()
            .find(|f| f.column == column)
            .map_or(column, |f| f.name.as_str())
    }

    /// Identifier field names.
    pub fn identifier_fields(&self) -> &[String] {
        &self.identifier
    }

    /// Identifier column names.
    pub fn identifier_columns(&self) -> Vec<&str> {
        self.identifier.iter().map(|f| self.column_name(f)).collect()
    }

    pub fn is_identifier_composite(&self) -> bool {
        self.identifier.len() > 1
    }

    pub fn identifier_kind(&self) -> &IdentifierKind {
        &self.identifier_kind
    }

    /// Sequence name, when identifiers come from a sequence.
    pub fn sequence_name(&self) -> Option<&str> {
        match &self.identifier_kind {
            IdentifierKind::Sequence(name) => Some(name),
            _ => None,
        }
    }

    /// Relations in declaration order.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Relation declared under `alias`.
    pub fn find_relation(&self, alias: &str) -> Result<&Relation> {
        self.relations
            .iter()
            .find(|r| r.alias == alias)
            .ok_or_else(|| Error::unknown_relation(&self.name, alias))
    }

    pub fn inheritance_values(&self) -> &[(String, Value)] {
        &self.inheritance
    }

    pub fn listeners(&self) -> &ListenerChain {
        &self.listeners
    }

    pub fn validators(&self) -> &[Box<dyn RecordValidator>] {
        &self.validators
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields)
            .field("identifier", &self.identifier)
            .field("identifier_kind", &self.identifier_kind)
            .field("relations", &self.relations)
            .field("listeners", &self.listeners)
            .field("validators", &self.validators.len())
            .finish()
    }
}

/// Registry of every entity type, keyed by component name.
#[derive(Debug, Default)]
pub struct Schema {
    entities: HashMap<String, Arc<EntityType>>,
    order: Vec<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type, replacing any earlier type of the same name.
    pub fn register(&mut self, entity: EntityType) -> Arc<EntityType> {
        let name = entity.name().to_string();
        let entity = Arc::new(entity);
        if self.entities.insert(name.clone(), Arc::clone(&entity)).is_none() {
            self.order.push(name);
        }
        entity
    }

    /// Look up an entity type by component name.
    pub fn get(&self, name: &str) -> Result<&Arc<EntityType>> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::unknown_entity(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Component names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
