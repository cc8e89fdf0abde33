//! The connection collaborator.
//!
//! The persistence engine never talks to a driver directly. Everything it
//! needs from storage goes through [`Connection`]:
//!
//! - [`Connection::execute`] / [`Connection::exec`] run raw statements
//! - [`Connection::insert`] / [`Connection::update`] / [`Connection::replace`]
//!   build single-row DML from field maps
//! - [`Connection::savepoint`] / [`Connection::rollback_to`] /
//!   [`Connection::release`] manage nested transaction boundaries
//! - [`SequenceGenerator`] hands out identifiers
//!
//! Statements use `?` placeholders.

use crate::entity::EntityType;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// SQL dialect of the underlying database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
    Sqlite,
}

/// Boolean connection attributes consulted by the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Re-save association collections on every save, not only modified ones.
    CascadeSaves,
    /// Quote identifiers in generated SQL.
    QuoteIdentifier,
    /// Run record validators before writes.
    Validate,
}

/// Values for every [`Attribute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttributes {
    pub cascade_saves: bool,
    pub quote_identifiers: bool,
    pub validate: bool,
}

impl Default for ConnectionAttributes {
    fn default() -> Self {
        Self {
            cascade_saves: true,
            quote_identifiers: false,
            validate: true,
        }
    }
}

impl ConnectionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cascade_saves(mut self, enabled: bool) -> Self {
        self.cascade_saves = enabled;
        self
    }

    pub fn quote_identifiers(mut self, enabled: bool) -> Self {
        self.quote_identifiers = enabled;
        self
    }

    pub fn validate(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    pub fn get(&self, attribute: Attribute) -> bool {
        match attribute {
            Attribute::CascadeSaves => self.cascade_saves,
            Attribute::QuoteIdentifier => self.quote_identifiers,
            Attribute::Validate => self.validate,
        }
    }
}

/// Identifier generation.
pub trait SequenceGenerator {
    /// Draw the next value from `sequence`.
    fn next_id(&self, sequence: &str) -> Result<Value>;

    /// The identifier generated by the last insert. `sequence` names the
    /// implicit sequence on databases that need one.
    fn last_insert_id(&self, sequence: Option<&str>) -> Result<Value>;
}

/// A synchronous database connection.
///
/// Implementors provide raw statement execution, attributes and a sequence
/// generator; DML building and savepoint statements have default
/// implementations on top of [`exec`](Connection::exec).
pub trait Connection {
    /// Run a statement and return its rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64>;

    fn dialect(&self) -> Dialect;

    fn attributes(&self) -> &ConnectionAttributes;

    fn sequence(&self) -> &dyn SequenceGenerator;

    fn attribute(&self, attribute: Attribute) -> bool {
        self.attributes().get(attribute)
    }

    /// Quote `name` when [`Attribute::QuoteIdentifier`] is set.
    fn quote_identifier(&self, name: &str) -> String {
        if self.attribute(Attribute::QuoteIdentifier) {
            quote_ident(name)
        } else {
            name.to_string()
        }
    }

    /// Insert one row. `fields` are keyed by field name.
    fn insert(&self, entity: &EntityType, fields: &[(String, Value)]) -> Result<u64> {
        let table = self.quote_identifier(entity.table_name());
        if fields.is_empty() {
            let sql = format!("INSERT INTO {table} DEFAULT VALUES");
            tracing::trace!(sql = %sql, "Executing INSERT");
            return self.exec(&sql, &[]);
        }

        let columns: Vec<String> = fields
            .iter()
            .map(|(field, _)| self.quote_identifier(entity.column_name(field)))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders(fields.len())
        );
        let params: Vec<Value> = fields.iter().map(|(_, v)| v.clone()).collect();
        tracing::trace!(sql = %sql, params = params.len(), "Executing INSERT");
        self.exec(&sql, &params)
    }

    /// Update one row identified by `identifier` (field name, value) pairs.
    fn update(
        &self,
        entity: &EntityType,
        fields: &[(String, Value)],
        identifier: &[(String, Value)],
    ) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }

        let set: Vec<String> = fields
            .iter()
            .map(|(field, _)| format!("{} = ?", self.quote_identifier(entity.column_name(field))))
            .collect();
        let condition: Vec<String> = identifier
            .iter()
            .map(|(field, _)| format!("{} = ?", self.quote_identifier(entity.column_name(field))))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.quote_identifier(entity.table_name()),
            set.join(", "),
            condition.join(" AND ")
        );
        let params: Vec<Value> = fields
            .iter()
            .chain(identifier.iter())
            .map(|(_, v)| v.clone())
            .collect();
        tracing::trace!(sql = %sql, params = params.len(), "Executing UPDATE");
        self.exec(&sql, &params)
    }

    /// Insert one row, overwriting any row with the same `keys`.
    fn replace(&self, entity: &EntityType, fields: &[(String, Value)], keys: &[String]) -> Result<u64> {
        let table = self.quote_identifier(entity.table_name());
        let columns: Vec<String> = fields
            .iter()
            .map(|(field, _)| self.quote_identifier(entity.column_name(field)))
            .collect();
        let params: Vec<Value> = fields.iter().map(|(_, v)| v.clone()).collect();

        let sql = match self.dialect() {
            Dialect::Postgres => {
                let conflict: Vec<String> = keys
                    .iter()
                    .map(|k| self.quote_identifier(entity.column_name(k)))
                    .collect();
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| !conflict.contains(c))
                    .map(|c| format!("{c} = EXCLUDED.{c}"))
                    .collect();
                let action = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", updates.join(", "))
                };
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                    table,
                    columns.join(", "),
                    placeholders(fields.len()),
                    conflict.join(", "),
                    action
                )
            }
            Dialect::MySql | Dialect::Sqlite => format!(
                "REPLACE INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders(fields.len())
            ),
        };
        tracing::trace!(sql = %sql, params = params.len(), "Executing REPLACE");
        self.exec(&sql, &params)
    }

    /// Create a savepoint.
    fn savepoint(&self, name: &str) -> Result<()> {
        let sql = format!("SAVEPOINT {}", self.quote_identifier(name));
        tracing::trace!(sql = %sql, "Creating savepoint");
        self.exec(&sql, &[]).map(|_| ())
    }

    /// Roll back to a savepoint, discarding everything written after it.
    fn rollback_to(&self, name: &str) -> Result<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", self.quote_identifier(name));
        tracing::trace!(sql = %sql, "Rolling back to savepoint");
        self.exec(&sql, &[]).map(|_| ())
    }

    /// Release a savepoint, keeping its changes.
    fn release(&self, name: &str) -> Result<()> {
        let sql = format!("RELEASE SAVEPOINT {}", self.quote_identifier(name));
        tracing::trace!(sql = %sql, "Releasing savepoint");
        self.exec(&sql, &[]).map(|_| ())
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct NoSequence;

    impl SequenceGenerator for NoSequence {
        fn next_id(&self, _sequence: &str) -> Result<Value> {
            Ok(Value::Null)
        }

        fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    struct Recording {
        dialect: Dialect,
        attributes: ConnectionAttributes,
        statements: RefCell<Vec<(String, Vec<Value>)>>,
    }

    impl Recording {
        fn new(dialect: Dialect, attributes: ConnectionAttributes) -> Self {
            Self {
                dialect,
                attributes,
                statements: RefCell::new(Vec::new()),
            }
        }

        fn last(&self) -> (String, Vec<Value>) {
            self.statements.borrow().last().cloned().unwrap()
        }
    }

    impl Connection for Recording {
        fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            self.exec(sql, params)?;
            Ok(Vec::new())
        }

        fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
            self.statements
                .borrow_mut()
                .push((sql.to_string(), params.to_vec()));
            Ok(1)
        }

        fn dialect(&self) -> Dialect {
            self.dialect
        }

        fn attributes(&self) -> &ConnectionAttributes {
            &self.attributes
        }

        fn sequence(&self) -> &dyn SequenceGenerator {
            &NoSequence
        }
    }

    fn task() -> EntityType {
        EntityType::new("Task", "task")
            .field("id")
            .field_with_column("name", "task_name")
            .identifier("id")
    }

    #[test]
    fn test_attributes_default() {
        let attrs = ConnectionAttributes::default();
        assert!(attrs.get(Attribute::CascadeSaves));
        assert!(!attrs.get(Attribute::QuoteIdentifier));
        assert!(attrs.get(Attribute::Validate));

        let attrs = attrs.validate(false).quote_identifiers(true);
        assert!(!attrs.get(Attribute::Validate));
        assert!(attrs.get(Attribute::QuoteIdentifier));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");

        let plain = Recording::new(Dialect::Sqlite, ConnectionAttributes::default());
        assert_eq!(plain.quote_identifier("task"), "task");
        let quoted = Recording::new(
            Dialect::Sqlite,
            ConnectionAttributes::default().quote_identifiers(true),
        );
        assert_eq!(quoted.quote_identifier("task"), "\"task\"");
    }

    #[test]
    fn test_insert_maps_columns() {
        let conn = Recording::new(Dialect::Sqlite, ConnectionAttributes::default());
        conn.insert(&task(), &[("name".to_string(), Value::from("a"))]).unwrap();
        let (sql, params) = conn.last();
        assert_eq!(sql, "INSERT INTO task (task_name) VALUES (?)");
        assert_eq!(params, vec![Value::from("a")]);

        conn.insert(&task(), &[]).unwrap();
        assert_eq!(conn.last().0, "INSERT INTO task DEFAULT VALUES");
    }

    #[test]
    fn test_update() {
        let conn = Recording::new(Dialect::Postgres, ConnectionAttributes::default());
        conn.update(
            &task(),
            &[("name".to_string(), Value::from("b"))],
            &[("id".to_string(), Value::BigInt(3))],
        )
        .unwrap();
        let (sql, params) = conn.last();
        assert_eq!(sql, "UPDATE task SET task_name = ? WHERE id = ?");
        assert_eq!(params, vec![Value::from("b"), Value::BigInt(3)]);

        assert_eq!(conn.update(&task(), &[], &[]).unwrap(), 0);
        assert_eq!(conn.statements.borrow().len(), 1);
    }

    #[test]
    fn test_replace_per_dialect() {
        let fields = vec![
            ("id".to_string(), Value::BigInt(1)),
            ("name".to_string(), Value::from("a")),
        ];
        let keys = vec!["id".to_string()];

        let sqlite = Recording::new(Dialect::Sqlite, ConnectionAttributes::default());
        sqlite.replace(&task(), &fields, &keys).unwrap();
        assert_eq!(sqlite.last().0, "REPLACE INTO task (id, task_name) VALUES (?, ?)");

        let pg = Recording::new(Dialect::Postgres, ConnectionAttributes::default());
        pg.replace(&task(), &fields, &keys).unwrap();
        assert_eq!(
            pg.last().0,
            "INSERT INTO task (id, task_name) VALUES (?, ?) ON CONFLICT (id) DO UPDATE SET task_name = EXCLUDED.task_name"
        );
    }

    #[test]
    fn test_savepoint_statements() {
        let conn = Recording::new(Dialect::Postgres, ConnectionAttributes::default());
        conn.savepoint("sp_1").unwrap();
        conn.rollback_to("sp_1").unwrap();
        conn.release("sp_1").unwrap();
        let sql: Vec<String> = conn.statements.borrow().iter().map(|(s, _)| s.clone()).collect();
        assert_eq!(
            sql,
            vec![
                "SAVEPOINT sp_1",
                "ROLLBACK TO SAVEPOINT sp_1",
                "RELEASE SAVEPOINT sp_1"
            ]
        );
    }
}
