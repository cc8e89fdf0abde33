//! Failures raised by the persistence engine.
//!
//! Storage faults (`Connection`, `Query`, `Transaction`) come from the
//! connection and are passed through once the active savepoint has been
//! rolled back. `Config` and `Schema` describe a broken entity model and are
//! never retried.
//!
//! A record that fails validation is not an error here: its problems stay on
//! the record (see [`ValidationError`]) and the save reports `false`.
//! `Error::Validation` is for callers that want to escalate such a report.

use std::fmt;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum Error {
    Connection(ConnectionError),
    Query(QueryError),
    Transaction(TransactionError),
    /// Identifier generation is misconfigured for an entity type.
    Config(ConfigError),
    /// An entity type, relation alias or field name could not be resolved.
    Schema(SchemaError),
    Validation(ValidationError),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Connect,
    Disconnected,
}

/// A statement the connection refused to run.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Syntax,
    /// Unique, foreign key or check constraint.
    Constraint,
    NotFound,
    Database,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// A savepoint was closed out of order or with none open.
    NotActive,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    UnknownEntity,
    UnknownRelation,
    UnknownField,
}

/// The problems a record's validators reported during its last check.
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    pub errors: Vec<FieldValidationError>,
}

#[derive(Debug, Clone)]
pub struct FieldValidationError {
    /// Field name, or [`ValidationError::RECORD`] for record-wide problems.
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    Required,
    MaxLength,
    Custom,
    Record,
}

impl ValidationError {
    /// Pseudo field name used for record-level errors.
    pub const RECORD: &'static str = "__record__";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(field, ValidationErrorKind::Required, "is required");
    }

    pub fn add_max_length(&mut self, field: impl Into<String>, max: usize, actual: usize) {
        self.add(
            field,
            ValidationErrorKind::MaxLength,
            format!("is {actual} characters long, the limit is {max}"),
        );
    }

    pub fn add_custom(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.add(field, ValidationErrorKind::Custom, message);
    }

    pub fn add_record_error(&mut self, message: impl Into<String>) {
        self.add(Self::RECORD, ValidationErrorKind::Record, message);
    }

    pub fn for_field<'a>(
        &'a self,
        field: &'a str,
    ) -> impl Iterator<Item = &'a FieldValidationError> {
        self.errors.iter().filter(move |e| e.field == field)
    }
}

impl Error {
    /// Whether the entity model itself is broken, as opposed to the data or
    /// the storage.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Schema(_))
    }

    /// SQLSTATE reported by the connection, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    pub fn unknown_entity(name: &str) -> Self {
        Self::schema(
            SchemaErrorKind::UnknownEntity,
            format!("unknown entity type '{name}'"),
        )
    }

    pub fn unknown_relation(entity: &str, alias: &str) -> Self {
        Self::schema(
            SchemaErrorKind::UnknownRelation,
            format!("entity type '{entity}' has no relation '{alias}'"),
        )
    }

    pub fn unknown_field(entity: &str, field: &str) -> Self {
        Self::schema(
            SchemaErrorKind::UnknownField,
            format!("entity type '{entity}' has no field '{field}'"),
        )
    }

    fn schema(kind: SchemaErrorKind, message: String) -> Self {
        Error::Schema(SchemaError { kind, message })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {e}"),
            Error::Query(e) => write!(f, "Query error: {e}"),
            Error::Transaction(e) => write!(f, "Transaction error: {e}"),
            Error::Config(e) => write!(f, "Configuration error: {e}"),
            Error::Schema(e) => write!(f, "Schema error: {e}"),
            Error::Validation(e) => write!(f, "Validation error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let boxed = match self {
            Error::Connection(e) => e.source.as_deref(),
            Error::Query(e) => e.source.as_deref(),
            Error::Validation(e) => return Some(e),
            _ => None,
        };
        boxed.map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, " [{sqlstate}]")?;
        }
        Ok(())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no problems"),
            [only] => write!(f, "{} {}", only.field, only.message),
            many => {
                let parts: Vec<String> = many
                    .iter()
                    .map(|e| format!("{} {}", e.field, e.message))
                    .collect();
                f.write_str(&parts.join("; "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

macro_rules! message_display {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.message)
                }
            }
        )*
    };
}

message_display!(ConnectionError, TransactionError, ConfigError, SchemaError);

macro_rules! wrap_error {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Error::$variant(err)
                }
            }
        )*
    };
}

wrap_error!(
    ConnectionError => Connection,
    QueryError => Query,
    TransactionError => Transaction,
    ConfigError => Config,
    SchemaError => Schema,
    ValidationError => Validation
);

pub type Result<T> = std::result::Result<T, Error>;
