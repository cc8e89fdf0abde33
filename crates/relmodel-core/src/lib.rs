//! Core types and traits for relmodel.
//!
//! This crate provides the building blocks the persistence engine works on:
//!
//! - `Value` for dynamically-typed column values
//! - `Relation` descriptors (ForeignKey, LocalKey, Association)
//! - `EntityType` metadata and the `Schema` registry
//! - `RecordRef` records with their lifecycle state machine
//! - `CollectionRef` many-valued relations with snapshot diffing
//! - `ListenerChain` lifecycle hooks and `RecordValidator`s
//! - `Connection`, `SequenceGenerator` and `RelationLoader` collaborator traits

pub mod collection;
pub mod connection;
pub mod entity;
pub mod error;
pub mod listener;
pub mod loader;
pub mod record;
pub mod relation;
pub mod row;
pub mod validate;
pub mod value;

pub use collection::CollectionRef;
pub use connection::{
    Attribute, Connection, ConnectionAttributes, Dialect, SequenceGenerator, quote_ident,
};
pub use entity::{EntityType, Field, IdentifierKind, Schema};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, FieldValidationError, QueryError,
    QueryErrorKind, Result, SchemaError, SchemaErrorKind, TransactionError, TransactionErrorKind,
    ValidationError, ValidationErrorKind,
};
pub use listener::{Event, EventKind, Hook, ListenerChain, RecordListener, Suppression};
pub use loader::{InMemoryLoader, RelationLoader};
pub use record::{BaseState, PendingUnlink, Record, RecordRef, RecordState, Reference, StateLock};
pub use relation::{Cardinality, Relation, RelationKind};
pub use row::{ColumnInfo, Row};
pub use validate::{MaxLength, RecordValidator, Required};
pub use value::Value;
