//! relmodel - graph-aware persistence for relational records.
//!
//! relmodel writes object graphs of dynamically typed records to a
//! relational database:
//!
//! - Entity types with ForeignKey, LocalKey and many-to-many relations
//! - A record state machine with change tracking and re-entrancy locking
//! - Flush ordering that keeps foreign key constraints satisfied
//! - Cascading saves and application-level cascading deletes
//! - Batched deletes and many-to-many link synchronisation
//! - Lifecycle listeners and validators
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! let mut schema = Schema::new();
//! schema.register(
//!     EntityType::new("Task", "task")
//!         .field("id")
//!         .field("name")
//!         .identifier("id")
//!         .relation(
//!             Relation::association("Resources", "Resource", "Assignment")
//!                 .columns("task_id", "resource_id"),
//!         ),
//! );
//! // ... Resource and Assignment
//!
//! let mut registry = IdentityRegistry::new();
//! let mut uow = UnitOfWork::new(&conn, &schema, &mut registry);
//!
//! let task = RecordRef::new(schema.get("Task")?.clone());
//! task.set("name", "write docs")?;
//! uow.save_graph(&task, false)?;
//! ```

pub use relmodel_core::{
    Attribute, BaseState, Cardinality, CollectionRef, ColumnInfo, ConfigError, Connection,
    ConnectionAttributes, ConnectionError, ConnectionErrorKind, Dialect, EntityType, Error, Event,
    EventKind, Field, FieldValidationError, Hook, IdentifierKind, InMemoryLoader, ListenerChain,
    MaxLength, PendingUnlink, QueryError, QueryErrorKind, Record, RecordListener, RecordRef,
    RecordState, RecordValidator, Reference, Relation, RelationKind, RelationLoader, Required,
    Result, Row, Schema, SchemaError, SchemaErrorKind, SequenceGenerator, StateLock, Suppression,
    TransactionError, TransactionErrorKind, ValidationError, ValidationErrorKind, Value,
    quote_ident,
};
pub use relmodel_session::{
    DeleteBatch, DeletionSet, FlushOrderer, IdentityRegistry, Savepoint, TransactionScope,
    UnitOfWork, UnitOfWorkConfig, UnlinkOp, collect_deletions,
};

/// The types most programs need.
pub mod prelude {
    pub use crate::{
        Attribute, CollectionRef, Connection, ConnectionAttributes, Dialect, EntityType, Error,
        Event, Hook, IdentityRegistry, PendingUnlink, RecordListener, RecordRef, Reference,
        Relation, Result, Schema, SequenceGenerator, UnitOfWork, Value,
    };
}
