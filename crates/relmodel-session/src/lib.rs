//! Flush ordering, cascades and Unit of Work for relmodel.
//!
//! `relmodel-session` is the **persistence layer**. It takes object graphs
//! built from `relmodel-core` records and writes them through a
//! [`Connection`](relmodel_core::Connection) in an order the database's
//! constraints accept.
//!
//! # Role In The Architecture
//!
//! - **Flush ordering**: [`FlushOrderer`] sorts entity types so referenced
//!   rows are written before the rows pointing at them.
//! - **Cascades**: [`collect_deletions`] gathers the graph a delete drags
//!   along.
//! - **Identity**: [`IdentityRegistry`] keeps one in-memory record per stored
//!   row, plus the repository of attached records.
//! - **Transactional safety**: [`TransactionScope`] nests operations inside
//!   one savepoint and rolls back on errors or invalid records.
//! - **Execution**: [`UnitOfWork`] drives saves, deletes and link changes.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = IdentityRegistry::new();
//! let mut uow = UnitOfWork::new(&conn, &schema, &mut registry);
//!
//! uow.save_graph(&task, false)?;
//! uow.delete(&task)?;
//! ```

pub mod cascade;
pub mod flush;
pub mod identity_map;
pub mod transaction;
pub mod unit_of_work;

pub use cascade::{DeletionSet, collect_deletions};
pub use flush::{DeleteBatch, FlushOrderer, UnlinkOp};
pub use identity_map::IdentityRegistry;
pub use transaction::{Savepoint, TransactionScope};
pub use unit_of_work::{UnitOfWork, UnitOfWorkConfig};
