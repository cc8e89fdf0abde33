//! Internal transaction boundaries.
//!
//! Every public unit-of-work operation opens a [`Savepoint`]. Only the
//! outermost one issues SQL; nested operations join it and just bump the
//! nesting depth. The outermost commit decides the fate of everything
//! written inside:
//!
//! - no invalid records: `RELEASE SAVEPOINT`, then snapshot the registered
//!   collections
//! - invalid records: `ROLLBACK TO SAVEPOINT` + `RELEASE SAVEPOINT`, and the
//!   commit reports `false`
//!
//! Any error rolls back the outermost savepoint as soon as the error
//! unwinds to it.

use relmodel_core::{
    CollectionRef, Connection, Error, RecordRef, Result, TransactionError, TransactionErrorKind,
};

/// Token for one begun boundary; hand it back to `commit` or `rollback`.
#[derive(Debug)]
#[must_use = "a savepoint must be committed or rolled back"]
pub struct Savepoint {
    depth: usize,
}

impl Savepoint {
    /// Nesting depth, 1 for the outermost boundary.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }
}

/// Nesting state shared by all operations of one unit of work.
#[derive(Debug, Default)]
pub struct TransactionScope {
    depth: usize,
    counter: u64,
    active: Option<String>,
    invalid: Vec<RecordRef>,
    collections: Vec<CollectionRef>,
}

impl TransactionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current nesting depth; 0 outside any operation.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Open a boundary. The outermost one creates a database savepoint
    /// named `<prefix>_<n>` and clears the previous invalid list.
    pub fn begin<C: Connection + ?Sized>(&mut self, conn: &C, prefix: &str) -> Result<Savepoint> {
        if self.depth == 0 {
            self.counter += 1;
            let name = format!("{}_{}", prefix, self.counter);
            conn.savepoint(&name)?;
            tracing::debug!(savepoint = %name, "Began savepoint");
            self.active = Some(name);
            self.invalid.clear();
            self.collections.clear();
        }
        self.depth += 1;
        Ok(Savepoint { depth: self.depth })
    }

    /// Record a record that failed validation inside the current boundary.
    pub fn add_invalid(&mut self, record: &RecordRef) {
        if !self.invalid.iter().any(|r| r.ptr_eq(record)) {
            self.invalid.push(record.clone());
        }
    }

    /// Records that failed validation in the current (or last finished)
    /// outermost boundary.
    pub fn invalid(&self) -> &[RecordRef] {
        &self.invalid
    }

    /// Snapshot `collection` once the outermost boundary commits.
    pub fn add_collection(&mut self, collection: &CollectionRef) {
        if !self.collections.iter().any(|c| c.ptr_eq(collection)) {
            self.collections.push(collection.clone());
        }
    }

    /// Close a boundary successfully.
    ///
    /// Nested boundaries always return `Ok(true)`. The outermost returns
    /// `Ok(false)` when invalid records were registered and everything was
    /// rolled back.
    pub fn commit<C: Connection + ?Sized>(&mut self, conn: &C, savepoint: Savepoint) -> Result<bool> {
        let name = self.close(&savepoint)?;
        let Some(name) = name else {
            return Ok(true);
        };

        if !self.invalid.is_empty() {
            tracing::warn!(
                savepoint = %name,
                invalid = self.invalid.len(),
                "Rolling back savepoint: invalid records"
            );
            conn.rollback_to(&name)?;
            conn.release(&name)?;
            self.collections.clear();
            return Ok(false);
        }

        conn.release(&name)?;
        for collection in self.collections.drain(..) {
            collection.take_snapshot();
        }
        tracing::debug!(savepoint = %name, "Committed savepoint");
        Ok(true)
    }

    /// Close a boundary after an error.
    pub fn rollback<C: Connection + ?Sized>(&mut self, conn: &C, savepoint: Savepoint) -> Result<()> {
        if let Some(name) = self.close(&savepoint)? {
            tracing::debug!(savepoint = %name, "Rolling back savepoint after error");
            self.collections.clear();
            conn.rollback_to(&name)?;
            conn.release(&name)?;
        }
        Ok(())
    }

    /// Pop one level; yields the savepoint name when leaving the outermost.
    fn close(&mut self, savepoint: &Savepoint) -> Result<Option<String>> {
        if self.depth == 0 || savepoint.depth != self.depth {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: format!(
                    "savepoint at depth {} closed while depth is {}",
                    savepoint.depth, self.depth
                ),
            }));
        }
        self.depth -= 1;
        if self.depth == 0 {
            Ok(self.active.take())
        } else {
            Ok(None)
        }
    }
}
