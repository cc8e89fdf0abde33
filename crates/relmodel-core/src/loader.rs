//! Loading related records from storage.

use crate::error::Result;
use crate::record::{RecordRef, Reference};
use crate::relation::Relation;

/// Fetches what a relation points at for a stored record.
///
/// The cascade collector calls this to refresh many-valued relations and
/// single-valued relations that were never loaded.
pub trait RelationLoader {
    fn load_related(&self, record: &RecordRef, relation: &Relation) -> Result<Reference>;
}

/// A loader for graphs that are always fully in memory: keeps whatever is
/// already referenced and reports nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryLoader;

impl RelationLoader for InMemoryLoader {
    fn load_related(&self, record: &RecordRef, relation: &Relation) -> Result<Reference> {
        Ok(record.reference(&relation.alias).unwrap_or(Reference::Empty))
    }
}
