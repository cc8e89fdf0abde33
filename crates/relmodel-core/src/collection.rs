//! Many-valued relation collections with snapshot diffing.

use crate::record::RecordRef;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Members of a many-valued relation plus the snapshot taken at the last
/// successful save. Members are compared by object identity.
pub struct Collection {
    related_type: String,
    members: Vec<RecordRef>,
    snapshot: Vec<RecordRef>,
}

/// Shared handle to a [`Collection`].
#[derive(Clone)]
pub struct CollectionRef {
    inner: Rc<RefCell<Collection>>,
}

impl CollectionRef {
    /// An empty collection of `related_type` records.
    pub fn new(related_type: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Collection {
                related_type: related_type.into(),
                members: Vec::new(),
                snapshot: Vec::new(),
            })),
        }
    }

    /// A collection loaded from storage: the members are also the snapshot.
    pub fn loaded(related_type: impl Into<String>, members: Vec<RecordRef>) -> Self {
        let collection = Self::new(related_type);
        {
            let mut inner = collection.inner.borrow_mut();
            inner.snapshot.clone_from(&members);
            inner.members = members;
        }
        collection
    }

    pub fn related_type(&self) -> String {
        self.inner.borrow().related_type.clone()
    }

    /// Append a member unless it is already present.
    pub fn add(&self, record: RecordRef) {
        let mut inner = self.inner.borrow_mut();
        let oid = record.oid();
        if !inner.members.iter().any(|m| m.oid() == oid) {
            inner.members.push(record);
        }
    }

    /// Remove every member matching `predicate`, returning them.
    pub fn remove_where(&self, mut predicate: impl FnMut(&RecordRef) -> bool) -> Vec<RecordRef> {
        let mut inner = self.inner.borrow_mut();
        let (removed, kept): (Vec<_>, Vec<_>) =
            inner.members.drain(..).partition(&mut predicate);
        inner.members = kept;
        removed
    }

    /// Remove one member by object identity.
    pub fn remove(&self, record: &RecordRef) -> bool {
        !self.remove_where(|m| m.ptr_eq(record)).is_empty()
    }

    pub fn members(&self) -> Vec<RecordRef> {
        self.inner.borrow().members.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().members.is_empty()
    }

    pub fn contains(&self, record: &RecordRef) -> bool {
        self.inner.borrow().members.iter().any(|m| m.ptr_eq(record))
    }

    /// Remember the current members as the persisted state.
    pub fn take_snapshot(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.snapshot = inner.members.clone();
    }

    /// Members added since the snapshot, in member order.
    pub fn insert_diff(&self) -> Vec<RecordRef> {
        let inner = self.inner.borrow();
        let known: HashSet<u64> = inner.snapshot.iter().map(RecordRef::oid).collect();
        inner
            .members
            .iter()
            .filter(|m| !known.contains(&m.oid()))
            .cloned()
            .collect()
    }

    /// Members removed since the snapshot, in snapshot order.
    pub fn delete_diff(&self) -> Vec<RecordRef> {
        let inner = self.inner.borrow();
        let current: HashSet<u64> = inner.members.iter().map(RecordRef::oid).collect();
        inner
            .snapshot
            .iter()
            .filter(|m| !current.contains(&m.oid()))
            .cloned()
            .collect()
    }

    /// Have members been added or removed since the snapshot?
    pub fn is_modified(&self) -> bool {
        !self.insert_diff().is_empty() || !self.delete_diff().is_empty()
    }

    pub fn ptr_eq(&self, other: &CollectionRef) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Collection")
                .field("related_type", &inner.related_type)
                .field("members", &inner.members)
                .field("snapshot", &inner.snapshot.len())
                .finish(),
            Err(_) => f.write_str("Collection(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::value::Value;
    use std::sync::Arc;

    fn resource(id: i64) -> RecordRef {
        let entity = Arc::new(EntityType::new("Resource", "resource").field("id").identifier("id"));
        RecordRef::hydrate(entity, vec![("id".into(), Value::BigInt(id))])
    }

    #[test]
    fn test_diffs_against_snapshot() {
        let (a, b, c, d) = (resource(1), resource(2), resource(3), resource(4));
        let collection = CollectionRef::loaded("Resource", vec![a.clone(), b.clone(), c.clone()]);
        assert!(!collection.is_modified());

        collection.remove(&a);
        collection.remove(&b);
        collection.add(d.clone());

        let deleted: Vec<u64> = collection.delete_diff().iter().map(RecordRef::oid).collect();
        let inserted: Vec<u64> = collection.insert_diff().iter().map(RecordRef::oid).collect();
        assert_eq!(deleted, vec![a.oid(), b.oid()]);
        assert_eq!(inserted, vec![d.oid()]);
        assert!(collection.is_modified());

        collection.take_snapshot();
        assert!(!collection.is_modified());
        assert!(collection.contains(&c));
    }

    #[test]
    fn test_add_is_idempotent() {
        let a = resource(1);
        let collection = CollectionRef::new("Resource");
        collection.add(a.clone());
        collection.add(a);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.insert_diff().len(), 1);
    }
}
