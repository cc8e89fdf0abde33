//! Application-level delete cascades.
//!
//! [`collect_deletions`] walks an object graph from a root record along
//! cascade-delete relations and gathers every stored record that has to go
//! with it. Each record is collected at most once, however many paths lead
//! to it.

use relmodel_core::{Cardinality, RecordRef, Reference, RelationLoader, Result};
use std::collections::HashSet;

/// Records to delete, keyed by object identity, in discovery order.
#[derive(Debug, Default)]
pub struct DeletionSet {
    records: Vec<RecordRef>,
    oids: HashSet<u64>,
}

impl DeletionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns false if it was already present.
    pub fn insert(&mut self, record: RecordRef) -> bool {
        if self.oids.insert(record.oid()) {
            self.records.push(record);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, record: &RecordRef) -> bool {
        self.oids.contains(&record.oid())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RecordRef] {
        &self.records
    }

    /// Distinct entity type names, in discovery order.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for record in &self.records {
            let name = record.entity_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Remove and return every record of one entity type, in discovery order.
    pub fn take_type(&mut self, entity: &str) -> Vec<RecordRef> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.entity_name() == entity);
        self.records = kept;
        for record in &taken {
            self.oids.remove(&record.oid());
        }
        taken
    }

    /// Remove and return everything left.
    pub fn drain(&mut self) -> Vec<RecordRef> {
        self.oids.clear();
        std::mem::take(&mut self.records)
    }
}

/// Collect `root` and everything reachable through cascade-delete relations.
///
/// Records that are not stored are skipped. Loaded single-valued relations
/// are used as they are; everything else is loaded through `loader` and the
/// result stored back on the record. Records are visited depth first, in
/// relation declaration order.
#[tracing::instrument(level = "debug", skip_all, fields(entity = %root.entity_name(), oid = root.oid()))]
pub fn collect_deletions<L: RelationLoader + ?Sized>(
    root: &RecordRef,
    loader: &L,
    deletions: &mut DeletionSet,
) -> Result<()> {
    let mut stack = vec![root.clone()];

    while let Some(record) = stack.pop() {
        if !record.exists() || !deletions.insert(record.clone()) {
            continue;
        }

        let entity = record.entity();
        let mut found: Vec<RecordRef> = Vec::new();
        for relation in entity.relations().iter().filter(|r| r.cascade_delete) {
            let reference = match record.reference(&relation.alias) {
                Some(loaded @ (Reference::One(_) | Reference::Empty))
                    if relation.cardinality == Cardinality::One =>
                {
                    loaded
                }
                _ => {
                    let loaded = loader.load_related(&record, relation)?;
                    record.set_reference(&relation.alias, loaded.clone())?;
                    loaded
                }
            };

            match reference {
                Reference::One(related) => {
                    if related.exists() && !deletions.contains(&related) {
                        found.push(related);
                    }
                }
                Reference::Many(collection) => {
                    found.extend(
                        collection
                            .members()
                            .into_iter()
                            .filter(|m| !deletions.contains(m)),
                    );
                }
                Reference::Empty => {}
            }
        }

        tracing::trace!(entity = %entity.name(), oid = record.oid(), related = found.len(), "Collected for deletion");
        stack.extend(found.into_iter().rev());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{CollectionRef, EntityType, InMemoryLoader, Relation, Value};
    use std::sync::Arc;

    fn task_type() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("Task", "task")
                .field("id")
                .field("parent_id")
                .identifier("id")
                .relation(
                    Relation::foreign_key("Subtask", "Task")
                        .many()
                        .cascade_delete()
                        .columns("id", "parent_id"),
                ),
        )
    }

    fn task(entity: &Arc<EntityType>, id: i64) -> RecordRef {
        RecordRef::hydrate(Arc::clone(entity), vec![("id".into(), Value::BigInt(id))])
    }

    fn attach(parent: &RecordRef, children: &[&RecordRef]) {
        let members = children.iter().map(|c| (*c).clone()).collect();
        parent
            .set_reference("Subtask", Reference::Many(CollectionRef::loaded("Task", members)))
            .unwrap();
    }

    #[test]
    fn test_transient_root_is_skipped() {
        let entity = task_type();
        let root = RecordRef::new(entity);
        let mut deletions = DeletionSet::new();
        collect_deletions(&root, &InMemoryLoader, &mut deletions).unwrap();
        assert!(deletions.is_empty());
    }

    #[test]
    fn test_depth_first_order() {
        let entity = task_type();
        let (t1, t2, t3, t4) = (task(&entity, 1), task(&entity, 2), task(&entity, 3), task(&entity, 4));
        attach(&t1, &[&t2, &t3]);
        attach(&t2, &[&t4]);

        let mut deletions = DeletionSet::new();
        collect_deletions(&t1, &InMemoryLoader, &mut deletions).unwrap();

        let ids: Vec<Value> = deletions.records().iter().map(|r| r.get("id")).collect();
        assert_eq!(
            ids,
            vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(4), Value::BigInt(3)]
        );
    }

    #[test]
    fn test_diamond_and_cycle_visited_once() {
        let entity = task_type();
        let (t1, t2, t3, t4) = (task(&entity, 1), task(&entity, 2), task(&entity, 3), task(&entity, 4));
        attach(&t1, &[&t2, &t3]);
        attach(&t2, &[&t4]);
        attach(&t3, &[&t4, &t1]);

        let mut deletions = DeletionSet::new();
        collect_deletions(&t1, &InMemoryLoader, &mut deletions).unwrap();
        assert_eq!(deletions.len(), 4);
        assert_eq!(deletions.entity_names(), vec!["Task".to_string()]);
    }

    #[test]
    fn test_take_type() {
        let entity = task_type();
        let mut deletions = DeletionSet::new();
        assert!(deletions.insert(task(&entity, 1)));
        let t2 = task(&entity, 2);
        assert!(deletions.insert(t2.clone()));
        assert!(!deletions.insert(t2.clone()));

        assert!(deletions.take_type("Other").is_empty());
        assert_eq!(deletions.take_type("Task").len(), 2);
        assert!(deletions.is_empty());
        assert!(!deletions.contains(&t2));
    }
}
