mod common;

use common::{MockConnection, id, row, task_schema};
use relmodel::{
    CollectionRef, ConnectionAttributes, Dialect, IdentityRegistry, PendingUnlink, RecordRef,
    RecordState, Reference, Schema, UnitOfWork, Value,
};
use std::sync::Arc;

fn stored(schema: &Schema, entity: &str, values: &[(&str, Value)]) -> RecordRef {
    RecordRef::hydrate(Arc::clone(schema.get(entity).expect("registered")), row(values))
}

fn save(conn: &MockConnection, schema: &Schema, record: &RecordRef) -> bool {
    let mut registry = IdentityRegistry::new();
    UnitOfWork::new(conn, schema, &mut registry)
        .save_graph(record, false)
        .expect("save succeeds")
}

#[test]
fn added_member_gets_a_join_row() {
    let schema = task_schema();
    let conn = MockConnection::new();
    let task = stored(&schema, "Task", &[("id", id(1)), ("name", Value::from("t"))]);
    let resource = stored(&schema, "Resource", &[("id", id(10))]);
    let resources = task.collection("ResourceAlias").unwrap();
    resources.add(resource);

    assert!(save(&conn, &schema, &task));
    assert_eq!(
        conn.statements(),
        vec![
            "SAVEPOINT relmodel_sp_1",
            "INSERT INTO assignment (resource_id, task_id) VALUES (?, ?)",
            "RELEASE SAVEPOINT relmodel_sp_1",
        ]
    );
    assert_eq!(conn.dml()[0].1, vec![id(10), id(1)]);
    // join rows carry their own key, nothing to fetch
    assert!(conn.last_insert_calls().is_empty());
    assert!(!resources.is_modified());
}

#[test]
fn removed_member_loses_its_join_row() {
    let schema = task_schema();
    let conn = MockConnection::new();
    let task = stored(&schema, "Task", &[("id", id(1))]);
    let resource = stored(&schema, "Resource", &[("id", id(10))]);
    let resources = CollectionRef::loaded("Resource", vec![resource.clone()]);
    task.set_reference("ResourceAlias", Reference::Many(resources.clone()))
        .unwrap();

    assert!(resources.remove(&resource));
    assert!(save(&conn, &schema, &task));

    assert_eq!(
        conn.dml(),
        vec![(
            "DELETE FROM assignment WHERE resource_id = ? AND task_id = ?".to_string(),
            vec![id(10), id(1)]
        )]
    );
    // the related record itself stays
    assert_eq!(resource.state(), RecordState::CLEAN);
    assert!(!resources.is_modified());
}

#[test]
fn unlink_all_removes_every_join_row() {
    let schema = task_schema();
    let conn = MockConnection::new();
    let task = stored(&schema, "Task", &[("id", id(1))]);

    task.unlink("ResourceAlias", PendingUnlink::All).unwrap();
    assert!(save(&conn, &schema, &task));

    assert_eq!(
        conn.dml(),
        vec![("DELETE FROM assignment WHERE task_id = ?".to_string(), vec![id(1)])]
    );
}

#[test]
fn unlink_by_identifier_removes_matching_join_rows() {
    let schema = task_schema();
    let conn = MockConnection::new();
    let task = stored(&schema, "Task", &[("id", id(1))]);
    let first = stored(&schema, "Resource", &[("id", id(10))]);
    let second = stored(&schema, "Resource", &[("id", id(11))]);
    let resources = CollectionRef::loaded("Resource", vec![first, second.clone()]);
    task.set_reference("ResourceAlias", Reference::Many(resources.clone()))
        .unwrap();

    task.unlink("ResourceAlias", PendingUnlink::Ids(vec![id(10)])).unwrap();
    assert_eq!(resources.members().len(), 1);
    assert!(save(&conn, &schema, &task));

    assert_eq!(
        conn.dml(),
        vec![(
            "DELETE FROM assignment WHERE task_id = ? AND resource_id IN (?)".to_string(),
            vec![id(1), id(10)]
        )]
    );
    assert!(resources.contains(&second));
}

#[test]
fn unmodified_collection_is_only_saved_with_cascade_saves() {
    let schema = task_schema();

    let build = || {
        let task = stored(&schema, "Task", &[("id", id(1))]);
        let resource = stored(&schema, "Resource", &[("id", id(10)), ("name", Value::from("a"))]);
        resource.set("name", "renamed").unwrap();
        task.set_reference(
            "ResourceAlias",
            Reference::Many(CollectionRef::loaded("Resource", vec![resource])),
        )
        .unwrap();
        task
    };

    let conn = MockConnection::with(
        Dialect::Sqlite,
        ConnectionAttributes::default().cascade_saves(false),
    );
    assert!(save(&conn, &schema, &build()));
    assert!(conn.dml().is_empty());

    let conn = MockConnection::new();
    assert!(save(&conn, &schema, &build()));
    assert_eq!(
        conn.dml(),
        vec![(
            "UPDATE resource SET name = ? WHERE id = ?".to_string(),
            vec![Value::from("renamed"), id(10)]
        )]
    );
}

#[test]
fn new_records_on_both_sides_are_saved_before_the_link() {
    let schema = task_schema();
    let conn = MockConnection::new();
    let task = RecordRef::new(Arc::clone(schema.get("Task").unwrap()));
    task.set("name", "print").unwrap();
    let resource = RecordRef::new(Arc::clone(schema.get("Resource").unwrap()));
    resource.set("name", "printer").unwrap();
    task.collection("ResourceAlias").unwrap().add(resource.clone());

    assert!(save(&conn, &schema, &task));
    assert_eq!(
        conn.dml(),
        vec![
            (
                "INSERT INTO task (name) VALUES (?)".to_string(),
                vec![Value::from("print")]
            ),
            (
                "INSERT INTO resource (name) VALUES (?)".to_string(),
                vec![Value::from("printer")]
            ),
            (
                "INSERT INTO assignment (resource_id, task_id) VALUES (?, ?)".to_string(),
                vec![id(2), id(1)]
            ),
        ]
    );
    assert_eq!(resource.state(), RecordState::CLEAN);
}

#[test]
fn join_columns_follow_the_relation_direction() {
    let schema = task_schema();
    let conn = MockConnection::new();
    let resource = stored(&schema, "Resource", &[("id", id(10))]);
    let kind = stored(&schema, "ResourceType", &[("id", id(3))]);
    resource.collection("Type").unwrap().add(kind);

    assert!(save(&conn, &schema, &resource));
    assert_eq!(
        conn.dml(),
        vec![(
            "INSERT INTO resource_reference (type_id, resource_id) VALUES (?, ?)".to_string(),
            vec![id(3), id(10)]
        )]
    );
}

#[test]
fn save_associations_can_run_on_its_own() {
    let schema = task_schema();
    let conn = MockConnection::new();
    let mut registry = IdentityRegistry::new();
    let task = stored(&schema, "Task", &[("id", id(1))]);
    let resources = task.collection("ResourceAlias").unwrap();
    resources.add(stored(&schema, "Resource", &[("id", id(10))]));
    resources.add(stored(&schema, "Resource", &[("id", id(11))]));

    let saved = UnitOfWork::new(&conn, &schema, &mut registry)
        .save_associations(&task)
        .unwrap();
    assert!(saved);

    let links: Vec<Vec<Value>> = conn
        .dml()
        .into_iter()
        .filter(|(sql, _)| sql.starts_with("INSERT INTO assignment"))
        .map(|(_, params)| params)
        .collect();
    assert_eq!(links, vec![vec![id(10), id(1)], vec![id(11), id(1)]]);
    assert!(!resources.is_modified());
}
