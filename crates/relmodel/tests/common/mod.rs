//! Shared fixtures for the integration tests: a recording connection and
//! the Task/Resource and Forum schemas.

#![allow(dead_code)]

use relmodel::{
    Connection, ConnectionAttributes, Dialect, EntityType, Error, Event, QueryError,
    QueryErrorKind, RecordListener, Relation, Result, Row, Schema, SequenceGenerator, Value,
};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock connection
// ============================================================================

#[derive(Debug)]
pub struct MockState {
    /// Every statement run, with its parameters.
    pub executed: Vec<(String, Vec<Value>)>,
    /// Last generated identifier.
    pub last_id: i64,
    /// Whether `last_insert_id` reports the generated identifier.
    pub generate_ids: bool,
    /// Sequence names passed to `next_id`.
    pub sequence_calls: Vec<String>,
    /// Sequence names passed to `last_insert_id`.
    pub last_insert_calls: Vec<Option<String>>,
    /// Statements containing this text fail.
    pub fail_on: Option<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            executed: Vec::new(),
            last_id: 0,
            generate_ids: true,
            sequence_calls: Vec::new(),
            last_insert_calls: Vec::new(),
            fail_on: None,
        }
    }
}

pub struct MockSequence {
    state: Arc<Mutex<MockState>>,
}

impl SequenceGenerator for MockSequence {
    fn next_id(&self, sequence: &str) -> Result<Value> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.sequence_calls.push(sequence.to_string());
        state.last_id += 1;
        Ok(Value::BigInt(state.last_id))
    }

    fn last_insert_id(&self, sequence: Option<&str>) -> Result<Value> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.last_insert_calls.push(sequence.map(str::to_string));
        if state.generate_ids {
            Ok(Value::BigInt(state.last_id))
        } else {
            Ok(Value::Null)
        }
    }
}

pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
    dialect: Dialect,
    attributes: ConnectionAttributes,
    sequence: MockSequence,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::with(Dialect::Sqlite, ConnectionAttributes::default())
    }

    pub fn with(dialect: Dialect, attributes: ConnectionAttributes) -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));
        Self {
            sequence: MockSequence {
                state: Arc::clone(&state),
            },
            state,
            dialect,
            attributes,
        }
    }

    pub fn fail_on(&self, needle: &str) {
        self.state.lock().expect("lock poisoned").fail_on = Some(needle.to_string());
    }

    pub fn without_generated_ids(&self) {
        self.state.lock().expect("lock poisoned").generate_ids = false;
    }

    /// Every statement run, in order.
    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|(sql, _)| sql).collect()
    }

    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().expect("lock poisoned").executed.clone()
    }

    /// Statements other than savepoint handling.
    pub fn dml(&self) -> Vec<(String, Vec<Value>)> {
        self.executed()
            .into_iter()
            .filter(|(sql, _)| !is_savepoint_statement(sql))
            .collect()
    }

    pub fn dml_sql(&self) -> Vec<String> {
        self.dml().into_iter().map(|(sql, _)| sql).collect()
    }

    pub fn last_insert_calls(&self) -> Vec<Option<String>> {
        self.state.lock().expect("lock poisoned").last_insert_calls.clone()
    }

    pub fn sequence_calls(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").sequence_calls.clone()
    }
}

fn is_savepoint_statement(sql: &str) -> bool {
    sql.starts_with("SAVEPOINT") || sql.starts_with("RELEASE") || sql.starts_with("ROLLBACK")
}

impl Connection for MockConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.exec(sql, params)?;
        Ok(Vec::new())
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                sql: Some(sql.to_string()),
                sqlstate: Some("23000".to_string()),
                message: "constraint violation".to_string(),
                source: None,
            }));
        }
        state.executed.push((sql.to_string(), params.to_vec()));
        if sql.starts_with("INSERT") || sql.starts_with("REPLACE") {
            state.last_id += 1;
        }
        Ok(1)
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn attributes(&self) -> &ConnectionAttributes {
        &self.attributes
    }

    fn sequence(&self) -> &dyn SequenceGenerator {
        &self.sequence
    }
}

// ============================================================================
// Listeners
// ============================================================================

/// Records every hook it sees as `"<hook>:<entity>"`.
#[derive(Default)]
pub struct HookLog {
    pub calls: Mutex<Vec<String>>,
}

impl HookLog {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.calls.lock().expect("lock poisoned").clear();
    }

    fn push(&self, hook: &str, event: &Event) {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(format!("{hook}:{}", event.record().entity_name()));
    }
}

impl RecordListener for HookLog {
    fn pre_save(&self, event: &mut Event) {
        self.push("preSave", event);
    }
    fn post_save(&self, event: &mut Event) {
        self.push("postSave", event);
    }
    fn pre_insert(&self, event: &mut Event) {
        self.push("preInsert", event);
    }
    fn post_insert(&self, event: &mut Event) {
        self.push("postInsert", event);
    }
    fn pre_update(&self, event: &mut Event) {
        self.push("preUpdate", event);
    }
    fn post_update(&self, event: &mut Event) {
        self.push("postUpdate", event);
    }
    fn pre_delete(&self, event: &mut Event) {
        self.push("preDelete", event);
    }
    fn post_delete(&self, event: &mut Event) {
        self.push("postDelete", event);
    }
}

// ============================================================================
// Task / Resource schema
// ============================================================================

pub fn task_type() -> EntityType {
    EntityType::new("Task", "task")
        .field("id")
        .field("name")
        .field("parent_id")
        .identifier("id")
        .relation(
            Relation::foreign_key("Subtask", "Task")
                .many()
                .cascade_delete()
                .columns("id", "parent_id"),
        )
        .relation(Relation::local_key("Parent", "Task").columns("parent_id", "id"))
        .relation(
            Relation::association("ResourceAlias", "Resource", "Assignment")
                .columns("task_id", "resource_id"),
        )
}

pub fn resource_type() -> EntityType {
    EntityType::new("Resource", "resource")
        .field("id")
        .field("name")
        .identifier("id")
        .relation(
            Relation::association("TaskAlias", "Task", "Assignment")
                .columns("resource_id", "task_id"),
        )
        .relation(
            Relation::association("Type", "ResourceType", "ResourceReference")
                .columns("resource_id", "type_id"),
        )
}

pub fn assignment_type() -> EntityType {
    EntityType::new("Assignment", "assignment")
        .field("task_id")
        .field("resource_id")
        .composite_identifier(vec!["task_id".into(), "resource_id".into()])
        .relation(Relation::local_key("Task", "Task").columns("task_id", "id"))
        .relation(Relation::local_key("Resource", "Resource").columns("resource_id", "id"))
}

pub fn resource_type_type() -> EntityType {
    EntityType::new("ResourceType", "resource_type")
        .field("id")
        .field("type")
        .identifier("id")
        .relation(
            Relation::association("ResourceAlias", "Resource", "ResourceReference")
                .columns("type_id", "resource_id"),
        )
}

pub fn resource_reference_type() -> EntityType {
    EntityType::new("ResourceReference", "resource_reference")
        .field("type_id")
        .field("resource_id")
        .composite_identifier(vec!["type_id".into(), "resource_id".into()])
        .relation(Relation::local_key("ResourceType", "ResourceType").columns("type_id", "id"))
        .relation(Relation::local_key("Resource", "Resource").columns("resource_id", "id"))
}

pub fn task_schema() -> Schema {
    let mut schema = Schema::new();
    schema.register(task_type());
    schema.register(resource_type());
    schema.register(assignment_type());
    schema.register(resource_type_type());
    schema.register(resource_reference_type());
    schema
}

// ============================================================================
// Forum schema
// ============================================================================

pub fn category_type() -> EntityType {
    EntityType::new("Category", "forum_category")
        .field("id")
        .field("name")
        .field("parent_category_id")
        .identifier("id")
        .relation(
            Relation::foreign_key("Subcategory", "Category")
                .many()
                .cascade_delete()
                .columns("id", "parent_category_id"),
        )
        .relation(Relation::local_key("Parent", "Category").columns("parent_category_id", "id"))
        .relation(
            Relation::foreign_key("Boards", "Board")
                .many()
                .cascade_delete()
                .columns("id", "category_id"),
        )
}

pub fn board_type() -> EntityType {
    EntityType::new("Board", "forum_board")
        .field("id")
        .field("name")
        .field("category_id")
        .identifier("id")
        .relation(Relation::local_key("Category", "Category").columns("category_id", "id"))
        .relation(
            Relation::foreign_key("Threads", "Thread")
                .many()
                .cascade_delete()
                .columns("id", "board_id"),
        )
}

pub fn thread_type() -> EntityType {
    EntityType::new("Thread", "forum_thread")
        .field("id")
        .field("title")
        .field("board_id")
        .identifier("id")
        .relation(Relation::local_key("Board", "Board").columns("board_id", "id"))
        .relation(
            Relation::foreign_key("Entries", "Entry")
                .many()
                .cascade_delete()
                .columns("id", "thread_id"),
        )
}

pub fn entry_type() -> EntityType {
    EntityType::new("Entry", "forum_entry")
        .field("id")
        .field("author")
        .field("thread_id")
        .field("parent_entry_id")
        .identifier("id")
        .relation(Relation::local_key("Thread", "Thread").columns("thread_id", "id"))
        .relation(Relation::local_key("Parent", "Entry").columns("parent_entry_id", "id"))
}

pub fn forum_schema() -> Schema {
    let mut schema = Schema::new();
    schema.register(category_type());
    schema.register(board_type());
    schema.register(thread_type());
    schema.register(entry_type());
    schema
}

/// Values for `RecordRef::hydrate`.
pub fn row(values: &[(&str, Value)]) -> Vec<(String, Value)> {
    values
        .iter()
        .map(|(field, value)| ((*field).to_string(), value.clone()))
        .collect()
}

pub fn id(value: i64) -> Value {
    Value::BigInt(value)
}

/// Shorthand for the listener type the builders take.
pub fn listener<L: RecordListener + 'static>(listener: &Arc<L>) -> Arc<dyn RecordListener> {
    Arc::clone(listener) as Arc<dyn RecordListener>
}
