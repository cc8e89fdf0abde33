//! Records, their lifecycle state and their related-record references.
//!
//! A [`Record`] is one instance of an [`EntityType`]. Records form object
//! graphs that may contain cycles, so they are shared as [`RecordRef`]
//! handles (`Rc<RefCell<Record>>`). Every handle method takes a short borrow
//! and releases it before returning; no borrow is held while listeners run.
//!
//! # State machine
//!
//! | state | meaning |
//! |---|---|
//! | `Transient` | never stored, has unsaved changes |
//! | `TClean` | not stored and unchanged (fresh, or just deleted) |
//! | `Clean` | stored, unchanged since load or last write |
//! | `Dirty` | stored, with unsaved changes |
//! | `Proxy` | stored, only partially hydrated |
//!
//! Any of these can additionally be *locked* while the unit of work walks
//! the record's graph; see [`RecordRef::lock`].

use crate::collection::CollectionRef;
use crate::entity::EntityType;
use crate::error::{Error, Result, ValidationError};
use crate::listener::{Event, Hook};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OID: AtomicU64 = AtomicU64::new(1);
static NULL: Value = Value::Null;

// ============================================================================
// State
// ============================================================================

/// Lifecycle state without the lock flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseState {
    Transient,
    TClean,
    Clean,
    Dirty,
    Proxy,
}

/// Lifecycle state: a base state plus a re-entrancy lock flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordState {
    base: BaseState,
    locked: bool,
}

impl RecordState {
    pub const TRANSIENT: Self = Self::new(BaseState::Transient);
    pub const TCLEAN: Self = Self::new(BaseState::TClean);
    pub const CLEAN: Self = Self::new(BaseState::Clean);
    pub const DIRTY: Self = Self::new(BaseState::Dirty);
    pub const PROXY: Self = Self::new(BaseState::Proxy);

    pub const fn new(base: BaseState) -> Self {
        Self {
            base,
            locked: false,
        }
    }

    pub const fn base(&self) -> BaseState {
        self.base
    }

    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Same base state, locked.
    pub const fn lock(self) -> Self {
        Self {
            base: self.base,
            locked: true,
        }
    }

    /// Not stored yet (or no longer stored).
    pub const fn is_transient(&self) -> bool {
        matches!(self.base, BaseState::Transient | BaseState::TClean)
    }

    /// Stored and without unsaved changes.
    pub const fn is_clean(&self) -> bool {
        matches!(self.base, BaseState::Clean | BaseState::Proxy)
    }

    pub const fn exists(&self) -> bool {
        !self.is_transient()
    }

    /// State after a field change.
    const fn touched(self) -> Self {
        let base = match self.base {
            BaseState::Clean | BaseState::Proxy => BaseState::Dirty,
            BaseState::TClean => BaseState::Transient,
            other => other,
        };
        Self {
            base,
            locked: self.locked,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.base {
            BaseState::Transient => "transient",
            BaseState::TClean => "tclean",
            BaseState::Clean => "clean",
            BaseState::Dirty => "dirty",
            BaseState::Proxy => "proxy",
        };
        if self.locked {
            write!(f, "{name}+locked")
        } else {
            f.write_str(name)
        }
    }
}

// ============================================================================
// References
// ============================================================================

/// What a relation alias currently points at.
#[derive(Debug, Clone)]
pub enum Reference {
    /// A single related record.
    One(RecordRef),
    /// A collection of related records.
    Many(CollectionRef),
    /// Loaded, and nothing is related.
    Empty,
}

/// A queued removal of relation links, executed on the next save.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingUnlink {
    /// Every link under the alias.
    All,
    /// Links to the related records with these identifiers.
    Ids(Vec<Value>),
}

// ============================================================================
// Record
// ============================================================================

/// One instance of an entity type.
pub struct Record {
    oid: u64,
    entity: Arc<EntityType>,
    data: Vec<(String, Value)>,
    modified: Vec<String>,
    /// Identifier values as last read from or written to storage.
    stored_id: Option<Vec<Value>>,
    state: RecordState,
    references: Vec<(String, Reference)>,
    pending_deletes: Vec<RecordRef>,
    pending_unlinks: Vec<(String, PendingUnlink)>,
    invoked_save_hooks: HashSet<Hook>,
    errors: ValidationError,
}

impl Record {
    fn new(entity: Arc<EntityType>, state: RecordState) -> Self {
        Self {
            oid: NEXT_OID.fetch_add(1, Ordering::Relaxed),
            entity,
            data: Vec::new(),
            modified: Vec::new(),
            stored_id: None,
            state,
            references: Vec::new(),
            pending_deletes: Vec::new(),
            pending_unlinks: Vec::new(),
            invoked_save_hooks: HashSet::new(),
            errors: ValidationError::new(),
        }
    }

    /// Process-unique object identity.
    pub fn oid(&self) -> u64 {
        self.oid
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Current value of a field; NULL when never set.
    pub fn value(&self, field: &str) -> &Value {
        self.data
            .iter()
            .find(|(name, _)| name == field)
            .map_or(&NULL, |(_, value)| value)
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty()
    }

    fn store(&mut self, field: &str, value: Value) {
        match self.data.iter_mut().find(|(name, _)| name == field) {
            Some(slot) => slot.1 = value,
            None => self.data.push((field.to_string(), value)),
        }
    }

    fn current_identifier(&self) -> Vec<Value> {
        self.entity
            .identifier_fields()
            .iter()
            .map(|field| self.value(field).clone())
            .collect()
    }

    fn stored_identifier(&self) -> Vec<Value> {
        self.stored_id
            .clone()
            .unwrap_or_else(|| self.current_identifier())
    }

    fn reference(&self, alias: &str) -> Option<&Reference> {
        self.references
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, reference)| reference)
    }

    fn clean(&mut self) {
        self.modified.clear();
        self.stored_id = Some(self.current_identifier());
        self.state = RecordState {
            base: BaseState::Clean,
            locked: self.state.locked,
        };
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("oid", &self.oid)
            .field("entity", &self.entity.name())
            .field("state", &self.state)
            .field("data", &self.data)
            .field("modified", &self.modified)
            .field(
                "references",
                &self.references.iter().map(|(a, _)| a).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// RecordRef
// ============================================================================

/// Shared handle to a [`Record`].
#[derive(Clone)]
pub struct RecordRef {
    inner: Rc<RefCell<Record>>,
}

impl RecordRef {
    /// A new, never stored record.
    pub fn new(entity: Arc<EntityType>) -> Self {
        Self::wrap(Record::new(entity, RecordState::TCLEAN))
    }

    /// A record loaded from storage with every field present.
    pub fn hydrate(entity: Arc<EntityType>, values: Vec<(String, Value)>) -> Self {
        let mut record = Record::new(entity, RecordState::CLEAN);
        record.data = values;
        record.stored_id = Some(record.current_identifier());
        Self::wrap(record)
    }

    /// A record loaded from storage with only some fields present.
    pub fn proxy(entity: Arc<EntityType>, values: Vec<(String, Value)>) -> Self {
        let mut record = Record::new(entity, RecordState::PROXY);
        record.data = values;
        record.stored_id = Some(record.current_identifier());
        Self::wrap(record)
    }

    fn wrap(record: Record) -> Self {
        Self {
            inner: Rc::new(RefCell::new(record)),
        }
    }

    /// Run `f` against the record.
    pub fn with<R>(&self, f: impl FnOnce(&Record) -> R) -> R {
        f(&self.inner.borrow())
    }

    pub fn oid(&self) -> u64 {
        self.inner.borrow().oid
    }

    pub fn entity(&self) -> Arc<EntityType> {
        Arc::clone(&self.inner.borrow().entity)
    }

    pub fn entity_name(&self) -> String {
        self.inner.borrow().entity.name().to_string()
    }

    /// Do two handles point at the same record?
    pub fn ptr_eq(&self, other: &RecordRef) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn state(&self) -> RecordState {
        self.inner.borrow().state
    }

    /// Force a state. Used by hydration and by the unit of work.
    pub fn set_state(&self, state: RecordState) {
        let mut record = self.inner.borrow_mut();
        tracing::trace!(
            entity = %record.entity.name(),
            oid = record.oid,
            from = %record.state,
            to = %state,
            "Record state change"
        );
        record.state = state;
    }

    pub fn exists(&self) -> bool {
        self.state().exists()
    }

    /// Lock the record until the returned guard drops.
    ///
    /// Dropping the guard restores the exact state held before locking,
    /// including on early return and unwinding.
    #[must_use = "the record unlocks when the guard is dropped"]
    pub fn lock(&self) -> StateLock {
        let prior = self.state();
        self.set_state(prior.lock());
        StateLock {
            record: self.clone(),
            prior,
        }
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    /// Current value of a field; NULL when never set.
    pub fn get(&self, field: &str) -> Value {
        self.inner.borrow().value(field).clone()
    }

    /// Set a field, tracking the change.
    ///
    /// Setting a value equal to the current one is not a change.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut record = self.inner.borrow_mut();
        if !record.entity.has_field(field) {
            return Err(Error::unknown_field(record.entity.name(), field));
        }
        if *record.value(field) == value && record.data.iter().any(|(name, _)| name == field) {
            return Ok(());
        }
        record.store(field, value);
        if !record.modified.iter().any(|m| m == field) {
            record.modified.push(field.to_string());
        }
        record.state = record.state.touched();
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.inner.borrow().is_modified()
    }

    /// Names of fields changed since the last load or write.
    pub fn modified_fields(&self) -> Vec<String> {
        self.inner.borrow().modified.clone()
    }

    /// Changed fields and their values, ready for an INSERT or UPDATE.
    pub fn prepared(&self) -> Vec<(String, Value)> {
        let record = self.inner.borrow();
        record
            .modified
            .iter()
            .map(|field| (field.clone(), record.value(field).clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Identifier
    // ------------------------------------------------------------------

    /// Identifier fields and their current values.
    pub fn identifier(&self) -> Vec<(String, Value)> {
        let record = self.inner.borrow();
        record
            .entity
            .identifier_fields()
            .iter()
            .map(|field| (field.clone(), record.value(field).clone()))
            .collect()
    }

    /// Identifier values in identifier-field order.
    pub fn identifier_values(&self) -> Vec<Value> {
        self.inner.borrow().current_identifier()
    }

    /// Identifier fields and the values the stored row is keyed by.
    ///
    /// Differs from [`identifier`](Self::identifier) while an identifier
    /// field holds an unsaved change. Records never stored report their
    /// current values.
    pub fn stored_identifier(&self) -> Vec<(String, Value)> {
        let record = self.inner.borrow();
        record
            .entity
            .identifier_fields()
            .iter()
            .cloned()
            .zip(record.stored_identifier())
            .collect()
    }

    /// Values of [`stored_identifier`](Self::stored_identifier).
    pub fn stored_identifier_values(&self) -> Vec<Value> {
        self.inner.borrow().stored_identifier()
    }

    /// The single identifier value, if set.
    pub fn incremented(&self) -> Option<Value> {
        let record = self.inner.borrow();
        let field = record.entity.identifier_fields().first()?;
        let value = record.value(field);
        (!value.is_blank()).then(|| value.clone())
    }

    /// Store a generated identifier and mark the record clean.
    pub fn assign_identifier(&self, id: Value) {
        let mut record = self.inner.borrow_mut();
        if let Some(field) = record.entity.identifier_fields().first().cloned() {
            record.store(&field, id);
        }
        record.clean();
    }

    /// Mark the record clean after a successful write.
    pub fn mark_persisted(&self) {
        self.inner.borrow_mut().clean();
    }

    /// Assign the entity type's discriminator values.
    pub fn assign_inheritance_values(&self) -> Result<()> {
        let entity = self.entity();
        for (field, value) in entity.inheritance_values() {
            self.set(field, value.clone())?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Run the entity type's validators. The error stack is replaced with
    /// the outcome; with `enabled` false it is just cleared.
    pub fn is_valid(&self, enabled: bool) -> bool {
        let mut errors = ValidationError::new();
        if enabled {
            let record = self.inner.borrow();
            for validator in record.entity.validators() {
                validator.validate(&record, &mut errors);
            }
        }
        let valid = errors.is_empty();
        self.inner.borrow_mut().errors = errors;
        valid
    }

    /// Errors reported by the last validation.
    pub fn errors(&self) -> ValidationError {
        self.inner.borrow().errors.clone()
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    pub fn reference(&self, alias: &str) -> Option<Reference> {
        self.inner.borrow().reference(alias).cloned()
    }

    pub fn has_reference(&self, alias: &str) -> bool {
        self.inner.borrow().reference(alias).is_some()
    }

    /// Replace what `alias` points at.
    pub fn set_reference(&self, alias: &str, reference: Reference) -> Result<()> {
        let mut record = self.inner.borrow_mut();
        record.entity.find_relation(alias)?;
        match record.references.iter_mut().find(|(name, _)| name == alias) {
            Some(slot) => slot.1 = reference,
            None => record.references.push((alias.to_string(), reference)),
        }
        Ok(())
    }

    /// References in the entity type's relation declaration order.
    pub fn references(&self) -> Vec<(String, Reference)> {
        let record = self.inner.borrow();
        record
            .entity
            .relations()
            .iter()
            .filter_map(|rel| {
                record
                    .reference(&rel.alias)
                    .map(|r| (rel.alias.clone(), r.clone()))
            })
            .collect()
    }

    /// Point a single-valued relation at `related`.
    ///
    /// For LocalKey relations the related identifier, when already known,
    /// is copied into the local columns.
    pub fn set_related(&self, alias: &str, related: &RecordRef) -> Result<()> {
        let entity = self.entity();
        let relation = entity.find_relation(alias)?;
        if relation.is_local_key() {
            let ids = related.identifier_values();
            for (column, id) in relation.local.iter().zip(ids) {
                let field = entity.field_name(column);
                if !id.is_blank() && entity.has_field(field) {
                    self.set(field, id)?;
                }
            }
        }
        self.set_reference(alias, Reference::One(related.clone()))
    }

    /// The collection under a many-valued alias, created empty when absent.
    pub fn collection(&self, alias: &str) -> Result<CollectionRef> {
        if let Some(Reference::Many(collection)) = self.reference(alias) {
            return Ok(collection);
        }
        let entity = self.entity();
        let relation = entity.find_relation(alias)?;
        let collection = CollectionRef::new(relation.related_type.clone());
        self.set_reference(alias, Reference::Many(collection.clone()))?;
        Ok(collection)
    }

    // ------------------------------------------------------------------
    // Pending work
    // ------------------------------------------------------------------

    /// Queue a record to be deleted after this record's next write.
    pub fn add_pending_delete(&self, record: RecordRef) {
        self.inner.borrow_mut().pending_deletes.push(record);
    }

    pub fn take_pending_deletes(&self) -> Vec<RecordRef> {
        std::mem::take(&mut self.inner.borrow_mut().pending_deletes)
    }

    /// Remove links under `alias`.
    ///
    /// LocalKey links are cleared in memory right away. Other links are
    /// removed from the loaded collection and queued for the next save.
    pub fn unlink(&self, alias: &str, unlink: PendingUnlink) -> Result<()> {
        let entity = self.entity();
        let relation = entity.find_relation(alias)?;

        if relation.is_local_key() {
            for column in &relation.local {
                let field = entity.field_name(column);
                if entity.has_field(field) {
                    self.set(field, Value::Null)?;
                }
            }
            return self.set_reference(alias, Reference::Empty);
        }

        match self.reference(alias) {
            Some(Reference::Many(collection)) => {
                collection.remove_where(|member| match &unlink {
                    PendingUnlink::All => true,
                    PendingUnlink::Ids(ids) => member
                        .incremented()
                        .is_some_and(|id| ids.contains(&id)),
                });
                collection.take_snapshot();
            }
            Some(Reference::One(member)) => {
                let matches = match &unlink {
                    PendingUnlink::All => true,
                    PendingUnlink::Ids(ids) => member.incremented().is_some_and(|id| ids.contains(&id)),
                };
                if matches {
                    self.set_reference(alias, Reference::Empty)?;
                }
            }
            Some(Reference::Empty) | None => {}
        }

        let mut record = self.inner.borrow_mut();
        let merged = match record.pending_unlinks.iter().position(|(name, _)| name == alias) {
            Some(index) => {
                let (_, existing) = record.pending_unlinks.remove(index);
                merge_unlinks(existing, unlink)
            }
            None => unlink,
        };
        record.pending_unlinks.push((alias.to_string(), merged));
        Ok(())
    }

    pub fn take_pending_unlinks(&self) -> Vec<(String, PendingUnlink)> {
        std::mem::take(&mut self.inner.borrow_mut().pending_unlinks)
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Fire a save-family hook at most once until
    /// [`clear_invoked_save_hooks`](Self::clear_invoked_save_hooks).
    pub fn invoke_save_hook(&self, hook: Hook) -> Event {
        let first = self.inner.borrow_mut().invoked_save_hooks.insert(hook);
        let mut event = Event::new(hook.kind(), self.clone());
        if first {
            self.entity().listeners().dispatch(hook, &mut event);
        }
        event
    }

    /// Fire a hook unconditionally.
    pub fn invoke_hook(&self, hook: Hook) -> Event {
        let mut event = Event::new(hook.kind(), self.clone());
        self.entity().listeners().dispatch(hook, &mut event);
        event
    }

    pub fn clear_invoked_save_hooks(&self) {
        self.inner.borrow_mut().invoked_save_hooks.clear();
    }
}

fn merge_unlinks(existing: PendingUnlink, new: PendingUnlink) -> PendingUnlink {
    match (existing, new) {
        (PendingUnlink::Ids(mut ids), PendingUnlink::Ids(more)) => {
            for id in more {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            PendingUnlink::Ids(ids)
        }
        _ => PendingUnlink::All,
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(record) => write!(f, "{}#{}({})", record.entity.name(), record.oid, record.state),
            Err(_) => f.write_str("RecordRef(<borrowed>)"),
        }
    }
}

/// Guard returned by [`RecordRef::lock`].
pub struct StateLock {
    record: RecordRef,
    prior: RecordState,
}

impl StateLock {
    /// The state that will be restored.
    pub fn prior(&self) -> RecordState {
        self.prior
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        self.record.set_state(self.prior);
    }
}
