//! Unit of Work executor.
//!
//! The Unit of Work writes whole object graphs in a dependency-safe order.
//!
//! # Overview
//!
//! - [`UnitOfWork::save_graph`] saves a record, the records it references
//!   through LocalKey relations first, then the records that reference it
//!   (ForeignKey relations) and finally its many-to-many links
//! - [`UnitOfWork::delete`] collects a record and its cascade-delete graph
//!   and removes it with one batched `DELETE` per entity type, in reverse
//!   flush order
//! - [`UnitOfWork::save_all`] saves every record attached to the identity
//!   registry, entity type by entity type, in flush order
//!
//! Each public operation runs inside one savepoint; operations called from
//! inside another operation join the enclosing one. Validation failures are
//! not errors: the record lands on the invalid list, the outermost savepoint
//! is rolled back and the operation reports `false`.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = IdentityRegistry::new();
//! let mut uow = UnitOfWork::new(&conn, &schema, &mut registry);
//!
//! let task = RecordRef::new(schema.get("Task")?.clone());
//! task.set("name", "write docs")?;
//! task.collection("ResourceAlias")?.add(resource);
//!
//! if !uow.save_graph(&task, false)? {
//!     for record in uow.invalid_records() {
//!         eprintln!("{}", record.errors());
//!     }
//! }
//! ```

use crate::cascade::{DeletionSet, collect_deletions};
use crate::flush::{DeleteBatch, FlushOrderer, UnlinkOp};
use crate::identity_map::IdentityRegistry;
use crate::transaction::{Savepoint, TransactionScope};
use relmodel_core::{
    Attribute, CollectionRef, Connection, Dialect, Error, Hook, IdentifierKind, InMemoryLoader,
    PendingUnlink, RecordRef, RecordState, Reference, Relation, RelationKind, RelationLoader,
    Result, Schema, Value,
};
use std::sync::Arc;

static DEFAULT_LOADER: InMemoryLoader = InMemoryLoader;

/// Settings for a [`UnitOfWork`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWorkConfig {
    /// Savepoint names are `<prefix>_<n>`.
    pub savepoint_prefix: String,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            savepoint_prefix: "relmodel_sp".to_string(),
        }
    }
}

impl UnitOfWorkConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the savepoint name prefix.
    #[must_use]
    pub fn savepoint_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.savepoint_prefix = prefix.into();
        self
    }
}

/// Writes object graphs through a [`Connection`].
pub struct UnitOfWork<'a, C: Connection + ?Sized> {
    conn: &'a C,
    schema: &'a Schema,
    registry: &'a mut IdentityRegistry,
    loader: &'a dyn RelationLoader,
    config: UnitOfWorkConfig,
    scope: TransactionScope,
}

impl<'a, C: Connection + ?Sized> UnitOfWork<'a, C> {
    /// Create a Unit of Work over `conn`.
    ///
    /// Related records are only taken from memory until a loader is set
    /// with [`with_loader`](Self::with_loader).
    pub fn new(conn: &'a C, schema: &'a Schema, registry: &'a mut IdentityRegistry) -> Self {
        Self {
            conn,
            schema,
            registry,
            loader: &DEFAULT_LOADER,
            config: UnitOfWorkConfig::default(),
            scope: TransactionScope::new(),
        }
    }

    /// Use `loader` to fetch related records during delete cascades.
    #[must_use]
    pub fn with_loader(mut self, loader: &'a dyn RelationLoader) -> Self {
        self.loader = loader;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: UnitOfWorkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    pub fn registry(&self) -> &IdentityRegistry {
        self.registry
    }

    /// Records that failed validation during the last outermost operation.
    pub fn invalid_records(&self) -> &[RecordRef] {
        self.scope.invalid()
    }

    /// Order entity types for saving. Deletes use the reverse order.
    pub fn build_flush_tree<S: AsRef<str>>(&self, types: &[S]) -> Result<Vec<String>> {
        FlushOrderer::new(self.schema).build_flush_tree(types)
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Save `record` and everything reachable from it.
    ///
    /// Returns `Ok(false)` when the record is already being saved further up
    /// the graph, when it failed validation, or when the outermost savepoint
    /// was rolled back because some record in it failed validation.
    /// With `replace` set, records that are not stored yet are written with
    /// [`Connection::replace`] instead of an INSERT.
    #[tracing::instrument(
        level = "debug",
        skip(self, record),
        fields(entity = %record.entity_name(), oid = record.oid())
    )]
    pub fn save_graph(&mut self, record: &RecordRef, replace: bool) -> Result<bool> {
        record.assign_inheritance_values()?;

        if record.state().is_locked() {
            tracing::trace!("Record already being saved");
            return Ok(false);
        }

        let savepoint = self.begin()?;
        let outcome = self.save_graph_inner(record, replace);
        let result = self.finish(savepoint, outcome);
        record.clear_invoked_save_hooks();
        result
    }

    fn save_graph_inner(&mut self, record: &RecordRef, replace: bool) -> Result<bool> {
        let event = record.invoke_save_hook(Hook::PreSave);
        let mut valid = true;
        let mut unlinked: Vec<String> = Vec::new();

        if !event.is_skipped() {
            {
                let _lock = record.lock();
                self.save_related_local_keys(record)?;
            }

            let state = record.state();
            valid = if state.is_transient() {
                if replace {
                    self.replace(record)?
                } else {
                    self.insert(record)?
                }
            } else if record.is_modified() {
                if replace {
                    self.replace(record)?
                } else {
                    self.update(record)?
                }
            } else {
                true
            };

            if valid {
                for pending in record.take_pending_deletes() {
                    self.delete(&pending)?;
                }
                for (alias, unlink) in record.take_pending_unlinks() {
                    self.unlink_in_db(record, &alias, &unlink)?;
                    unlinked.push(alias);
                }
                record.invoke_save_hook(Hook::PostSave);
            } else {
                tracing::debug!(
                    errors = record.errors().len(),
                    "Record failed validation"
                );
                self.scope.add_invalid(record);
            }
        }

        if valid {
            let _lock = record.lock();
            self.save_related_foreign_keys(record, &unlinked)?;
            self.save_associations_inner(record)?;
        }

        Ok(valid)
    }

    /// Save modified records referenced through LocalKey relations and copy
    /// their identifiers into the local columns.
    fn save_related_local_keys(&mut self, record: &RecordRef) -> Result<()> {
        let entity = record.entity();
        for (alias, reference) in record.references() {
            let relation = entity.find_relation(&alias)?;
            let Reference::One(target) = reference else {
                continue;
            };
            if !relation.is_local_key() || !target.is_modified() {
                continue;
            }

            self.save_graph(&target, false)?;

            let ids = target.identifier_values();
            for (column, id) in relation.local.iter().zip(ids) {
                let field = entity.field_name(column);
                if !id.is_blank() && entity.has_field(field) {
                    record.set(field, id)?;
                }
            }
        }
        Ok(())
    }

    /// Save records referencing `record` through ForeignKey relations.
    fn save_related_foreign_keys(&mut self, record: &RecordRef, unlinked: &[String]) -> Result<()> {
        let entity = record.entity();
        for (alias, reference) in record.references() {
            let relation = entity.find_relation(&alias)?;
            if !relation.is_foreign_key() {
                continue;
            }
            match reference {
                Reference::One(related) => {
                    link_foreign_key(record, relation, &related)?;
                    self.save_graph(&related, false)?;
                }
                Reference::Many(collection) => {
                    for member in collection.members() {
                        link_foreign_key(record, relation, &member)?;
                    }
                    let process_diff = !unlinked.contains(&alias);
                    self.save_collection(&collection, process_diff)?;
                }
                Reference::Empty => {}
            }
        }
        Ok(())
    }

    /// Save every member of `collection`.
    ///
    /// With `process_diff` set, members removed since the last snapshot are
    /// deleted first. The collection is snapshotted when the outermost
    /// savepoint commits.
    pub fn save_collection(&mut self, collection: &CollectionRef, process_diff: bool) -> Result<bool> {
        let savepoint = self.begin()?;
        let outcome = self.save_collection_inner(collection, process_diff);
        self.finish(savepoint, outcome)
    }

    fn save_collection_inner(&mut self, collection: &CollectionRef, process_diff: bool) -> Result<bool> {
        self.scope.add_collection(collection);
        if process_diff {
            for removed in collection.delete_diff() {
                self.delete(&removed)?;
            }
        }
        for member in collection.members() {
            self.save_graph(&member, false)?;
        }
        Ok(true)
    }

    /// Synchronise many-to-many links of `record` with its association
    /// collections.
    ///
    /// Members removed since the last snapshot lose their join row; members
    /// added get a new join record saved through the normal save path.
    /// Returns `Ok(false)` when a record saved along the way failed
    /// validation and the outermost savepoint was rolled back.
    #[tracing::instrument(
        level = "debug",
        skip(self, record),
        fields(entity = %record.entity_name(), oid = record.oid())
    )]
    pub fn save_associations(&mut self, record: &RecordRef) -> Result<bool> {
        let savepoint = self.begin()?;
        let outcome = self.save_associations_inner(record).map(|()| true);
        self.finish(savepoint, outcome)
    }

    fn save_associations_inner(&mut self, record: &RecordRef) -> Result<()> {
        let entity = record.entity();
        let cascade_saves = self.conn.attribute(Attribute::CascadeSaves);

        for (alias, reference) in record.references() {
            let relation = entity.find_relation(&alias)?;
            let Some(association_type) = relation.association_type() else {
                continue;
            };
            let Reference::Many(collection) = reference else {
                continue;
            };

            if cascade_saves || collection.is_modified() {
                self.save_collection(&collection, false)?;
            }

            let association = Arc::clone(self.schema.get(association_type)?);
            let (Some(local_column), Some(foreign_column)) =
                (relation.local_ref_column(), relation.foreign_ref_column())
            else {
                tracing::warn!(alias = %alias, "Association without join columns, skipping");
                continue;
            };
            let owner_id = record.incremented();

            for removed in collection.delete_diff() {
                let (Some(foreign_value), Some(local_value)) = (removed.incremented(), owner_id.clone())
                else {
                    continue;
                };
                UnlinkOp::JoinRow {
                    table: association.table_name().to_string(),
                    foreign_column: foreign_column.to_string(),
                    foreign_value,
                    local_column: local_column.to_string(),
                    local_value,
                }
                .execute(self.conn)?;
            }

            for added in collection.insert_diff() {
                let link = RecordRef::new(Arc::clone(&association));
                link.set(
                    association.field_name(foreign_column),
                    added.incremented().unwrap_or(Value::Null),
                )?;
                link.set(
                    association.field_name(local_column),
                    owner_id.clone().unwrap_or(Value::Null),
                )?;
                self.save_graph(&link, false)?;
            }

            collection.take_snapshot();
        }
        Ok(())
    }

    /// Save every record attached to the registry, in flush order.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn save_all(&mut self) -> Result<bool> {
        let savepoint = self.begin()?;
        let outcome = self.save_all_inner();
        self.finish(savepoint, outcome)
    }

    fn save_all_inner(&mut self) -> Result<bool> {
        let order = self.build_flush_tree(self.schema.names())?;
        for name in &order {
            for record in self.registry.repository(name) {
                self.save_graph(&record, false)?;
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Single-record writes
    // ========================================================================

    fn validate(&self, record: &RecordRef) -> bool {
        record.is_valid(self.conn.attribute(Attribute::Validate))
    }

    fn insert(&mut self, record: &RecordRef) -> Result<bool> {
        let event = record.invoke_save_hook(Hook::PreInsert);
        if event.is_skipped() {
            return Ok(true);
        }
        if !self.validate(record) {
            return Ok(false);
        }

        self.process_single_insert(record)?;
        self.registry.add_record(record);
        record.invoke_save_hook(Hook::PostInsert);
        Ok(true)
    }

    fn process_single_insert(&mut self, record: &RecordRef) -> Result<()> {
        let entity = record.entity();
        let mut fields = insert_fields(record);
        let sequenced = self.assign_sequence(record, &mut fields)?;
        self.conn.insert(&entity, &fields)?;
        self.assign_identifier(record, sequenced)
    }

    fn update(&mut self, record: &RecordRef) -> Result<bool> {
        let event = record.invoke_save_hook(Hook::PreUpdate);
        if event.is_skipped() {
            return Ok(true);
        }
        if !self.validate(record) {
            return Ok(false);
        }

        let entity = record.entity();
        self.conn
            .update(&entity, &record.prepared(), &record.stored_identifier())?;
        record.mark_persisted();
        self.registry.add_record(record);
        record.invoke_save_hook(Hook::PostUpdate);
        Ok(true)
    }

    fn replace(&mut self, record: &RecordRef) -> Result<bool> {
        if record.exists() {
            return self.update(record);
        }
        if !self.validate(record) {
            return Ok(false);
        }

        let entity = record.entity();
        let mut fields = insert_fields(record);
        let sequenced = self.assign_sequence(record, &mut fields)?;

        record.invoke_save_hook(Hook::PreSave);
        record.invoke_save_hook(Hook::PreInsert);
        self.conn
            .replace(&entity, &fields, entity.identifier_fields())?;
        record.invoke_save_hook(Hook::PostInsert);
        record.invoke_save_hook(Hook::PostSave);

        self.assign_identifier(record, sequenced)?;
        self.registry.add_record(record);
        Ok(true)
    }

    /// Draw the identifier from the entity's sequence, if it has one, and
    /// add it to `fields`.
    fn assign_sequence(
        &self,
        record: &RecordRef,
        fields: &mut Vec<(String, Value)>,
    ) -> Result<Option<Value>> {
        let entity = record.entity();
        let Some(sequence) = entity.sequence_name() else {
            return Ok(None);
        };
        if entity.is_identifier_composite() {
            return Err(Error::config(
                "Multi column identifiers are not supported in sequences",
            ));
        }

        let id = self.conn.sequence().next_id(sequence)?;
        if let Some(field) = entity.identifier_fields().first() {
            match fields.iter_mut().find(|(name, _)| name == field) {
                Some(slot) => slot.1 = id.clone(),
                None => fields.push((field.clone(), id.clone())),
            }
        }
        tracing::trace!(sequence = %sequence, id = ?id, "Drew identifier from sequence");
        Ok(Some(id))
    }

    /// Settle the identifier of a freshly written record and mark it clean.
    fn assign_identifier(&self, record: &RecordRef, sequenced: Option<Value>) -> Result<()> {
        if let Some(id) = sequenced {
            record.assign_identifier(id);
            return Ok(());
        }

        let entity = record.entity();
        if entity.is_identifier_composite()
            || !matches!(entity.identifier_kind(), IdentifierKind::Autoincrement)
        {
            record.mark_persisted();
            return Ok(());
        }
        let Some(column) = entity.identifier_columns().first().map(|c| (*c).to_string()) else {
            record.mark_persisted();
            return Ok(());
        };

        let id = match record.incremented() {
            Some(id) => id,
            None => {
                let sequence = match self.conn.dialect() {
                    Dialect::Postgres => Some(format!("{}_{}", entity.table_name(), column)),
                    Dialect::MySql | Dialect::Sqlite => None,
                };
                self.conn.sequence().last_insert_id(sequence.as_deref())?
            }
        };
        if id.is_blank() {
            return Err(Error::config("Couldn't get last insert identifier."));
        }
        record.assign_identifier(id);
        Ok(())
    }

    /// Remove the links queued with [`RecordRef::unlink`] from storage.
    fn unlink_in_db(&self, record: &RecordRef, alias: &str, unlink: &PendingUnlink) -> Result<()> {
        let entity = record.entity();
        let relation = entity.find_relation(alias)?;
        let ids = match unlink {
            PendingUnlink::All => Vec::new(),
            PendingUnlink::Ids(ids) if ids.is_empty() => return Ok(()),
            PendingUnlink::Ids(ids) => ids.clone(),
        };

        let op = match &relation.kind {
            RelationKind::Association { association_type } => {
                let association = self.schema.get(association_type)?;
                let (Some(local_column), Some(foreign_column)) =
                    (relation.local_ref_column(), relation.foreign_ref_column())
                else {
                    tracing::warn!(alias = %alias, "Association without join columns, cannot unlink");
                    return Ok(());
                };
                let Some(local_value) = record.incremented() else {
                    return Ok(());
                };
                UnlinkOp::JoinRows {
                    table: association.table_name().to_string(),
                    local_column: local_column.to_string(),
                    local_value,
                    foreign_column: foreign_column.to_string(),
                    foreign_values: ids,
                }
            }
            RelationKind::ForeignKey => {
                let related = self.schema.get(&relation.related_type)?;
                let (Some(local), Some(foreign), Some(id_column)) = (
                    relation.local.first(),
                    relation.foreign.first(),
                    related.identifier_columns().first().map(|c| (*c).to_string()),
                ) else {
                    tracing::warn!(alias = %alias, "Relation without key columns, cannot unlink");
                    return Ok(());
                };
                let owner_value = record.get(entity.field_name(local));
                if owner_value.is_blank() {
                    return Ok(());
                }
                UnlinkOp::ClearForeignKey {
                    table: related.table_name().to_string(),
                    foreign_column: foreign.clone(),
                    owner_value,
                    id_column,
                    ids,
                }
            }
            // cleared in memory when the unlink was queued
            RelationKind::LocalKey => return Ok(()),
        };

        op.execute(self.conn)?;
        Ok(())
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete `record` and its cascade-delete graph.
    ///
    /// Returns `Ok(false)` when the record is not stored. Nothing is
    /// collected in that case, so no savepoint is opened and no hook fires;
    /// an empty deletion is reported as `false`, not as a successful no-op.
    #[tracing::instrument(
        level = "debug",
        skip(self, record),
        fields(entity = %record.entity_name(), oid = record.oid())
    )]
    pub fn delete(&mut self, record: &RecordRef) -> Result<bool> {
        let mut deletions = DeletionSet::new();
        collect_deletions(record, self.loader, &mut deletions)?;
        if deletions.is_empty() {
            tracing::debug!("Record is not stored, nothing to delete");
            return Ok(false);
        }

        let savepoint = self.begin()?;
        let outcome = self.execute_deletions(deletions);
        self.finish(savepoint, outcome)
    }

    fn execute_deletions(&mut self, mut deletions: DeletionSet) -> Result<bool> {
        let schema = self.schema;
        let order = self.build_flush_tree(deletions.entity_names().as_slice())?;
        let mut vetoed: Vec<RecordRef> = Vec::new();
        let mut deleted = 0usize;

        for name in order.iter().rev() {
            let records = deletions.take_type(name);
            if records.is_empty() {
                continue;
            }

            let entity = schema.get(name)?;
            let mut batch = DeleteBatch::new(entity);
            let mut batched: Vec<RecordRef> = Vec::with_capacity(records.len());
            for record in records {
                let event = record.invoke_hook(Hook::PreDelete);
                if event.is_skipped() {
                    tracing::debug!(entity = %name, oid = record.oid(), "Delete vetoed by listener");
                    vetoed.push(record);
                    continue;
                }
                batch.push(record.stored_identifier_values());
                batched.push(record);
            }
            if batched.is_empty() {
                continue;
            }

            batch.execute(self.conn)?;
            for record in batched {
                record.set_state(RecordState::TCLEAN);
                self.registry.remove_record(&record);
                record.invoke_hook(Hook::PostDelete);
                deleted += 1;
            }
        }

        let skipped = vetoed.len();
        for record in vetoed.into_iter().chain(deletions.drain()) {
            record.invoke_hook(Hook::PostDelete);
        }
        tracing::info!(deleted, skipped, "Deleted records");
        Ok(true)
    }

    // ========================================================================
    // Savepoints
    // ========================================================================

    fn begin(&mut self) -> Result<Savepoint> {
        self.scope.begin(self.conn, &self.config.savepoint_prefix)
    }

    /// Commit on success, roll back and hand the error on otherwise.
    fn finish(&mut self, savepoint: Savepoint, outcome: Result<bool>) -> Result<bool> {
        match outcome {
            Ok(valid) => {
                let committed = self.scope.commit(self.conn, savepoint)?;
                Ok(valid && committed)
            }
            Err(error) => {
                if let Err(rollback) = self.scope.rollback(self.conn, savepoint) {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(error)
            }
        }
    }
}

impl<C: Connection + ?Sized> std::fmt::Debug for UnitOfWork<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("config", &self.config)
            .field("depth", &self.scope.depth())
            .field("invalid", &self.scope.invalid().len())
            .finish_non_exhaustive()
    }
}

/// Fields written by an INSERT: the changed ones, or every field as NULL
/// when nothing was set.
fn insert_fields(record: &RecordRef) -> Vec<(String, Value)> {
    let fields = record.prepared();
    if !fields.is_empty() {
        return fields;
    }
    record
        .entity()
        .field_names()
        .map(|name| (name.to_string(), Value::Null))
        .collect()
}

/// Point `related` at `owner` by copying the owner's key into the
/// referencing columns.
fn link_foreign_key(owner: &RecordRef, relation: &Relation, related: &RecordRef) -> Result<()> {
    let owner_entity = owner.entity();
    let related_entity = related.entity();
    for (local, foreign) in relation.local.iter().zip(&relation.foreign) {
        let value = owner.get(owner_entity.field_name(local));
        let field = related_entity.field_name(foreign);
        if value.is_blank() || !related_entity.has_field(field) {
            continue;
        }
        related.set(field, value)?;
    }
    Ok(())
}
