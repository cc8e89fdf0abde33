//! Flush ordering and statement batching.
//!
//! This module decides in which order entity types are written:
//! - save in flush-tree order (referenced types first)
//! - delete in the reverse order (referencing types first)
//!
//! and builds the multi-row statements the unit of work issues: one batched
//! `DELETE` per entity type and the link-removal statements for relations.

use relmodel_core::{Connection, EntityType, Error, Relation, RelationKind, Schema, Value};

// ============================================================================
// Flush tree
// ============================================================================

/// Computes the order in which entity types must be flushed.
///
/// For every relation between two types in the input:
/// - ForeignKey `A -> B`: `A` precedes `B` (B holds the key)
/// - LocalKey `A -> B`: `B` precedes `A` (A holds the key)
/// - Association `A -- B` via `J`: `J` follows both `A` and `B`
///
/// Types are placed one by one in input order. A final pass then moves any
/// type that still sits ahead of a type it depends on, leaving every other
/// position untouched, so acyclic graphs always come out in a valid order.
///
/// Self-references are ignored. Cycles are not reported; the types caught in
/// one keep their placement order.
#[derive(Debug, Clone, Copy)]
pub struct FlushOrderer<'a> {
    schema: &'a Schema,
}

impl<'a> FlushOrderer<'a> {
    /// Create a flush orderer over `schema`.
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Order `types` for saving.
    ///
    /// The output contains every input type exactly once, plus any
    /// association types pulled in by Association relations. Inputs with
    /// fewer than two distinct types are returned as given.
    pub fn build_flush_tree<S: AsRef<str>>(&self, types: &[S]) -> Result<Vec<String>, Error> {
        let mut input: Vec<String> = Vec::with_capacity(types.len());
        for name in types {
            let name = name.as_ref();
            self.schema.get(name)?;
            if !input.iter().any(|t| t == name) {
                input.push(name.to_string());
            }
        }

        if input.len() < 2 {
            return Ok(input);
        }

        let mut tree: Vec<String> = Vec::with_capacity(input.len() + 2);
        for current in &input {
            let entity = self.schema.get(current)?;
            let mut index = match position(&tree, current) {
                Some(index) => index,
                None => {
                    tree.push(current.clone());
                    tree.len() - 1
                }
            };

            for relation in foreign_keys_first(entity) {
                let related = &relation.related_type;
                if related == current || !input.contains(related) {
                    continue;
                }

                match &relation.kind {
                    RelationKind::ForeignKey => {
                        // related holds the key: it goes after current
                        match position(&tree, related) {
                            None => tree.push(related.clone()),
                            Some(at) if at >= index => {}
                            Some(at) => {
                                // current moves in front of the type holding its key
                                tree.remove(index);
                                tree.insert(at, current.clone());
                                index = at;
                            }
                        }
                    }
                    RelationKind::LocalKey => {
                        // current holds the key: related goes before current
                        match position(&tree, related) {
                            None => {
                                tree.insert(0, related.clone());
                                index += 1;
                            }
                            Some(at) if at <= index => {}
                            Some(at) => {
                                tree.remove(at);
                                tree.insert(index, related.clone());
                                index += 1;
                            }
                        }
                    }
                    RelationKind::Association { association_type } => {
                        if let Some(at) = position(&tree, related) {
                            tree.remove(at);
                        }
                        let at = index.min(tree.len());
                        tree.insert(at, related.clone());
                        index = position(&tree, current).unwrap_or(index);

                        let related_at = position(&tree, related).unwrap_or(at);
                        let last = related_at.max(index);
                        match position(&tree, association_type) {
                            None => tree.push(association_type.clone()),
                            Some(join) if join > last => {}
                            Some(join) => {
                                tree.remove(join);
                                tree.insert(last, association_type.clone());
                                index = position(&tree, current).unwrap_or(index);
                            }
                        }
                    }
                }
            }
        }

        let constraints = self.constraints(&input)?;
        let order = settle(tree, &constraints);
        tracing::debug!(input = ?input, order = ?order, "Built flush tree");
        Ok(order)
    }

    /// Ordering constraints between the requested types as
    /// `(earlier, later)` pairs.
    fn constraints(&self, input: &[String]) -> Result<Vec<(String, String)>, Error> {
        let mut pairs = Vec::new();
        for current in input {
            for relation in self.schema.get(current)?.relations() {
                let related = &relation.related_type;
                if related == current || !input.contains(related) {
                    continue;
                }
                match &relation.kind {
                    RelationKind::ForeignKey => pairs.push((current.clone(), related.clone())),
                    RelationKind::LocalKey => pairs.push((related.clone(), current.clone())),
                    RelationKind::Association { association_type } => {
                        pairs.push((current.clone(), association_type.clone()));
                        pairs.push((related.clone(), association_type.clone()));
                    }
                }
            }
        }
        Ok(pairs)
    }
}

/// Stable topological pass over the placed types.
///
/// Repeatedly takes the first type whose predecessors are all taken. An
/// order that already satisfies `constraints` comes back unchanged. When
/// every remaining type waits on another (a cycle) the first one is taken.
fn settle(placed: Vec<String>, constraints: &[(String, String)]) -> Vec<String> {
    let mut pending = placed;
    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|name| {
                !constraints.iter().any(|(before, after)| {
                    after == name && before != name && pending.contains(before)
                })
            })
            .unwrap_or(0);
        order.push(pending.remove(ready));
    }
    order
}

fn position(tree: &[String], name: &str) -> Option<usize> {
    tree.iter().position(|t| t == name)
}

/// Relations with ForeignKey relations moved to the front.
///
/// Each ForeignKey relation is moved to the front in turn, so the last
/// declared one ends up first.
fn foreign_keys_first(entity: &EntityType) -> Vec<&Relation> {
    let mut ordered: Vec<&Relation> = Vec::with_capacity(entity.relations().len());
    for relation in entity.relations() {
        if relation.is_foreign_key() {
            ordered.insert(0, relation);
        } else {
            ordered.push(relation);
        }
    }
    ordered
}

// ============================================================================
// Batched delete
// ============================================================================

/// One batched `DELETE` for records of a single entity type.
///
/// Identifier tuples are matched with an OR-of-ANDs condition. Entity types
/// without an identifier cannot be deleted this way:
/// - single identifier: `id = ? OR id = ? OR id = ?`
/// - composite identifier: `(a = ? AND b = ?) OR (a = ? AND b = ?)`
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteBatch {
    /// Table name.
    pub table: String,
    /// Identifier column names.
    pub columns: Vec<String>,
    /// One identifier tuple per record, in collection order.
    pub identifiers: Vec<Vec<Value>>,
}

impl DeleteBatch {
    /// Create an empty batch for `entity`.
    pub fn new(entity: &EntityType) -> Self {
        Self {
            table: entity.table_name().to_string(),
            columns: entity
                .identifier_columns()
                .into_iter()
                .map(str::to_string)
                .collect(),
            identifiers: Vec::new(),
        }
    }

    /// Add one record's identifier tuple.
    pub fn push(&mut self, identifier: Vec<Value>) {
        self.identifiers.push(identifier);
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// Build the statement and its flattened parameters.
    pub fn to_sql<C: Connection + ?Sized>(&self, conn: &C) -> (String, Vec<Value>) {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| conn.quote_identifier(c))
            .collect();

        let single = if columns.len() == 1 {
            format!("{} = ?", columns[0])
        } else {
            let parts: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
            format!("({})", parts.join(" AND "))
        };
        let condition = vec![single; self.identifiers.len()].join(" OR ");

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            conn.quote_identifier(&self.table),
            condition
        );
        let params = self.identifiers.iter().flatten().cloned().collect();
        (sql, params)
    }

    /// Execute the batch. Returns the number of records in the batch.
    ///
    /// Fails with a configuration error when the entity type has no
    /// identifier, since its rows cannot be told apart.
    #[tracing::instrument(level = "debug", skip(self, conn), fields(table = %self.table, count = self.identifiers.len()))]
    pub fn execute<C: Connection + ?Sized>(&self, conn: &C) -> Result<usize, Error> {
        if self.identifiers.is_empty() {
            return Ok(0);
        }

        if self.columns.is_empty() {
            tracing::warn!(
                table = %self.table,
                count = self.identifiers.len(),
                "DELETE batch for table without identifier"
            );
            return Err(Error::config(format!(
                "Cannot delete from '{}' without an identifier",
                self.table
            )));
        }

        let (sql, params) = self.to_sql(conn);
        tracing::trace!(sql = %sql, params = params.len(), "Executing batched DELETE");
        conn.exec(&sql, &params)?;
        Ok(self.identifiers.len())
    }
}

// ============================================================================
// Link removal
// ============================================================================

/// A statement removing relation links.
#[derive(Debug, Clone, PartialEq)]
pub enum UnlinkOp {
    /// Delete one join row.
    JoinRow {
        /// Join table name.
        table: String,
        /// Join column referencing the related type.
        foreign_column: String,
        /// Related identifier.
        foreign_value: Value,
        /// Join column referencing the owner.
        local_column: String,
        /// Owner identifier.
        local_value: Value,
    },
    /// Delete an owner's join rows, limited to `foreign_values` when non-empty.
    JoinRows {
        /// Join table name.
        table: String,
        /// Join column referencing the owner.
        local_column: String,
        /// Owner identifier.
        local_value: Value,
        /// Join column referencing the related type.
        foreign_column: String,
        /// Related identifiers; empty means all.
        foreign_values: Vec<Value>,
    },
    /// Null the referencing column on related rows, limited to `ids` when
    /// non-empty.
    ClearForeignKey {
        /// Related table name.
        table: String,
        /// Referencing column on the related table.
        foreign_column: String,
        /// Owner identifier.
        owner_value: Value,
        /// Identifier column of the related table.
        id_column: String,
        /// Related identifiers; empty means all.
        ids: Vec<Value>,
    },
}

impl UnlinkOp {
    /// Get the table name.
    pub fn table(&self) -> &str {
        match self {
            UnlinkOp::JoinRow { table, .. }
            | UnlinkOp::JoinRows { table, .. }
            | UnlinkOp::ClearForeignKey { table, .. } => table,
        }
    }

    /// Build the statement and its parameters.
    pub fn to_sql<C: Connection + ?Sized>(&self, conn: &C) -> (String, Vec<Value>) {
        match self {
            UnlinkOp::JoinRow {
                table,
                foreign_column,
                foreign_value,
                local_column,
                local_value,
            } => (
                format!(
                    "DELETE FROM {} WHERE {} = ? AND {} = ?",
                    conn.quote_identifier(table),
                    conn.quote_identifier(foreign_column),
                    conn.quote_identifier(local_column)
                ),
                vec![foreign_value.clone(), local_value.clone()],
            ),
            UnlinkOp::JoinRows {
                table,
                local_column,
                local_value,
                foreign_column,
                foreign_values,
            } => {
                let mut sql = format!(
                    "DELETE FROM {} WHERE {} = ?",
                    conn.quote_identifier(table),
                    conn.quote_identifier(local_column)
                );
                let mut params = vec![local_value.clone()];
                if !foreign_values.is_empty() {
                    sql.push_str(&format!(
                        " AND {} IN ({})",
                        conn.quote_identifier(foreign_column),
                        placeholders(foreign_values.len())
                    ));
                    params.extend(foreign_values.iter().cloned());
                }
                (sql, params)
            }
            UnlinkOp::ClearForeignKey {
                table,
                foreign_column,
                owner_value,
                id_column,
                ids,
            } => {
                let column = conn.quote_identifier(foreign_column);
                let mut sql = format!(
                    "UPDATE {} SET {} = ? WHERE {} = ?",
                    conn.quote_identifier(table),
                    column,
                    column
                );
                let mut params = vec![Value::Null, owner_value.clone()];
                if !ids.is_empty() {
                    sql.push_str(&format!(
                        " AND {} IN ({})",
                        conn.quote_identifier(id_column),
                        placeholders(ids.len())
                    ));
                    params.extend(ids.iter().cloned());
                }
                (sql, params)
            }
        }
    }

    /// Execute this unlink operation.
    #[tracing::instrument(level = "debug", skip(conn))]
    pub fn execute<C: Connection + ?Sized>(&self, conn: &C) -> Result<u64, Error> {
        let (sql, params) = self.to_sql(conn);
        tracing::trace!(sql = %sql, "Executing unlink");
        conn.exec(&sql, &params)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
