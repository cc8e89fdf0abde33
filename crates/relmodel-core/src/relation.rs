//! Relationship descriptors.
//!
//! A [`Relation`] describes one end of a relationship as declared by the
//! entity type that owns it. Descriptors are read-only once the schema is
//! built and are matched exhaustively by the flush planner and the unit of
//! work.

use serde::{Deserialize, Serialize};

/// The kind of relationship, deciding which side carries the key columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// The related type holds a column referencing this type's identifier.
    ///
    /// Rows of this type must be written before rows of the related type.
    ForeignKey,
    /// This type holds a column referencing the related type's identifier.
    ///
    /// Rows of the related type must be written first.
    LocalKey,
    /// Many-to-many through a join type holding both foreign keys.
    Association {
        /// Entity type name of the join rows.
        association_type: String,
    },
}

/// Whether the relation yields one related record or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

/// One relationship end owned by an entity type.
///
/// Column semantics per kind:
///
/// | kind | `local` | `foreign` |
/// |---|---|---|
/// | ForeignKey | this type's identifier columns | referencing columns on the related type |
/// | LocalKey | referencing columns on this type | the related type's identifier columns |
/// | Association | join-type columns referencing this type | join-type columns referencing the related type |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Name under which the relation is reached from a record.
    pub alias: String,
    /// Relationship kind.
    pub kind: RelationKind,
    /// One or many related records.
    pub cardinality: Cardinality,
    /// Entity type name on the other end.
    pub related_type: String,
    /// Local column set (see table above).
    pub local: Vec<String>,
    /// Foreign column set (see table above).
    pub foreign: Vec<String>,
    /// Deleting the owner deletes the related records.
    pub cascade_delete: bool,
}

impl Relation {
    fn new(alias: impl Into<String>, kind: RelationKind, related_type: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            kind,
            cardinality: Cardinality::One,
            related_type: related_type.into(),
            local: Vec::new(),
            foreign: Vec::new(),
            cascade_delete: false,
        }
    }

    /// A relation whose related type references this type.
    pub fn foreign_key(alias: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self::new(alias, RelationKind::ForeignKey, related_type)
    }

    /// A relation where this type references the related type.
    pub fn local_key(alias: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self::new(alias, RelationKind::LocalKey, related_type)
    }

    /// A many-to-many relation through `association_type`.
    ///
    /// Association relations are always many-valued.
    pub fn association(
        alias: impl Into<String>,
        related_type: impl Into<String>,
        association_type: impl Into<String>,
    ) -> Self {
        let mut relation = Self::new(
            alias,
            RelationKind::Association {
                association_type: association_type.into(),
            },
            related_type,
        );
        relation.cardinality = Cardinality::Many;
        relation
    }

    /// Mark the relation as many-valued.
    pub fn many(mut self) -> Self {
        self.cardinality = Cardinality::Many;
        self
    }

    /// Cascade deletes of the owner to the related records.
    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    /// Set a single local and foreign column.
    pub fn columns(self, local: impl Into<String>, foreign: impl Into<String>) -> Self {
        self.with_columns(vec![local.into()], vec![foreign.into()])
    }

    /// Set the local and foreign column sets.
    pub fn with_columns(mut self, local: Vec<String>, foreign: Vec<String>) -> Self {
        self.local = local;
        self.foreign = foreign;
        self
    }

    /// Is this a ForeignKey relation?
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, RelationKind::ForeignKey)
    }

    /// Is this a LocalKey relation?
    pub fn is_local_key(&self) -> bool {
        matches!(self.kind, RelationKind::LocalKey)
    }

    /// The join type name, for Association relations.
    pub fn association_type(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::Association { association_type } => Some(association_type),
            _ => None,
        }
    }

    /// Is the relation many-valued?
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Join column referencing the owner, for Association relations.
    pub fn local_ref_column(&self) -> Option<&str> {
        self.local.first().map(String::as_str)
    }

    /// Join column referencing the related type, for Association relations.
    pub fn foreign_ref_column(&self) -> Option<&str> {
        self.foreign.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let fk = Relation::foreign_key("Subtask", "Task")
            .many()
            .cascade_delete()
            .columns("id", "parent_id");
        assert!(fk.is_foreign_key());
        assert!(fk.is_many());
        assert!(fk.cascade_delete);
        assert_eq!(fk.local, vec!["id".to_string()]);
        assert_eq!(fk.foreign, vec!["parent_id".to_string()]);

        let lk = Relation::local_key("Board", "Board").columns("board_id", "id");
        assert!(lk.is_local_key());
        assert!(!lk.is_many());
        assert_eq!(lk.association_type(), None);
    }

    #[test]
    fn test_association_is_many() {
        let assoc = Relation::association("ResourceAlias", "Resource", "Assignment")
            .columns("task_id", "resource_id");
        assert!(assoc.is_many());
        assert_eq!(assoc.association_type(), Some("Assignment"));
        assert_eq!(assoc.local_ref_column(), Some("task_id"));
        assert_eq!(assoc.foreign_ref_column(), Some("resource_id"));
    }
}
