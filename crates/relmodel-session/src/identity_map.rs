//! Identity maps and repositories, one pair per entity type.
//!
//! The identity map ensures each stored row corresponds to exactly one
//! in-memory record:
//!
//! - **Uniqueness**: the same identifier always yields the same `RecordRef`
//! - **Consistency**: changes made through one handle are seen by all
//!
//! The repository lists every record attached to an entity type, stored or
//! not; `save_all` flushes it.
//!
//! The registry is owned by the caller and lent to the unit of work, which
//! only mutates it after the matching statement succeeded.

use relmodel_core::{RecordRef, Value};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Hash a slice of values for use as an identity key.
///
/// Integer widths hash alike so `Int(1)` and `BigInt(1)` find the same row.
fn hash_identifier(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher = DefaultHasher::new();
    for v in values {
        hash_single_value(v, &mut hasher);
    }
    hasher.finish()
}

fn hash_single_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i64::from(*i).hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            5u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            6u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Timestamp(ts) => {
            7u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            8u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            9u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

#[derive(Debug, Default)]
struct EntityMaps {
    identities: HashMap<u64, RecordRef>,
    repository: Vec<RecordRef>,
}

/// Identity maps and repositories for every entity type, keyed by
/// component name.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    entities: HashMap<String, EntityMaps>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a record to its entity type's repository.
    pub fn attach(&mut self, record: &RecordRef) {
        let maps = self.entities.entry(record.entity_name()).or_default();
        if !maps.repository.iter().any(|r| r.ptr_eq(record)) {
            maps.repository.push(record.clone());
        }
    }

    /// Register a stored record under its identifier.
    ///
    /// Also attaches it. Returns false when the identifier is not set.
    pub fn add_record(&mut self, record: &RecordRef) -> bool {
        self.attach(record);
        let identifier = record.identifier_values();
        if identifier.is_empty() || identifier.iter().any(Value::is_blank) {
            return false;
        }
        let key = hash_identifier(&identifier);
        if let Some(maps) = self.entities.get_mut(&record.entity_name()) {
            // drop the entry left under an identifier the record no longer has
            maps.identities.retain(|_, r| !r.ptr_eq(record));
            maps.identities.insert(key, record.clone());
        }
        true
    }

    /// Forget a record: drop it from the identity map and the repository.
    pub fn remove_record(&mut self, record: &RecordRef) -> bool {
        let Some(maps) = self.entities.get_mut(&record.entity_name()) else {
            return false;
        };
        let before = maps.repository.len();
        maps.repository.retain(|r| !r.ptr_eq(record));
        let key = hash_identifier(&record.stored_identifier_values());
        let mapped = maps
            .identities
            .get(&key)
            .is_some_and(|r| r.ptr_eq(record));
        if mapped {
            maps.identities.remove(&key);
        }
        mapped || maps.repository.len() != before
    }

    /// Look up the record stored under `identifier`.
    pub fn get(&self, entity: &str, identifier: &[Value]) -> Option<RecordRef> {
        self.entities
            .get(entity)?
            .identities
            .get(&hash_identifier(identifier))
            .cloned()
    }

    /// Is `record` the instance registered for its identifier?
    pub fn contains(&self, record: &RecordRef) -> bool {
        self.get(&record.entity_name(), &record.identifier_values())
            .is_some_and(|r| r.ptr_eq(record))
    }

    /// Records attached to an entity type, in attachment order.
    pub fn repository(&self, entity: &str) -> Vec<RecordRef> {
        self.entities
            .get(entity)
            .map(|maps| maps.repository.clone())
            .unwrap_or_default()
    }

    /// Number of identity-mapped records of an entity type.
    pub fn len(&self, entity: &str) -> usize {
        self.entities.get(entity).map_or(0, |maps| maps.identities.len())
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
