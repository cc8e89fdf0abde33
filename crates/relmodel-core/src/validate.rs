//! Record validators.
//!
//! Validators run before every insert and update while
//! [`Attribute::Validate`](crate::Attribute::Validate) is enabled. Failures
//! land on the record's error stack and the write is skipped.

use crate::error::ValidationError;
use crate::record::Record;

/// Checks one record and reports failures into `errors`.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, record: &Record, errors: &mut ValidationError);
}

impl<F> RecordValidator for F
where
    F: Fn(&Record, &mut ValidationError) + Send + Sync,
{
    fn validate(&self, record: &Record, errors: &mut ValidationError) {
        self(record, errors);
    }
}

/// The field must hold a non-blank value.
#[derive(Debug, Clone)]
pub struct Required {
    field: String,
}

impl Required {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl RecordValidator for Required {
    fn validate(&self, record: &Record, errors: &mut ValidationError) {
        if record.value(&self.field).is_blank() {
            errors.add_required(self.field.clone());
        }
    }
}

/// A text field must not exceed `max` characters.
#[derive(Debug, Clone)]
pub struct MaxLength {
    field: String,
    max: usize,
}

impl MaxLength {
    pub fn new(field: impl Into<String>, max: usize) -> Self {
        Self {
            field: field.into(),
            max,
        }
    }
}

impl RecordValidator for MaxLength {
    fn validate(&self, record: &Record, errors: &mut ValidationError) {
        if let Some(text) = record.value(&self.field).as_str() {
            let actual = text.chars().count();
            if actual > self.max {
                errors.add_max_length(self.field.clone(), self.max, actual);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::record::RecordRef;
    use std::sync::Arc;

    fn entity() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("Task", "task")
                .field("id")
                .field("name")
                .identifier("id")
                .validator(Required::new("name"))
                .validator(MaxLength::new("name", 4)),
        )
    }

    #[test]
    fn test_required_and_max_length() {
        let task = RecordRef::new(entity());
        assert!(!task.is_valid(true));
        assert_eq!(task.errors().len(), 1);

        task.set("name", "too long").unwrap();
        assert!(!task.is_valid(true));
        let errors = task.errors();
        assert_eq!(errors.errors[0].field, "name");
        assert_eq!(errors.errors[0].message, "is 8 characters long, the limit is 4");

        task.set("name", "ok").unwrap();
        assert!(task.is_valid(true));
        assert!(task.errors().is_empty());
    }

    #[test]
    fn test_validation_disabled() {
        let task = RecordRef::new(entity());
        assert!(task.is_valid(false));
    }

    #[test]
    fn test_closure_validator() {
        let entity = Arc::new(
            EntityType::new("Task", "task")
                .field("id")
                .identifier("id")
                .validator(|_: &Record, errors: &mut ValidationError| {
                    errors.add_record_error("always invalid");
                }),
        );
        let task = RecordRef::new(entity);
        assert!(!task.is_valid(true));
        assert_eq!(task.errors().errors[0].field, "__record__");
    }
}
