//! Error model for the entity runtime.
//!
//! Validation and type-mismatch failures are the "rollback class": wherever
//! one is raised, any partially-applied state (a single entity's fields, or a
//! whole creation transaction) is rolled back before the error surfaces.

use thiserror::Error;

use crate::identifier::EntityId;
use crate::validate::ConstraintViolation;

/// Result type used across the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// One entity failed one or more of its declared constraints.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed for {entity_type}{}: {}", id_suffix(.id), summarize(.violations))]
pub struct ValidationError {
    pub entity_type: String,
    pub id: Option<EntityId>,
    pub violations: Vec<ConstraintViolation>,
}

impl ValidationError {
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        id: Option<EntityId>,
        violations: Vec<ConstraintViolation>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            violations,
        }
    }
}

/// Every per-entity validation failure collected across one creation
/// transaction. Thrown only after all entities in the transaction were
/// checked, so callers always see the complete failure set.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} validation failure(s) across transaction: {}", .errors.len(), join_errors(.errors))]
pub struct MultipleValidationError {
    pub errors: Vec<ValidationError>,
}

impl MultipleValidationError {
    #[must_use]
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    /// Violations for a given entity type, across all wrapped failures.
    pub fn for_entity_type<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = &'a ValidationError> {
        self.errors
            .iter()
            .filter(move |e| e.entity_type == entity_type)
    }
}

/// Top-level error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A single entity's state violates its declared constraints.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Aggregate of all validation failures from one transaction.
    #[error(transparent)]
    MultipleValidation(#[from] MultipleValidationError),

    /// A setter received a value of the wrong shape.
    #[error("type mismatch on {entity_type}.{field}: expected {expected}, got {actual}")]
    TypeMismatch {
        entity_type: String,
        field: String,
        expected: String,
        actual: String,
    },

    /// Malformed input graph or misuse of an immutable slot.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required collaborator was not injected before use.
    #[error("configuration: {0}")]
    Configuration(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn type_mismatch(
        entity_type: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            entity_type: entity_type.into(),
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether this error triggers field-level rollback in `update`:
    /// validation and type failures are treated identically there.
    #[must_use]
    pub const fn is_rollback_class(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::MultipleValidation(_) | Error::TypeMismatch { .. }
        )
    }
}

fn id_suffix(id: &Option<EntityId>) -> String {
    id.map_or_else(String::new, |id| format!("#{id}"))
}

fn summarize(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ConstraintViolation;

    fn violation(field: &str) -> ConstraintViolation {
        ConstraintViolation::new(field, "required", "field is required")
    }

    #[test]
    fn validation_error_display_names_entity_and_fields() {
        let err = ValidationError::new("Order", None, vec![violation("total")]);
        let text = err.to_string();
        assert!(text.contains("Order"));
        assert!(text.contains("total"));
    }

    #[test]
    fn rollback_class_covers_validation_and_type_errors() {
        let v = Error::Validation(ValidationError::new("Order", None, vec![]));
        let t = Error::type_mismatch("Order", "total", "int", "text");
        let c = Error::configuration("no validator");
        assert!(v.is_rollback_class());
        assert!(t.is_rollback_class());
        assert!(!c.is_rollback_class());
    }

    #[test]
    fn multiple_validation_filters_by_entity_type() {
        let multi = MultipleValidationError::new(vec![
            ValidationError::new("Order", None, vec![violation("total")]),
            ValidationError::new("Customer", None, vec![violation("name")]),
        ]);
        assert_eq!(multi.for_entity_type("Order").count(), 1);
        assert_eq!(multi.for_entity_type("Customer").count(), 1);
        assert_eq!(multi.for_entity_type("Shipment").count(), 0);
    }
}
