//! Constraint validation for entity state.
//!
//! Constraints are declared per field in the entity metadata and checked by
//! [`ConstraintValidator`], the default [`EntityValidator`] the factory
//! injects into every entity it creates. Validators are entity-scoped: one
//! boxed instance is injected per entity and consulted on every validate
//! call.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::meta::EntityMeta;
use crate::value::Value;

/// Field values of an entity, as seen by a validator.
pub type FieldValues = HashMap<String, Value>;

/// A declared per-field constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Text must contain at least one non-whitespace character.
    NotBlank,
    /// Minimum text length in characters.
    MinLength(usize),
    /// Maximum text length in characters.
    MaxLength(usize),
    /// Text must match the regex pattern.
    Pattern(String),
    /// Inclusive integer range. `None` bounds are open.
    Range {
        min: Option<i64>,
        max: Option<i64>,
    },
    /// Text must look like an email address.
    Email,
}

impl Constraint {
    /// Short name used in violation reports.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Constraint::NotBlank => "not_blank",
            Constraint::MinLength(_) => "min_length",
            Constraint::MaxLength(_) => "max_length",
            Constraint::Pattern(_) => "pattern",
            Constraint::Range { .. } => "range",
            Constraint::Email => "email",
        }
    }
}

/// One failed constraint on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub field: String,
    pub constraint: String,
    pub message: String,
}

impl ConstraintViolation {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.field, self.constraint, self.message)
    }
}

/// Validates an entity's current field values against its metadata.
///
/// Returning an empty list means the entity is valid.
pub trait EntityValidator {
    fn validate(&self, meta: &EntityMeta, fields: &FieldValues) -> Vec<ConstraintViolation>;
}

/// Builds the validator injected into each entity the factory creates.
pub trait ValidatorProvider {
    fn validator_for(&self, meta: &EntityMeta) -> Box<dyn EntityValidator>;
}

/// Default provider: a [`ConstraintValidator`] per entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintValidatorProvider;

impl ValidatorProvider for ConstraintValidatorProvider {
    fn validator_for(&self, _meta: &EntityMeta) -> Box<dyn EntityValidator> {
        Box::new(ConstraintValidator)
    }
}

/// Checks required presence and every declared field constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintValidator;

impl EntityValidator for ConstraintValidator {
    fn validate(&self, meta: &EntityMeta, fields: &FieldValues) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();
        for field in meta.fields() {
            let value = fields.get(field.name());
            let present = value.is_some_and(|v| !v.is_null());
            if field.is_required() && !present {
                violations.push(ConstraintViolation::new(
                    field.name(),
                    "required",
                    "field is required but has no value",
                ));
                continue;
            }
            let Some(value) = value else { continue };
            if value.is_null() {
                continue;
            }
            for constraint in field.constraints() {
                if let Some(violation) = check_constraint(field.name(), constraint, value) {
                    violations.push(violation);
                }
            }
        }
        violations
    }
}

fn check_constraint(field: &str, constraint: &Constraint, value: &Value) -> Option<ConstraintViolation> {
    let fail = |message: String| Some(ConstraintViolation::new(field, constraint.name(), message));
    match constraint {
        Constraint::NotBlank => match value.as_str() {
            Some(s) if s.trim().is_empty() => fail("must not be blank".to_string()),
            _ => None,
        },
        Constraint::MinLength(min) => match value.as_str() {
            Some(s) if s.chars().count() < *min => {
                fail(format!("length {} is below minimum {min}", s.chars().count()))
            }
            _ => None,
        },
        Constraint::MaxLength(max) => match value.as_str() {
            Some(s) if s.chars().count() > *max => {
                fail(format!("length {} exceeds maximum {max}", s.chars().count()))
            }
            _ => None,
        },
        Constraint::Pattern(pattern) => match value.as_str() {
            Some(s) if !matches_pattern(s, pattern) => {
                fail(format!("value does not match pattern {pattern}"))
            }
            _ => None,
        },
        Constraint::Range { min, max } => {
            let n = value.as_int()?;
            if min.is_some_and(|min| n < min) {
                return fail(format!("{n} is below minimum {}", min.unwrap()));
            }
            if max.is_some_and(|max| n > max) {
                return fail(format!("{n} exceeds maximum {}", max.unwrap()));
            }
            None
        }
        Constraint::Email => match value.as_str() {
            Some(s) if !matches_pattern(s, EMAIL_PATTERN) => {
                fail("not a valid email address".to_string())
            }
            _ => None,
        },
    }
}

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

/// Thread-safe cache of compiled regex patterns.
///
/// Patterns are compiled lazily on first use and cached for the lifetime
/// of the program, so repeated validation never recompiles.
struct RegexCache {
    cache: std::sync::RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: std::sync::RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        // Fast path: check if already cached
        {
            let cache = self.cache.read().unwrap();
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        // Slow path: compile and cache
        let regex = Regex::new(pattern)?;
        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// Returns `false` for an invalid pattern (logged as a warning) so that
/// validation stays resilient rather than panicking mid-transaction.
#[must_use]
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}
