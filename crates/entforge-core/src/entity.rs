//! Entities and the always-valid update protocol.
//!
//! An entity is a shared cell ([`EntityRef`]) holding its descriptor table
//! and interior-mutable state. Entities are allocated by the factory, never
//! constructed by callers: construction happens in two phases, with the
//! `under_construction` flag suppressing validation until the factory ends
//! the transaction.
//!
//! `update` is the single write path for staged data. Outside construction
//! it snapshots prior values, applies the DTO, validates immediately, and
//! restores every snapshot if validation or a type check fails, so a live
//! entity can never be observed in an invalid state.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::dto::{Dto, RelationItem, RelationValue};
use crate::error::{Error, Result, ValidationError};
use crate::identifier::EntityId;
use crate::meta::{EntityMeta, FieldDef, RelationDef, RelationKind};
use crate::validate::{EntityValidator, FieldValues};
use crate::value::Value;

/// Shared handle to an entity.
pub type EntityRef = Rc<EntityCell>;

/// A resolved relation on an entity: references only, never DTOs.
#[derive(Clone)]
pub enum EntityRelation {
    One(EntityRef),
    Many(Vec<EntityRef>),
}

impl std::fmt::Debug for EntityRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Shallow: entity graphs may be cyclic.
        match self {
            EntityRelation::One(e) => write!(f, "One({})", e.describe()),
            EntityRelation::Many(items) => {
                let tags: Vec<String> = items.iter().map(|e| e.describe()).collect();
                write!(f, "Many({})", tags.join(", "))
            }
        }
    }
}

struct EntityState {
    id: Option<EntityId>,
    values: FieldValues,
    relations: std::collections::HashMap<String, EntityRelation>,
    under_construction: bool,
    validator: Option<Box<dyn EntityValidator>>,
}

/// A domain entity: descriptor table plus interior-mutable state.
pub struct EntityCell {
    meta: Arc<EntityMeta>,
    state: RefCell<EntityState>,
}

impl EntityCell {
    /// Allocate a bare entity with no id, no values, and validation active.
    ///
    /// Factory-internal construction API: callers obtain entities through
    /// the factory, which immediately flips the construction flag, assigns
    /// the id, and injects the validator.
    #[must_use]
    pub fn allocate(meta: Arc<EntityMeta>) -> EntityRef {
        Rc::new(Self {
            meta,
            state: RefCell::new(EntityState {
                id: None,
                values: FieldValues::new(),
                relations: std::collections::HashMap::new(),
                under_construction: false,
                validator: None,
            }),
        })
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.meta.entity_type()
    }

    #[must_use]
    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        self.state.borrow().id
    }

    /// Assign the identifier. Assigning a second, different identifier
    /// fails: identity is immutable once set.
    pub fn assign_id(&self, id: EntityId) -> Result<()> {
        let mut state = self.state.borrow_mut();
        match state.id {
            None => {
                state.id = Some(id);
                Ok(())
            }
            Some(current) if current == id => Ok(()),
            Some(current) => Err(Error::invalid_argument(format!(
                "identifier of {} already assigned ({current}), refusing to overwrite with {id}",
                self.meta.entity_type()
            ))),
        }
    }

    /// Suppress validation while the factory builds the graph.
    pub fn begin_construction(&self) {
        self.state.borrow_mut().under_construction = true;
    }

    /// Re-arm validation at transaction end.
    pub fn end_construction(&self) {
        self.state.borrow_mut().under_construction = false;
    }

    #[must_use]
    pub fn is_under_construction(&self) -> bool {
        self.state.borrow().under_construction
    }

    /// Inject the per-instance validator. Must happen before any validate
    /// or live update call.
    pub fn inject_validator(&self, validator: Box<dyn EntityValidator>) {
        self.state.borrow_mut().validator = Some(validator);
    }

    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.state.borrow().validator.is_some()
    }

    /// Current value of a field.
    ///
    /// A required field with no value yet is a type error, mirroring a
    /// getter with nothing to return; optional absent fields read as `Null`.
    pub fn get(&self, field: &str) -> Result<Value> {
        let state = self.state.borrow();
        let def = self.field_def(field)?;
        match state.values.get(field) {
            Some(value) => Ok(value.clone()),
            None if def.is_required() => Err(Error::type_mismatch(
                self.meta.entity_type(),
                field,
                def.kind().as_str(),
                "no value",
            )),
            None => Ok(Value::Null),
        }
    }

    /// Type-checked setter for one field.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let def = self.field_def(field)?;
        Self::set_field(&self.meta, &mut state, def, value.into())
    }

    /// The resolved relation, if set. Items are shared handles.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<EntityRelation> {
        self.state.borrow().relations.get(name).cloned()
    }

    /// Type- and arity-checked relation setter.
    pub fn set_relation(&self, name: &str, relation: EntityRelation) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let def = self.relation_def(name)?;
        Self::set_relation_field(&self.meta, &mut state, def, relation)
    }

    /// Snapshot of all current field values.
    #[must_use]
    pub fn field_values(&self) -> FieldValues {
        self.state.borrow().values.clone()
    }

    /// Run the injected validator against current state.
    pub fn validate(&self) -> Result<()> {
        let state = self.state.borrow();
        let violations = Self::run_validator(&self.meta, &state)?;
        if violations.is_empty() {
            return Ok(());
        }
        Err(ValidationError::new(self.meta.entity_type(), state.id, violations).into())
    }

    /// Apply a DTO to this entity under the always-valid protocol.
    ///
    /// The DTO may carry data unrelated to this entity (ignored) and need
    /// not carry every field (only staged fields are applied). Under
    /// construction, validation is deferred to transaction end; otherwise
    /// the entity validates immediately and rolls back all applied fields
    /// on failure.
    pub fn update(&self, dto: &Dto) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let in_construction = state.under_construction;
        let mut value_backup: Vec<(String, Option<Value>)> = Vec::new();
        let mut relation_backup: Vec<(String, Option<EntityRelation>)> = Vec::new();

        let applied = Self::apply_dto(
            &self.meta,
            &mut state,
            dto,
            in_construction,
            &mut value_backup,
            &mut relation_backup,
        );
        if let Err(e) = applied {
            if e.is_rollback_class() {
                Self::restore(&mut state, value_backup, relation_backup);
            }
            return Err(e);
        }
        if in_construction {
            return Ok(());
        }

        let violations = Self::run_validator(&self.meta, &state)?;
        if violations.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            entity_type = self.meta.entity_type(),
            violations = violations.len(),
            "Update failed validation, rolling back fields"
        );
        let id = state.id;
        Self::restore(&mut state, value_backup, relation_backup);
        Err(ValidationError::new(self.meta.entity_type(), id, violations).into())
    }

    /// One-line description for diagnostics and shallow Debug output.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.id() {
            Some(id) => format!("{}#{id}", self.meta.entity_type()),
            None => format!("{}#?", self.meta.entity_type()),
        }
    }

    fn field_def(&self, field: &str) -> Result<&FieldDef> {
        self.meta.field(field).ok_or_else(|| {
            Error::invalid_argument(format!(
                "unknown field {field:?} on {}",
                self.meta.entity_type()
            ))
        })
    }

    fn relation_def(&self, name: &str) -> Result<&RelationDef> {
        self.meta.relation(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "unknown relation {name:?} on {}",
                self.meta.entity_type()
            ))
        })
    }

    fn run_validator(
        meta: &EntityMeta,
        state: &EntityState,
    ) -> Result<Vec<crate::validate::ConstraintViolation>> {
        let validator = state.validator.as_ref().ok_or_else(|| {
            Error::configuration(format!(
                "no validator injected into {} entity; inject one before update/validate",
                meta.entity_type()
            ))
        })?;
        Ok(validator.validate(meta, &state.values))
    }

    fn set_field(
        meta: &EntityMeta,
        state: &mut EntityState,
        def: &FieldDef,
        value: Value,
    ) -> Result<()> {
        match value.kind() {
            None if def.is_required() => Err(Error::type_mismatch(
                meta.entity_type(),
                def.name(),
                def.kind().as_str(),
                "null",
            )),
            Some(kind) if kind != def.kind() => Err(Error::type_mismatch(
                meta.entity_type(),
                def.name(),
                def.kind().as_str(),
                value.kind_name(),
            )),
            _ => {
                state.values.insert(def.name().to_string(), value);
                Ok(())
            }
        }
    }

    fn set_relation_field(
        meta: &EntityMeta,
        state: &mut EntityState,
        def: &RelationDef,
        relation: EntityRelation,
    ) -> Result<()> {
        let check_target = |entity: &EntityRef| -> Result<()> {
            if entity.entity_type() == def.target() {
                return Ok(());
            }
            Err(Error::type_mismatch(
                meta.entity_type(),
                def.name(),
                def.target(),
                entity.entity_type(),
            ))
        };
        match (&relation, def.kind()) {
            (EntityRelation::One(entity), RelationKind::One) => check_target(entity)?,
            (EntityRelation::Many(items), RelationKind::Many) => {
                for entity in items {
                    check_target(entity)?;
                }
            }
            (EntityRelation::One(_), RelationKind::Many) => {
                return Err(Error::type_mismatch(
                    meta.entity_type(),
                    def.name(),
                    "collection",
                    "single reference",
                ));
            }
            (EntityRelation::Many(_), RelationKind::One) => {
                return Err(Error::type_mismatch(
                    meta.entity_type(),
                    def.name(),
                    "single reference",
                    "collection",
                ));
            }
        }
        state.relations.insert(def.name().to_string(), relation);
        Ok(())
    }

    fn apply_dto(
        meta: &EntityMeta,
        state: &mut EntityState,
        dto: &Dto,
        in_construction: bool,
        value_backup: &mut Vec<(String, Option<Value>)>,
        relation_backup: &mut Vec<(String, Option<EntityRelation>)>,
    ) -> Result<()> {
        // Identity is immutable: equal ids are skipped, a different id on an
        // already-identified entity is refused outright.
        if let Some(dto_id) = dto.id() {
            match state.id {
                Some(current) if current == dto_id => {}
                Some(current) => {
                    return Err(Error::invalid_argument(format!(
                        "DTO carries id {dto_id} but {} entity is already {current}; \
                         identity cannot change through update",
                        meta.entity_type()
                    )));
                }
                None => state.id = Some(dto_id),
            }
        }

        for def in meta.fields() {
            let Some(dto_value) = dto.value(def.name()) else {
                continue;
            };
            if !in_construction {
                // Tolerate a required-but-unset field: "no prior value".
                let prior = state.values.get(def.name()).cloned();
                if dto_value == prior.clone().unwrap_or(Value::Null) {
                    continue;
                }
                value_backup.push((def.name().to_string(), prior));
            }
            Self::set_field(meta, state, def, dto_value)?;
        }

        for def in meta.relations() {
            let Some(slot) = dto.relation(def.name()) else {
                continue;
            };
            let resolved = Self::resolve_relation_slot(meta, def, slot)?;
            if !in_construction {
                let prior = state.relations.get(def.name()).cloned();
                if Self::relation_unchanged(prior.as_ref(), &resolved) {
                    continue;
                }
                relation_backup.push((def.name().to_string(), prior));
            }
            Self::set_relation_field(meta, state, def, resolved)?;
        }
        Ok(())
    }

    /// Entity setters accept references only; a DTO still sitting in the
    /// slot means the factory's resolution pass did not run.
    fn resolve_relation_slot(
        meta: &EntityMeta,
        def: &RelationDef,
        slot: RelationValue,
    ) -> Result<EntityRelation> {
        let unresolved = || {
            Error::type_mismatch(
                meta.entity_type(),
                def.name(),
                "resolved entity reference",
                "unresolved DTO",
            )
        };
        match slot {
            RelationValue::One(RelationItem::Entity(entity)) => Ok(EntityRelation::One(entity)),
            RelationValue::One(RelationItem::Dto(_)) => Err(unresolved()),
            RelationValue::Many(items) => {
                let mut entities = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        RelationItem::Entity(entity) => entities.push(entity),
                        RelationItem::Dto(_) => return Err(unresolved()),
                    }
                }
                Ok(EntityRelation::Many(entities))
            }
        }
    }

    fn relation_unchanged(prior: Option<&EntityRelation>, next: &EntityRelation) -> bool {
        match (prior, next) {
            (Some(EntityRelation::One(a)), EntityRelation::One(b)) => Rc::ptr_eq(a, b),
            (Some(EntityRelation::Many(a)), EntityRelation::Many(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Rc::ptr_eq(x, y))
            }
            _ => false,
        }
    }

    /// Restore snapshots by direct state access, bypassing setter checks:
    /// a required field may legitimately have had no prior value.
    fn restore(
        state: &mut EntityState,
        value_backup: Vec<(String, Option<Value>)>,
        relation_backup: Vec<(String, Option<EntityRelation>)>,
    ) {
        for (name, prior) in value_backup {
            match prior {
                Some(value) => {
                    state.values.insert(name, value);
                }
                None => {
                    state.values.remove(&name);
                }
            }
        }
        for (name, prior) in relation_backup {
            match prior {
                Some(relation) => {
                    state.relations.insert(name, relation);
                }
                None => {
                    state.relations.remove(&name);
                }
            }
        }
    }
}

impl std::fmt::Debug for EntityCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => f
                .debug_struct("EntityCell")
                .field("entity_type", &self.meta.entity_type())
                .field("id", &state.id)
                .field("under_construction", &state.under_construction)
                .finish_non_exhaustive(),
            Err(_) => write!(f, "EntityCell({}, <borrowed>)", self.meta.entity_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FieldDef, RelationDef};
    use crate::validate::{ConstraintValidator, ConstraintViolation, FieldValues};
    use crate::value::ValueKind;

    fn order_meta() -> Arc<EntityMeta> {
        Arc::new(
            EntityMeta::new("Order")
                .with_field(FieldDef::new("total", ValueKind::Int).required())
                .with_field(FieldDef::new("note", ValueKind::Text))
                .with_relation(RelationDef::one("customer", "Customer")),
        )
    }

    fn customer_meta() -> Arc<EntityMeta> {
        Arc::new(EntityMeta::new("Customer").with_field(FieldDef::new("name", ValueKind::Text)))
    }

    fn live_order() -> EntityRef {
        let entity = EntityCell::allocate(order_meta());
        entity.assign_id(EntityId::new()).unwrap();
        entity.inject_validator(Box::new(ConstraintValidator));
        entity.set("total", 1i64).unwrap();
        entity.set("note", "two").unwrap();
        entity
    }

    fn dto_for(entity: &EntityRef) -> Dto {
        let mut dto = Dto::new(entity.meta().clone());
        if let Some(id) = entity.id() {
            dto.set_id(id);
        }
        dto
    }

    #[test]
    fn id_is_assigned_exactly_once() {
        let entity = EntityCell::allocate(order_meta());
        let id = EntityId::new();
        entity.assign_id(id).unwrap();
        // Idempotent re-assignment of the same id is a no-op.
        entity.assign_id(id).unwrap();
        let err = entity.assign_id(EntityId::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(entity.id(), Some(id));
    }

    #[test]
    fn setter_rejects_wrong_kind_and_null_on_required() {
        let entity = EntityCell::allocate(order_meta());
        let err = entity.set("total", "a lot").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let err = entity.set("total", Value::Null).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        // Optional fields accept explicit null.
        entity.set("note", Value::Null).unwrap();
    }

    #[test]
    fn getter_on_unset_required_field_is_a_type_error() {
        let entity = EntityCell::allocate(order_meta());
        assert!(matches!(
            entity.get("total").unwrap_err(),
            Error::TypeMismatch { .. }
        ));
        assert_eq!(entity.get("note").unwrap(), Value::Null);
    }

    #[test]
    fn update_under_construction_defers_validation() {
        let entity = EntityCell::allocate(order_meta());
        entity.begin_construction();
        // No validator injected; no validation attempted either.
        let dto = dto_for(&entity);
        entity.update(&dto).unwrap();

        entity.end_construction();
        entity.inject_validator(Box::new(ConstraintValidator));
        // Required "total" was never set, so validation now fails.
        assert!(matches!(
            entity.validate().unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn validate_without_injected_validator_is_a_configuration_error() {
        let entity = EntityCell::allocate(order_meta());
        assert!(matches!(
            entity.validate().unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn rollback_restores_every_field_on_type_failure() {
        let entity = live_order();
        // Bypass the DTO's own type check to reach the entity setter with a
        // wrong-shaped value for "note".
        let mut loose = Dto::new(Arc::new(
            EntityMeta::new("Order")
                .with_field(FieldDef::new("total", ValueKind::Int))
                .with_field(FieldDef::new("note", ValueKind::Int)),
        ));
        loose.set_id(entity.id().unwrap());
        loose.set_value("total", 5i64).unwrap();
        loose.set_value("note", 9i64).unwrap();

        let err = entity.update(&loose).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_eq!(entity.get("total").unwrap(), Value::Int(1));
        assert_eq!(entity.get("note").unwrap(), Value::Text("two".into()));
    }

    #[test]
    fn rollback_restores_fields_on_validation_failure() {
        struct NoteMustBeShort;
        impl EntityValidator for NoteMustBeShort {
            fn validate(&self, _meta: &EntityMeta, fields: &FieldValues) -> Vec<ConstraintViolation> {
                match fields.get("note").and_then(Value::as_str) {
                    Some(s) if s.len() > 5 => {
                        vec![ConstraintViolation::new("note", "max_length", "too long")]
                    }
                    _ => vec![],
                }
            }
        }
        let entity = live_order();
        entity.inject_validator(Box::new(NoteMustBeShort));

        let mut dto = dto_for(&entity);
        dto.set_value("total", 5i64).unwrap();
        dto.set_value("note", "much too long").unwrap();

        assert!(matches!(
            entity.update(&dto).unwrap_err(),
            Error::Validation(_)
        ));
        // Both the valid and the invalid staged values were rolled back.
        assert_eq!(entity.get("total").unwrap(), Value::Int(1));
        assert_eq!(entity.get("note").unwrap(), Value::Text("two".into()));
    }

    #[test]
    fn no_op_update_applies_nothing() {
        struct CountingValidator(Rc<RefCell<usize>>);
        impl EntityValidator for CountingValidator {
            fn validate(&self, _meta: &EntityMeta, _fields: &FieldValues) -> Vec<ConstraintViolation> {
                *self.0.borrow_mut() += 1;
                vec![]
            }
        }
        let calls = Rc::new(RefCell::new(0usize));
        let entity = live_order();
        entity.inject_validator(Box::new(CountingValidator(calls.clone())));

        let mut dto = dto_for(&entity);
        dto.set_value("total", 1i64).unwrap();
        dto.set_value("note", "two").unwrap();
        entity.update(&dto).unwrap();

        // The validation call itself is the only side effect.
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(entity.get("total").unwrap(), Value::Int(1));
        assert_eq!(entity.get("note").unwrap(), Value::Text("two".into()));
    }

    #[test]
    fn update_ignores_fields_this_entity_does_not_declare() {
        let entity = live_order();
        let mut dto = Dto::new(customer_meta());
        dto.set_value("name", "Ann").unwrap();
        // A DTO for another entity type carries nothing this entity
        // declares, so the update is a validated no-op.
        entity.update(&dto).unwrap();
        assert_eq!(entity.get("total").unwrap(), Value::Int(1));
    }

    #[test]
    fn update_refuses_identity_change() {
        let entity = live_order();
        let mut dto = dto_for(&entity);
        dto.set_id(EntityId::new());
        assert!(matches!(
            entity.update(&dto).unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn unresolved_nested_dto_is_a_type_mismatch() {
        let entity = live_order();
        let mut dto = dto_for(&entity);
        let nested = Dto::new(customer_meta()).into_ref();
        dto.set_nested_dto("customer", nested).unwrap();
        assert!(matches!(
            entity.update(&dto).unwrap_err(),
            Error::TypeMismatch { .. }
        ));
    }

    #[test]
    fn resolved_relation_reference_is_applied() {
        let entity = live_order();
        let customer = EntityCell::allocate(customer_meta());
        customer.assign_id(EntityId::new()).unwrap();

        let mut dto = dto_for(&entity);
        dto.set_nested_entity("customer", customer.clone()).unwrap();
        entity.update(&dto).unwrap();

        match entity.relation("customer") {
            Some(EntityRelation::One(e)) => assert!(Rc::ptr_eq(&e, &customer)),
            other => panic!("expected resolved customer relation, got {other:?}"),
        }
    }
}
