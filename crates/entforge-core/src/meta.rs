//! Entity metadata: per-type field and relation descriptor tables.
//!
//! Where a reflective runtime would derive getter/setter names from field
//! names at call time, here each entity type declares a descriptor table
//! once. The factory's update and graph-walk algorithms are driven entirely
//! by these tables, and a [`MetadataProvider`] is the lookup seam the
//! factory consumes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::validate::Constraint;
use crate::value::ValueKind;

/// Declaration of one scalar field on an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    name: String,
    kind: ValueKind,
    required: bool,
    constraints: Vec<Constraint>,
}

impl FieldDef {
    /// Create an optional field of the given kind.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            constraints: Vec::new(),
        }
    }

    /// Mark the field as required: it must hold a non-null value for the
    /// entity to validate, and its setter rejects `Null`.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a declared constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

/// Arity of a relation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// A single related entity.
    One,
    /// An ordered collection of related entities.
    Many,
}

/// Declaration of one relation field on an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    name: String,
    target: String,
    kind: RelationKind,
}

impl RelationDef {
    /// A to-one relation holding an entity of type `target`.
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::One,
        }
    }

    /// A to-many relation holding entities of type `target`.
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::Many,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity type tag of the related entity.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        self.kind
    }
}

/// The full descriptor table of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMeta {
    entity_type: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
}

impl EntityMeta {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn add_field(&mut self, field: FieldDef) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn add_relation(&mut self, relation: RelationDef) -> &mut Self {
        self.relations.push(relation);
        self
    }

    /// Builder-style variant of [`add_field`](Self::add_field).
    #[must_use]
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Builder-style variant of [`add_relation`](Self::add_relation).
    #[must_use]
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[must_use]
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Lookup seam: given an entity type tag, return its descriptor table.
pub trait MetadataProvider {
    fn entity_meta(&self, entity_type: &str) -> Result<Arc<EntityMeta>>;
}

/// In-memory metadata registry, the default [`MetadataProvider`].
///
/// Entity types are registered once at startup; lookups are by type tag.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    metas: HashMap<String, Arc<EntityMeta>>,
}

impl MetadataRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. Re-registering a tag replaces the table.
    pub fn register(&mut self, meta: EntityMeta) -> &mut Self {
        self.metas
            .insert(meta.entity_type().to_string(), Arc::new(meta));
        self
    }

    #[must_use]
    pub fn contains(&self, entity_type: &str) -> bool {
        self.metas.contains_key(entity_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }
}

impl MetadataProvider for MetadataRegistry {
    fn entity_meta(&self, entity_type: &str) -> Result<Arc<EntityMeta>> {
        self.metas.get(entity_type).cloned().ok_or_else(|| {
            Error::invalid_argument(format!("unknown entity type {entity_type:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_lookup_by_field_and_relation_name() {
        let meta = EntityMeta::new("Order")
            .with_field(FieldDef::new("total", ValueKind::Int).required())
            .with_relation(RelationDef::one("customer", "Customer"))
            .with_relation(RelationDef::many("lines", "OrderLine"));

        assert_eq!(meta.entity_type(), "Order");
        assert!(meta.field("total").unwrap().is_required());
        assert!(meta.field("missing").is_none());
        assert_eq!(meta.relation("customer").unwrap().target(), "Customer");
        assert_eq!(meta.relation("lines").unwrap().kind(), RelationKind::Many);
    }

    #[test]
    fn registry_resolves_registered_types() {
        let mut registry = MetadataRegistry::new();
        registry.register(EntityMeta::new("Order"));
        assert!(registry.contains("Order"));
        assert_eq!(registry.entity_meta("Order").unwrap().entity_type(), "Order");
    }

    #[test]
    fn registry_rejects_unknown_types() {
        let registry = MetadataRegistry::new();
        let err = registry.entity_meta("Ghost").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
