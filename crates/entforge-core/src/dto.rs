//! Data transfer objects: flat, mutable carriers of staged entity data.
//!
//! A [`Dto`] holds scalar values plus relation slots that start out as
//! nested DTOs and are replaced in place by real entity references as the
//! factory resolves the graph. DTOs are shared behind `Rc<RefCell<_>>`
//! ([`DtoRef`]) so in-place replacement works across a cyclic graph, and so
//! the factory can track visited DTOs by pointer identity.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::identifier::{EntityId, IdGenerator};
use crate::meta::{EntityMeta, MetadataProvider, RelationKind};
use crate::value::Value;

/// Shared handle to a DTO.
pub type DtoRef = Rc<RefCell<Dto>>;

/// One item in a relation slot: either still a DTO awaiting resolution, or
/// an entity reference the factory already resolved.
///
/// The `Entity` variant doubles as the "resolved, do not re-process" marker:
/// graph walks skip it.
#[derive(Clone)]
pub enum RelationItem {
    Dto(DtoRef),
    Entity(EntityRef),
}

impl RelationItem {
    /// Entity type tag of the item, whichever side it is on.
    #[must_use]
    pub fn entity_type(&self) -> String {
        match self {
            RelationItem::Dto(dto) => dto.borrow().entity_type().to_string(),
            RelationItem::Entity(entity) => entity.entity_type().to_string(),
        }
    }

    /// Identifier of the item, if assigned yet.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        match self {
            RelationItem::Dto(dto) => dto.borrow().id(),
            RelationItem::Entity(entity) => entity.id(),
        }
    }

    #[must_use]
    pub const fn is_entity(&self) -> bool {
        matches!(self, RelationItem::Entity(_))
    }
}

impl std::fmt::Debug for RelationItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Shallow on purpose: relation graphs may be cyclic.
        match self {
            RelationItem::Dto(_) => write!(f, "Dto({})", self.entity_type()),
            RelationItem::Entity(_) => write!(f, "Entity({})", self.entity_type()),
        }
    }
}

/// Value of a relation slot on a DTO.
#[derive(Debug, Clone)]
pub enum RelationValue {
    One(RelationItem),
    Many(Vec<RelationItem>),
}

/// Flat bag of field values for exactly one entity type.
pub struct Dto {
    meta: Arc<EntityMeta>,
    id: Option<EntityId>,
    values: HashMap<String, Value>,
    relations: HashMap<String, RelationValue>,
}

impl Dto {
    /// Create an empty DTO for the given entity type with no identifier.
    #[must_use]
    pub fn new(meta: Arc<EntityMeta>) -> Self {
        Self {
            meta,
            id: None,
            values: HashMap::new(),
            relations: HashMap::new(),
        }
    }

    /// Wrap into the shared handle the factory consumes.
    #[must_use]
    pub fn into_ref(self) -> DtoRef {
        Rc::new(RefCell::new(self))
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
    pub const fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    /// The staged value for a field, or `None` if the DTO never set it.
    ///
    /// The distinction matters: an absent field is skipped by `update`,
    /// while an explicit `Null` clears an optional field.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<Value> {
        self.values.get(field).cloned()
    }

    /// Stage a scalar value. The field must be declared on the entity type
    /// and the value must match its kind (or be `Null`).
    pub fn set_value(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let def = self.meta.field(field).ok_or_else(|| {
            Error::invalid_argument(format!(
                "unknown field {field:?} on {}",
                self.meta.entity_type()
            ))
        })?;
        if let Some(kind) = value.kind() {
            if kind != def.kind() {
                return Err(Error::type_mismatch(
                    self.meta.entity_type(),
                    field,
                    def.kind().as_str(),
                    value.kind_name(),
                ));
            }
        }
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    /// The staged relation slot, if any. Items are shared handles.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<RelationValue> {
        self.relations.get(name).cloned()
    }

    /// Names of relation slots the DTO currently carries.
    #[must_use]
    pub fn relation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.relations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stage a relation slot. The relation must be declared, the arity must
    /// match, and every item must be of the declared target type.
    pub fn set_relation(&mut self, name: &str, value: RelationValue) -> Result<()> {
        let def = self.meta.relation(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "unknown relation {name:?} on {}",
                self.meta.entity_type()
            ))
        })?;
        match (&value, def.kind()) {
            (RelationValue::One(item), RelationKind::One) => {
                self.check_item_type(name, def.target(), item)?;
            }
            (RelationValue::Many(items), RelationKind::Many) => {
                for item in items {
                    self.check_item_type(name, def.target(), item)?;
                }
            }
            (RelationValue::One(_), RelationKind::Many) => {
                return Err(Error::type_mismatch(
                    self.meta.entity_type(),
                    name,
                    "collection",
                    "single reference",
                ));
            }
            (RelationValue::Many(_), RelationKind::One) => {
                return Err(Error::type_mismatch(
                    self.meta.entity_type(),
                    name,
                    "single reference",
                    "collection",
                ));
            }
        }
        self.relations.insert(name.to_string(), value);
        Ok(())
    }

    /// Shorthand for staging a single nested DTO.
    pub fn set_nested_dto(&mut self, name: &str, dto: DtoRef) -> Result<()> {
        self.set_relation(name, RelationValue::One(RelationItem::Dto(dto)))
    }

    /// Shorthand for staging an already-resolved entity reference.
    pub fn set_nested_entity(&mut self, name: &str, entity: EntityRef) -> Result<()> {
        self.set_relation(name, RelationValue::One(RelationItem::Entity(entity)))
    }

    fn check_item_type(&self, name: &str, target: &str, item: &RelationItem) -> Result<()> {
        let item_type = item.entity_type();
        if item_type == target {
            return Ok(());
        }
        Err(Error::type_mismatch(
            self.meta.entity_type(),
            name,
            target,
            item_type,
        ))
    }
}

impl std::fmt::Debug for Dto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dto")
            .field("entity_type", &self.entity_type())
            .field("id", &self.id)
            .field("values", &self.values)
            .field("relations", &self.relations)
            .finish()
    }
}

/// Builds DTOs: empty-by-type for the factory's default path, or copied
/// from an existing entity's state for update flows.
pub struct DtoFactory {
    metadata: Arc<dyn MetadataProvider>,
    id_generator: Arc<dyn IdGenerator>,
}

impl DtoFactory {
    pub fn new(metadata: Arc<dyn MetadataProvider>, id_generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            metadata,
            id_generator,
        }
    }

    /// A defaulted DTO for an entity type, with a freshly generated id.
    pub fn create_empty(&self, entity_type: &str) -> Result<DtoRef> {
        let meta = self.metadata.entity_meta(entity_type)?;
        let mut dto = Dto::new(meta);
        dto.set_id(self.id_generator.next_id(entity_type));
        Ok(dto.into_ref())
    }

    /// A DTO mirroring an entity's current scalar values, id, and relation
    /// references (relations come over as resolved entity items).
    pub fn from_entity(&self, entity: &EntityRef) -> Result<DtoRef> {
        let meta = self.metadata.entity_meta(entity.entity_type())?;
        let mut dto = Dto::new(meta);
        if let Some(id) = entity.id() {
            dto.set_id(id);
        }
        for (name, value) in entity.field_values() {
            dto.set_value(&name, value)?;
        }
        for def in entity.meta().relations() {
            let Some(relation) = entity.relation(def.name()) else {
                continue;
            };
            let value = match relation {
                crate::entity::EntityRelation::One(e) => {
                    RelationValue::One(RelationItem::Entity(e))
                }
                crate::entity::EntityRelation::Many(items) => RelationValue::Many(
                    items.into_iter().map(RelationItem::Entity).collect(),
                ),
            };
            dto.set_relation(def.name(), value)?;
        }
        Ok(dto.into_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::UuidV7Generator;
    use crate::meta::{FieldDef, MetadataRegistry, RelationDef};
    use crate::value::ValueKind;

    fn registry() -> Arc<MetadataRegistry> {
        let mut registry = MetadataRegistry::new();
        registry.register(
            EntityMeta::new("Order")
                .with_field(FieldDef::new("total", ValueKind::Int).required())
                .with_relation(RelationDef::one("customer", "Customer"))
                .with_relation(RelationDef::many("shipments", "Shipment")),
        );
        registry.register(
            EntityMeta::new("Customer").with_field(FieldDef::new("name", ValueKind::Text)),
        );
        registry.register(EntityMeta::new("Shipment"));
        Arc::new(registry)
    }

    fn dto_factory() -> DtoFactory {
        DtoFactory::new(registry(), Arc::new(UuidV7Generator))
    }

    #[test]
    fn empty_dto_gets_a_generated_id() {
        let dto = dto_factory().create_empty("Order").unwrap();
        assert!(dto.borrow().id().is_some());
        assert_eq!(dto.borrow().entity_type(), "Order");
    }

    #[test]
    fn unknown_entity_type_fails() {
        assert!(dto_factory().create_empty("Ghost").is_err());
    }

    #[test]
    fn scalar_values_are_type_checked() {
        let dto = dto_factory().create_empty("Order").unwrap();
        dto.borrow_mut().set_value("total", 100i64).unwrap();
        let err = dto.borrow_mut().set_value("total", "lots").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let err = dto.borrow_mut().set_value("nope", 1i64).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn relation_slots_enforce_target_type_and_arity() {
        let factory = dto_factory();
        let order = factory.create_empty("Order").unwrap();
        let customer = factory.create_empty("Customer").unwrap();
        let shipment = factory.create_empty("Shipment").unwrap();

        order
            .borrow_mut()
            .set_nested_dto("customer", customer.clone())
            .unwrap();

        // Wrong target type
        let err = order
            .borrow_mut()
            .set_nested_dto("customer", shipment.clone())
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        // Wrong arity
        let err = order
            .borrow_mut()
            .set_relation(
                "shipments",
                RelationValue::One(RelationItem::Dto(shipment)),
            )
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn absent_field_differs_from_explicit_null() {
        let dto = dto_factory().create_empty("Customer").unwrap();
        assert_eq!(dto.borrow().value("name"), None);
        dto.borrow_mut().set_value("name", Value::Null).unwrap();
        assert_eq!(dto.borrow().value("name"), Some(Value::Null));
    }
}
