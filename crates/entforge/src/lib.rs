//! Always-valid entity factory runtime.
//!
//! entforge builds whole entity graphs from DTOs. Entities cannot be
//! constructed by hand: the [`EntityFactory`] allocates them, resolves
//! nested DTOs to shared references (one instance per (type, id), cycles
//! included), defers validation until the whole graph exists, and rolls the
//! persistence session back completely when anything fails.
//!
//! # Quick start
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! use entforge::prelude::*;
//!
//! let mut registry = MetadataRegistry::new();
//! registry.register(
//!     EntityMeta::new("Customer")
//!         .with_field(FieldDef::new("name", ValueKind::Text).required()),
//! );
//! registry.register(
//!     EntityMeta::new("Order")
//!         .with_field(FieldDef::new("total", ValueKind::Int).required())
//!         .with_relation(RelationDef::one("customer", "Customer")),
//! );
//!
//! let session = Rc::new(RefCell::new(InMemorySession::new()));
//! let factory = EntityFactory::new(Arc::new(registry), session.clone());
//!
//! let customer = factory.dto_factory().create_empty("Customer").unwrap();
//! customer.borrow_mut().set_value("name", "Ada").unwrap();
//!
//! let order = factory.dto_factory().create_empty("Order").unwrap();
//! order.borrow_mut().set_value("total", 250i64).unwrap();
//! order.borrow_mut().set_nested_dto("customer", customer).unwrap();
//!
//! let order = factory.create("Order", Some(order)).unwrap();
//! assert_eq!(session.borrow().registered_count(), 2);
//! assert!(matches!(order.relation("customer"), Some(EntityRelation::One(_))));
//! ```

pub use entforge_core::{
    Constraint, ConstraintValidator, ConstraintValidatorProvider, ConstraintViolation, Dto,
    DtoFactory, DtoRef, EntityCell, EntityId, EntityKey, EntityMeta, EntityRef, EntityRelation,
    EntityValidator, Error, FieldDef, FieldValues, IdGenerator, MetadataProvider,
    MetadataRegistry, MultipleValidationError, RelationDef, RelationItem, RelationKind,
    RelationValue, Result, UuidV7Generator, ValidationError, ValidatorProvider, Value, ValueKind,
};
pub use entforge_factory::{EntityFactory, derive_collection_entity_type};
pub use entforge_session::{
    BulkProcess, EntitySaver, InMemorySession, ObjectState, PersistenceSession, SessionDebugInfo,
};

/// Everything a typical host application needs in scope.
pub mod prelude {
    pub use entforge_core::{
        Constraint, Dto, DtoFactory, DtoRef, EntityId, EntityMeta, EntityRef, EntityRelation,
        Error, FieldDef, MetadataProvider, MetadataRegistry, RelationDef, RelationItem,
        RelationValue, Result, Value, ValueKind,
    };
    pub use entforge_factory::EntityFactory;
    pub use entforge_session::{BulkProcess, EntitySaver, InMemorySession, PersistenceSession};
}
