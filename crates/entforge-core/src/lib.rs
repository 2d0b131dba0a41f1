//! Core types for the entforge runtime.
//!
//! `entforge-core` is the foundation layer: it defines the value model,
//! entity metadata tables, DTOs, the entity cell with its always-valid
//! update protocol, constraint validation, and the error hierarchy.
//!
//! # Role in the architecture
//!
//! - **Contract layer**: [`MetadataProvider`], [`IdGenerator`],
//!   [`EntityValidator`] and [`ValidatorProvider`] are the seams the factory
//!   and host applications implement or swap.
//! - **Data model**: [`Value`], [`Dto`], and [`EntityCell`] carry all staged
//!   and committed entity state.
//! - **Protocol**: [`EntityCell::update`] implements the always-valid
//!   snapshot/apply/validate/rollback cycle; the construction flag defers
//!   validation while a factory transaction is open.
//!
//! # Who uses this crate
//!
//! - `entforge-factory` drives graph construction over these types.
//! - `entforge-session` tracks [`EntityRef`]s in its identity map.
//! - Applications usually depend on the `entforge` facade instead.

pub mod dto;
pub mod entity;
pub mod error;
pub mod identifier;
pub mod meta;
pub mod validate;
pub mod value;

pub use dto::{Dto, DtoFactory, DtoRef, RelationItem, RelationValue};
pub use entity::{EntityCell, EntityRef, EntityRelation};
pub use error::{Error, MultipleValidationError, Result, ValidationError};
pub use identifier::{EntityId, EntityKey, IdGenerator, UuidV7Generator};
pub use meta::{
    EntityMeta, FieldDef, MetadataProvider, MetadataRegistry, RelationDef, RelationKind,
};
pub use validate::{
    Constraint, ConstraintValidator, ConstraintValidatorProvider, ConstraintViolation,
    EntityValidator, FieldValues, ValidatorProvider, matches_pattern,
};
pub use value::{Value, ValueKind};
