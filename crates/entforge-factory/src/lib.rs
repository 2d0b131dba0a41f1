//! Entity graph construction for entforge.
//!
//! This crate hosts the [`EntityFactory`], which turns DTO graphs into
//! always-valid entity graphs: nested DTOs are resolved to shared entity
//! references, identifiers converge on one instance per (type, id) within a
//! transaction, and validation of the whole graph happens once at the end.
//!
//! # Guarantees
//!
//! - **Identity**: within one `create` call, one entity instance per
//!   (type, id), no matter how many DTOs reference it.
//! - **Termination**: cyclic DTO graphs resolve; entities are registered
//!   before recursion so back-references find the live instance.
//! - **Atomicity**: a failure anywhere detaches everything the call created
//!   from the persistence session before the error surfaces.

pub mod factory;
pub mod transaction;

pub use factory::{EntityFactory, derive_collection_entity_type};
pub use transaction::TransactionContext;
