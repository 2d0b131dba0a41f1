//! The entity factory: builds whole entity graphs from DTOs.
//!
//! `create` constructs one entity and, transitively, every entity reachable
//! from its DTO's relation slots. Entities are recorded in the transaction
//! and registered with the persistence session *before* recursion, which is
//! what makes cyclic graphs terminate: a nested DTO carrying an identifier
//! already in the transaction resolves to the existing instance instead of
//! recursing forever.
//!
//! Validation is suppressed for the whole transaction and performed over
//! every created entity at the end; any failure detaches everything this
//! call created from the session and drains the transaction, so no partial
//! graph is ever left live.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use entforge_core::{
    ConstraintValidatorProvider, DtoFactory, DtoRef, EntityCell, EntityRef, Error, IdGenerator,
    MetadataProvider, MultipleValidationError, RelationItem, RelationValue, Result,
    UuidV7Generator, ValidationError, ValidatorProvider,
};
use entforge_session::PersistenceSession;

use crate::transaction::TransactionContext;

/// Orchestrates creation of entity graphs from DTOs.
pub struct EntityFactory {
    metadata: Arc<dyn MetadataProvider>,
    id_generator: Arc<dyn IdGenerator>,
    validators: Box<dyn ValidatorProvider>,
    dto_factory: DtoFactory,
    session: Rc<RefCell<dyn PersistenceSession>>,
}

impl EntityFactory {
    /// Build a factory with the default id generator (UUIDv7) and the
    /// default constraint-based validator provider.
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        session: Rc<RefCell<dyn PersistenceSession>>,
    ) -> Self {
        let id_generator: Arc<dyn IdGenerator> = Arc::new(UuidV7Generator);
        Self {
            dto_factory: DtoFactory::new(metadata.clone(), id_generator.clone()),
            metadata,
            id_generator,
            validators: Box::new(ConstraintValidatorProvider),
            session,
        }
    }

    /// Swap the identifier generator (also used for DTO defaults).
    #[must_use]
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.dto_factory = DtoFactory::new(self.metadata.clone(), id_generator.clone());
        self.id_generator = id_generator;
        self
    }

    /// Swap the provider that builds each entity's injected validator.
    #[must_use]
    pub fn with_validator_provider(mut self, validators: Box<dyn ValidatorProvider>) -> Self {
        self.validators = validators;
        self
    }

    /// The DTO factory sharing this factory's metadata and id generator.
    #[must_use]
    pub fn dto_factory(&self) -> &DtoFactory {
        &self.dto_factory
    }

    /// Create an entity of `entity_type`, plus every entity reachable from
    /// the DTO's relation slots. With no DTO, an empty default is
    /// synthesized.
    ///
    /// On any failure, every entity created during this call is detached
    /// from the persistence session and the transaction is drained before
    /// the error is returned.
    #[tracing::instrument(level = "debug", skip(self, dto))]
    pub fn create(&self, entity_type: &str, dto: Option<DtoRef>) -> Result<EntityRef> {
        let mut txn = TransactionContext::new();
        match self.create_entity(entity_type, dto, true, &mut txn) {
            Ok(entity) => {
                debug_assert!(txn.is_empty(), "transaction must drain on success");
                Ok(entity)
            }
            Err(err) => {
                self.roll_back(&mut txn);
                Err(err)
            }
        }
    }

    fn create_entity(
        &self,
        entity_type: &str,
        dto: Option<DtoRef>,
        is_root: bool,
        txn: &mut TransactionContext,
    ) -> Result<EntityRef> {
        if is_root {
            txn.reset_processed();
        }
        let meta = self.metadata.entity_meta(entity_type)?;
        let dto = match dto {
            Some(dto) => dto,
            None => self.dto_factory.create_empty(entity_type)?,
        };
        {
            let staged = dto.borrow();
            if staged.entity_type() != entity_type {
                return Err(Error::invalid_argument(format!(
                    "DTO is for {:?}, expected {entity_type:?}",
                    staged.entity_type()
                )));
            }
        }
        // Read the id into a local first; generating one below needs the
        // mutable borrow.
        let staged_id = dto.borrow().id();
        let id = match staged_id {
            Some(id) => id,
            None => {
                let id = self.id_generator.next_id(entity_type);
                dto.borrow_mut().set_id(id);
                id
            }
        };

        // Identity rule: one instance per (type, id) per transaction.
        if let Some(existing) = txn.created(entity_type, id) {
            return Ok(existing);
        }

        tracing::debug!(entity_type, %id, is_root, "Creating entity");

        // Record and register before recursing; nested DTOs referring back
        // to this identifier must find the instance already present.
        let entity = EntityCell::allocate(meta.clone());
        entity.begin_construction();
        entity.assign_id(id)?;
        entity.inject_validator(self.validators.validator_for(&meta));
        self.session.borrow_mut().register(&entity)?;
        txn.record(entity.clone())?;

        self.update_dto(&dto, &entity, txn)?;
        {
            let staged = dto.borrow();
            entity.update(&staged)?;
        }

        if is_root {
            self.stop_transaction(txn)?;
        }
        Ok(entity)
    }

    fn update_dto(&self, dto: &DtoRef, entity: &EntityRef, txn: &mut TransactionContext) -> Result<()> {
        self.replace_nested_dto_with_entity_if_ids_match(dto, entity, txn)?;
        self.replace_nested_dtos_with_new_entities(dto, txn)?;
        txn.mark_processed(dto);
        Ok(())
    }

    /// Walk the full reachable DTO graph once, replacing any nested DTO
    /// whose (type, id) matches the entity just created with the entity
    /// itself, so round-trip self-references resolve without duplicate
    /// construction. Each DTO is visited exactly once by object identity.
    fn replace_nested_dto_with_entity_if_ids_match(
        &self,
        dto: &DtoRef,
        entity: &EntityRef,
        txn: &mut TransactionContext,
    ) -> Result<()> {
        if !txn.mark_processed(dto) {
            return Ok(());
        }
        // Collect the slot names up front; the loop re-borrows the DTO
        // mutably to rewrite slots.
        let names = dto.borrow().relation_names();
        for name in names {
            let Some(slot) = dto.borrow().relation(&name) else {
                continue;
            };
            match slot {
                RelationValue::One(RelationItem::Entity(_)) => {}
                RelationValue::One(RelationItem::Dto(nested)) => {
                    if txn.is_processed(&nested) {
                        continue;
                    }
                    if Self::ids_match(&nested, entity) {
                        dto.borrow_mut().set_relation(
                            &name,
                            RelationValue::One(RelationItem::Entity(entity.clone())),
                        )?;
                    } else {
                        self.replace_nested_dto_with_entity_if_ids_match(&nested, entity, txn)?;
                    }
                }
                RelationValue::Many(items) => {
                    let mut items = items;
                    let mut replaced = false;
                    for item in &mut items {
                        let RelationItem::Dto(nested) = item.clone() else {
                            continue;
                        };
                        if Self::ids_match(&nested, entity) {
                            *item = RelationItem::Entity(entity.clone());
                            replaced = true;
                        } else {
                            self.replace_nested_dto_with_entity_if_ids_match(
                                &nested, entity, txn,
                            )?;
                        }
                    }
                    if replaced {
                        dto.borrow_mut()
                            .set_relation(&name, RelationValue::Many(items))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn ids_match(nested: &DtoRef, entity: &EntityRef) -> bool {
        let nested = nested.borrow();
        nested.entity_type() == entity.entity_type()
            && nested.id().is_some()
            && nested.id() == entity.id()
    }

    /// Convert every remaining nested DTO into a constructed entity,
    /// replacing it in place. Slots already resolved to entities are left
    /// untouched.
    fn replace_nested_dtos_with_new_entities(
        &self,
        dto: &DtoRef,
        txn: &mut TransactionContext,
    ) -> Result<()> {
        let names = dto.borrow().relation_names();
        for name in names {
            let Some(slot) = dto.borrow().relation(&name) else {
                continue;
            };
            match slot {
                RelationValue::One(RelationItem::Entity(_)) => {}
                RelationValue::One(RelationItem::Dto(nested)) => {
                    let nested_type = nested.borrow().entity_type().to_string();
                    let created = self.create_entity(&nested_type, Some(nested), false, txn)?;
                    dto.borrow_mut().set_relation(
                        &name,
                        RelationValue::One(RelationItem::Entity(created)),
                    )?;
                }
                RelationValue::Many(items) => {
                    let converted = self.convert_collection_of_dtos_to_entities(items, txn)?;
                    dto.borrow_mut()
                        .set_relation(&name, RelationValue::Many(converted))?;
                }
            }
        }
        Ok(())
    }

    /// Convert a collection of DTOs (possibly mixed with already-resolved
    /// entities) to entities of the collection's single derived type.
    fn convert_collection_of_dtos_to_entities(
        &self,
        items: Vec<RelationItem>,
        txn: &mut TransactionContext,
    ) -> Result<Vec<RelationItem>> {
        if items.is_empty() {
            return Ok(items);
        }
        let entity_type = derive_collection_entity_type(&items)?;
        let mut converted = Vec::with_capacity(items.len());
        for item in items {
            match item {
                RelationItem::Entity(entity) => converted.push(RelationItem::Entity(entity)),
                RelationItem::Dto(nested) => {
                    let created = self.create_entity(&entity_type, Some(nested), false, txn)?;
                    converted.push(RelationItem::Entity(created));
                }
            }
        }
        Ok(converted)
    }

    /// End the transaction: re-arm validation on every created entity (in
    /// creation order) and validate each one, collecting failures so every
    /// entity is checked even when earlier ones fail.
    fn stop_transaction(&self, txn: &mut TransactionContext) -> Result<()> {
        let created = txn.created_in_order();
        tracing::debug!(entities = created.len(), "Ending creation transaction");

        let mut failures: Vec<ValidationError> = Vec::new();
        for entity in &created {
            entity.end_construction();
            match entity.validate() {
                Ok(()) => {}
                Err(Error::Validation(failure)) => failures.push(failure),
                Err(other) => return Err(other),
            }
        }
        if !failures.is_empty() {
            return Err(MultipleValidationError::new(failures).into());
        }
        txn.clear();
        Ok(())
    }

    /// Detach everything this transaction created from the session and
    /// drain the transaction. Called on every failure path.
    fn roll_back(&self, txn: &mut TransactionContext) {
        let created = txn.created_in_order();
        if !created.is_empty() {
            tracing::warn!(
                entities = created.len(),
                "Rolling back creation transaction"
            );
            let mut session = self.session.borrow_mut();
            for entity in &created {
                session.detach(entity);
            }
        }
        txn.clear();
    }
}

/// Determine the single entity type a relation collection holds.
///
/// Mixed types fail with an invalid-argument error; an empty collection
/// carries no type information and cannot be processed.
pub fn derive_collection_entity_type(items: &[RelationItem]) -> Result<String> {
    if items.is_empty() {
        return Err(Error::invalid_argument(
            "cannot derive an entity type from an empty collection",
        ));
    }
    let mut derived: Option<String> = None;
    for item in items {
        let item_type = item.entity_type();
        match &derived {
            None => derived = Some(item_type),
            Some(expected) if *expected == item_type => {}
            Some(expected) => {
                return Err(Error::invalid_argument(format!(
                    "mismatched collection: expected {expected}, found {item_type}"
                )));
            }
        }
    }
    Ok(derived.expect("non-empty collection always derives a type"))
}
