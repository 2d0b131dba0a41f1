//! Creation-transaction bookkeeping.
//!
//! A [`TransactionContext`] is created per top-level `create` call and
//! threaded through the recursive construction, so concurrent root calls
//! never share state. It holds the identity registry of entities under
//! construction and the set of DTOs already walked, keyed by pointer
//! identity.

use std::collections::HashMap;

use entforge_core::{DtoRef, EntityId, EntityKey, EntityRef, Error, Result};

/// Per-root-call registry of entities under construction.
///
/// Invariants: at most one entity per (type, id) key, and the context is
/// fully drained when the top-level call finishes, on both the success and
/// the failure path.
#[derive(Default)]
pub struct TransactionContext {
    created: HashMap<EntityKey, EntityRef>,
    order: Vec<EntityRef>,
    /// DTOs already walked. Values keep the `Rc`s alive so pointer keys
    /// stay unambiguous for the life of the transaction.
    processed_dtos: HashMap<usize, DtoRef>,
}

impl TransactionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The live instance for this (type, id), if one was already created
    /// in this transaction.
    #[must_use]
    pub fn created(&self, entity_type: &str, id: EntityId) -> Option<EntityRef> {
        self.created
            .get(&EntityKey::new(entity_type, id))
            .cloned()
    }

    /// Record a freshly allocated entity. Recording a second instance for
    /// the same key is a bug in the caller and is refused.
    pub fn record(&mut self, entity: EntityRef) -> Result<()> {
        let id = entity.id().ok_or_else(|| {
            Error::configuration("entity must have an id before being recorded in a transaction")
        })?;
        let key = EntityKey::new(entity.entity_type(), id);
        if self.created.contains_key(&key) {
            return Err(Error::invalid_argument(format!(
                "transaction already holds an instance for {key}"
            )));
        }
        self.created.insert(key, entity.clone());
        self.order.push(entity);
        Ok(())
    }

    /// All entities created in this transaction, in creation order.
    #[must_use]
    pub fn created_in_order(&self) -> Vec<EntityRef> {
        self.order.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Mark a DTO as walked. Returns `false` if it was already marked.
    pub fn mark_processed(&mut self, dto: &DtoRef) -> bool {
        self.processed_dtos
            .insert(Self::dto_key(dto), dto.clone())
            .is_none()
    }

    #[must_use]
    pub fn is_processed(&self, dto: &DtoRef) -> bool {
        self.processed_dtos.contains_key(&Self::dto_key(dto))
    }

    /// Reset the processed-DTO tracking, as done at the start of a root
    /// call.
    pub fn reset_processed(&mut self) {
        self.processed_dtos.clear();
    }

    /// Drain everything.
    pub fn clear(&mut self) {
        self.created.clear();
        self.order.clear();
        self.processed_dtos.clear();
    }

    fn dto_key(dto: &DtoRef) -> usize {
        std::rc::Rc::as_ptr(dto) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use entforge_core::{Dto, EntityCell, EntityMeta};

    fn entity(entity_type: &str, id: EntityId) -> EntityRef {
        let e = EntityCell::allocate(Arc::new(EntityMeta::new(entity_type)));
        e.assign_id(id).unwrap();
        e
    }

    #[test]
    fn records_and_resolves_by_key() {
        let mut txn = TransactionContext::new();
        let id = EntityId::new();
        let order = entity("Order", id);
        txn.record(order.clone()).unwrap();

        let found = txn.created("Order", id).unwrap();
        assert!(std::rc::Rc::ptr_eq(&found, &order));
        assert!(txn.created("Customer", id).is_none());
    }

    #[test]
    fn refuses_duplicate_keys() {
        let mut txn = TransactionContext::new();
        let id = EntityId::new();
        txn.record(entity("Order", id)).unwrap();
        assert!(txn.record(entity("Order", id)).is_err());
    }

    #[test]
    fn preserves_creation_order() {
        let mut txn = TransactionContext::new();
        let first = entity("Order", EntityId::new());
        let second = entity("Customer", EntityId::new());
        txn.record(first.clone()).unwrap();
        txn.record(second.clone()).unwrap();

        let ordered = txn.created_in_order();
        assert!(std::rc::Rc::ptr_eq(&ordered[0], &first));
        assert!(std::rc::Rc::ptr_eq(&ordered[1], &second));
    }

    #[test]
    fn processed_marking_is_once_per_object() {
        let mut txn = TransactionContext::new();
        let dto = Dto::new(Arc::new(EntityMeta::new("Order"))).into_ref();
        assert!(!txn.is_processed(&dto));
        assert!(txn.mark_processed(&dto));
        assert!(!txn.mark_processed(&dto));
        assert!(txn.is_processed(&dto));

        txn.reset_processed();
        assert!(!txn.is_processed(&dto));
    }

    #[test]
    fn clear_drains_everything() {
        let mut txn = TransactionContext::new();
        txn.record(entity("Order", EntityId::new())).unwrap();
        let dto = Dto::new(Arc::new(EntityMeta::new("Order"))).into_ref();
        txn.mark_processed(&dto);

        txn.clear();
        assert!(txn.is_empty());
        assert!(!txn.is_processed(&dto));
    }
}
