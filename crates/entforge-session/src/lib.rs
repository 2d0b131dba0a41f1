//! Persistence session for entforge.
//!
//! The session is the persistence collaborator the factory registers newly
//! created entities with. It is an identity map over (entity type, id) keys
//! with explicit object states; actual storage I/O is delegated to the host
//! ORM and out of scope here.
//!
//! # Design
//!
//! - **Explicit over implicit**: nothing is flushed or saved behind the
//!   caller's back; the session only tracks.
//! - **Identity map**: one tracked slot per (type, id) key.
//! - **Rollback safety**: the factory detaches every entity it created when
//!   a transaction fails, so the session never keeps invalid entities alive.

pub mod bulk;

pub use bulk::{BulkProcess, EntitySaver};

use std::collections::HashMap;

use entforge_core::{EntityKey, EntityRef, Error, Result};

/// The persistence collaborator contract consumed by the entity factory.
///
/// `register` marks an entity for eventual save; `detach` withdraws it;
/// `clear` withdraws everything.
pub trait PersistenceSession {
    fn register(&mut self, entity: &EntityRef) -> Result<()>;
    fn detach(&mut self, entity: &EntityRef);
    fn clear(&mut self);
    fn contains(&self, entity: &EntityRef) -> bool;
}

/// State of a tracked entity in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Newly registered, pending save.
    New,
    /// Saved by a downstream saver.
    Persistent,
    /// Withdrawn from the session.
    Detached,
}

/// A tracked entity plus its bookkeeping.
struct TrackedEntity {
    entity: EntityRef,
    /// Serialized field values at registration, for dirty checking.
    original_state: Option<Vec<u8>>,
    state: ObjectState,
}

/// In-memory identity-map session, the default [`PersistenceSession`].
#[derive(Default)]
pub struct InMemorySession {
    identity_map: HashMap<EntityKey, TrackedEntity>,
    pending_new: Vec<EntityKey>,
}

impl InMemorySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of entities pending save.
    #[must_use]
    pub fn pending_new_count(&self) -> usize {
        self.pending_new.len()
    }

    /// Count of live (non-detached) tracked entities.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.identity_map
            .values()
            .filter(|t| t.state != ObjectState::Detached)
            .count()
    }

    /// Total tracked slots, detached included.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    /// State of a tracked entity, if tracked.
    #[must_use]
    pub fn state_of(&self, entity: &EntityRef) -> Option<ObjectState> {
        let key = Self::key_of(entity).ok()?;
        self.identity_map.get(&key).map(|t| t.state)
    }

    /// Whether an entity's fields changed since registration.
    #[must_use]
    pub fn is_dirty(&self, entity: &EntityRef) -> bool {
        let Ok(key) = Self::key_of(entity) else {
            return false;
        };
        let Some(tracked) = self.identity_map.get(&key) else {
            return false;
        };
        let Some(original) = &tracked.original_state else {
            return false;
        };
        serde_json::to_vec(&tracked.entity.field_values())
            .map(|current| &current != original)
            .unwrap_or(false)
    }

    /// Mark an entity as saved. Used by savers after a successful flush.
    pub fn mark_persistent(&mut self, entity: &EntityRef) {
        if let Ok(key) = Self::key_of(entity) {
            if let Some(tracked) = self.identity_map.get_mut(&key) {
                if tracked.state == ObjectState::New {
                    tracked.state = ObjectState::Persistent;
                }
                self.pending_new.retain(|k| k != &key);
            }
        }
    }

    /// Dump session state for diagnostics.
    #[must_use]
    pub fn debug_state(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            tracked: self.tracked_count(),
            registered: self.registered_count(),
            pending_new: self.pending_new_count(),
        }
    }

    fn key_of(entity: &EntityRef) -> Result<EntityKey> {
        let id = entity.id().ok_or_else(|| {
            Error::configuration(format!(
                "cannot track {} entity without an assigned id",
                entity.entity_type()
            ))
        })?;
        Ok(EntityKey::new(entity.entity_type(), id))
    }
}

impl PersistenceSession for InMemorySession {
    #[tracing::instrument(level = "debug", skip(self, entity))]
    fn register(&mut self, entity: &EntityRef) -> Result<()> {
        let key = Self::key_of(entity)?;
        tracing::debug!(entity = %entity.describe(), "Registering entity with session");

        if let Some(tracked) = self.identity_map.get_mut(&key) {
            // Re-registering a detached entity revives it.
            if tracked.state == ObjectState::Detached {
                tracked.state = ObjectState::New;
                self.pending_new.push(key);
            }
            return Ok(());
        }

        let original_state = serde_json::to_vec(&entity.field_values()).ok();
        self.identity_map.insert(
            key.clone(),
            TrackedEntity {
                entity: entity.clone(),
                original_state,
                state: ObjectState::New,
            },
        );
        self.pending_new.push(key);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, entity))]
    fn detach(&mut self, entity: &EntityRef) {
        let Ok(key) = Self::key_of(entity) else {
            return;
        };
        tracing::debug!(entity = %entity.describe(), "Detaching entity from session");
        if let Some(tracked) = self.identity_map.get_mut(&key) {
            tracked.state = ObjectState::Detached;
        }
        self.pending_new.retain(|k| k != &key);
    }

    fn clear(&mut self) {
        tracing::debug!(tracked = self.identity_map.len(), "Clearing session");
        self.identity_map.clear();
        self.pending_new.clear();
    }

    fn contains(&self, entity: &EntityRef) -> bool {
        let Ok(key) = Self::key_of(entity) else {
            return false;
        };
        self.identity_map
            .get(&key)
            .is_some_and(|t| t.state != ObjectState::Detached)
    }
}

/// Snapshot of session counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDebugInfo {
    /// Total tracked slots, detached included.
    pub tracked: usize,
    /// Live tracked entities.
    pub registered: usize,
    /// Entities pending save.
    pub pending_new: usize,
}
