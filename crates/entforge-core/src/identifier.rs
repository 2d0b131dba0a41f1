//! Entity identifiers and the identifier-generation seam.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Globally unique identifier of an entity.
///
/// Generated once by an [`IdGenerator`] and immutable after assignment.
/// The default generator uses UUIDv7, so identifiers sort by creation time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new time-ordered identifier.
    ///
    /// Prefer passing identifiers explicitly in tests for determinism.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<EntityId> for Uuid {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| Error::invalid_argument(format!("EntityId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Unique key of an entity within a creation transaction or session:
/// the entity type tag plus its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_type: String,
    pub id: EntityId,
}

impl EntityKey {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

impl core::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Produces a fresh unique identifier for a given entity type.
///
/// Injected into the factory and DTO factory so identifier policy
/// (time-ordered, random, fixed-for-tests) stays swappable.
pub trait IdGenerator {
    fn next_id(&self, entity_type: &str) -> EntityId;
}

/// Default generator: time-ordered UUIDv7 for every entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn next_id(&self, _entity_type: &str) -> EntityId {
        EntityId::new()
    }
}
