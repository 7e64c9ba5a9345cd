//! Identifier newtypes shared across the engine.
//!
//! `EntityId` indexes the process arena and is only meaningful for the tree
//! that issued it. `ObjectId` and `TagId` are stable GUIDs that survive
//! persistence; the nil UUID marks an empty reference.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index of an entity inside a [`crate::core::tree::ProcessTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identifier of a scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_empty(self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self(Uuid::nil())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a scene-object tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub Uuid);

impl TagId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_empty(self) -> bool {
        self.0.is_nil()
    }
}

impl Default for TagId {
    fn default() -> Self {
        Self(Uuid::nil())
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
