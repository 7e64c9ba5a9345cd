//! Boundary to the scene-object layer.
//!
//! The engine never owns scene objects. It resolves references through a
//! [`SceneProvider`] and reports aggregate lock changes to a [`LockSink`];
//! the interaction layer behind both is responsible for the actual effects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::ids::{ObjectId, TagId};

/// Handle to a live scene object. Only valid for the provider that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectHandle(pub ObjectId);

/// Typed capability a scene object may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Enableable,
    Grabbable,
    Touchable,
    Snappable,
    SnapZone,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Enableable => "enableable",
            Capability::Grabbable => "grabbable",
            Capability::Touchable => "touchable",
            Capability::Snappable => "snappable",
            Capability::SnapZone => "snap_zone",
        };
        f.write_str(name)
    }
}

/// A reference to one object or to every object carrying a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Object(ObjectId),
    Tag(TagId),
}

impl Target {
    pub fn is_empty(self) -> bool {
        match self {
            Target::Object(id) => id.is_empty(),
            Target::Tag(tag) => tag.is_empty(),
        }
    }
}

impl From<ObjectId> for Target {
    fn from(id: ObjectId) -> Self {
        Target::Object(id)
    }
}

impl From<TagId> for Target {
    fn from(tag: TagId) -> Self {
        Target::Tag(tag)
    }
}

/// Resolves references and exposes capability operations on scene objects.
///
/// Capability operations are only called on handles for which
/// [`SceneProvider::has_capability`] returned true.
pub trait SceneProvider {
    fn resolve_by_id(&self, id: ObjectId) -> Option<ObjectHandle>;

    /// Objects carrying `tag`, in registration order.
    fn resolve_by_tag(&self, tag: TagId) -> Vec<ObjectHandle>;

    fn has_capability(&self, object: ObjectHandle, capability: Capability) -> bool;

    fn has_component(&self, object: ObjectHandle, component: &str) -> bool;

    fn object_name(&self, object: ObjectHandle) -> String;

    fn set_enabled(&mut self, object: ObjectHandle, enabled: bool);

    fn is_enabled(&self, object: ObjectHandle) -> bool;

    fn set_component_enabled(&mut self, object: ObjectHandle, component: &str, enabled: bool);

    fn is_grabbed(&self, object: ObjectHandle) -> bool;

    /// Instantly simulate a grab.
    fn fast_forward_grab(&mut self, object: ObjectHandle);

    fn is_touched(&self, object: ObjectHandle) -> bool;

    /// Instantly simulate a touch.
    fn fast_forward_touch(&mut self, object: ObjectHandle);

    /// The zone `object` is currently snapped into, if any.
    fn snapped_zone(&self, object: ObjectHandle) -> Option<ObjectHandle>;

    /// Instantly snap `object` into `zone`.
    fn fast_forward_snap(&mut self, object: ObjectHandle, zone: ObjectHandle);
}

/// Receives aggregate lock state changes.
pub trait LockSink {
    /// Called whenever the reservation count of `object` crosses zero.
    fn on_lock_changed(&mut self, object: ObjectHandle, locked: bool);
}

/// Everything the engine needs from the scene layer.
pub trait Scene: SceneProvider + LockSink {}

impl<T: SceneProvider + LockSink> Scene for T {}
