//! Reference-counted object reservations.
//!
//! An object is locked while at least one step holds a reservation on it.
//! The sink is told about a change only when the holder set becomes empty or
//! stops being empty.

use std::collections::BTreeMap;

use tracing::warn;

use crate::core::entity::EntityKind;
use crate::core::ids::{EntityId, ObjectId};
use crate::core::scene::{SceneProvider, Target};
use crate::core::tags::TagRegistry;
use crate::core::tree::ProcessTree;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockRegistry {
    holders: BTreeMap<ObjectId, Vec<EntityId>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (`lock = true`) or release (`lock = false`) one reservation of
    /// `requester` on `object`. Returns the new aggregate state when it changed.
    ///
    /// A release from a requester that holds nothing is ignored.
    pub fn request_locked(
        &mut self,
        object: ObjectId,
        lock: bool,
        requester: EntityId,
    ) -> Option<bool> {
        if lock {
            let holders = self.holders.entry(object).or_default();
            holders.push(requester);
            return (holders.len() == 1).then_some(true);
        }
        let position = self
            .holders
            .get(&object)
            .and_then(|holders| holders.iter().position(|h| *h == requester));
        let Some(position) = position else {
            warn!(%object, %requester, "lock release from a requester without a reservation ignored");
            return None;
        };
        let holders = self.holders.get_mut(&object)?;
        holders.remove(position);
        if holders.is_empty() {
            self.holders.remove(&object);
            return Some(false);
        }
        None
    }

    /// Drop every reservation of `requester`. Returns the objects that became
    /// unlocked.
    pub fn release_all(&mut self, requester: EntityId) -> Vec<ObjectId> {
        let mut unlocked = Vec::new();
        self.holders.retain(|object, holders| {
            let before = holders.len();
            holders.retain(|h| *h != requester);
            if holders.is_empty() && before > 0 {
                unlocked.push(*object);
                return false;
            }
            true
        });
        unlocked
    }

    pub fn is_locked(&self, object: ObjectId) -> bool {
        self.holders.contains_key(&object)
    }

    pub fn holders(&self, object: ObjectId) -> &[EntityId] {
        self.holders.get(&object).map_or(&[], Vec::as_slice)
    }

    pub fn locked_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.holders.keys().copied()
    }
}

/// Step-scoped view of the objects a step reserves while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockableObjects {
    pub objects: Vec<ObjectId>,
}

impl LockableObjects {
    /// Objects referenced by the step's behaviors (including nested groups)
    /// and conditions, in first-reference order, minus the step's
    /// keep-unlocked objects and tags. Unresolvable references are skipped.
    pub fn collect<S: SceneProvider + ?Sized>(
        tree: &ProcessTree,
        step: EntityId,
        scene: &S,
        tags: &TagRegistry,
    ) -> Self {
        let Some(data) = tree.step_data(step) else {
            return Self::default();
        };
        let mut excluded: Vec<ObjectId> = data
            .keep_unlocked
            .iter()
            .copied()
            .filter(|o| !o.is_empty())
            .collect();
        for tag in data.tags_to_unlock.iter().filter(|t| !t.is_empty()) {
            if tags.tag_exists(*tag) {
                excluded.extend(scene.resolve_by_tag(*tag).into_iter().map(|h| h.0));
            }
        }

        let mut targets = Vec::new();
        let mut pending = tree.behaviors(step);
        pending.extend(
            tree.transitions(step)
                .into_iter()
                .flat_map(|t| tree.conditions(t)),
        );
        let mut index = 0;
        while index < pending.len() {
            let id = pending[index];
            index += 1;
            let Ok(entity) = tree.get(id) else { continue };
            match entity.kind() {
                EntityKind::Behavior { data, children } => {
                    targets.extend(data.references());
                    pending.extend(children.iter().copied());
                }
                EntityKind::Condition { data, .. } => targets.extend(data.references()),
                _ => {}
            }
        }

        let mut objects = Vec::new();
        for target in targets {
            let resolved: Vec<ObjectId> = match target {
                Target::Object(id) if !id.is_empty() => scene
                    .resolve_by_id(id)
                    .map(|h| vec![h.0])
                    .unwrap_or_default(),
                Target::Tag(tag) if !tag.is_empty() && tags.tag_exists(tag) => {
                    scene.resolve_by_tag(tag).into_iter().map(|h| h.0).collect()
                }
                _ => Vec::new(),
            };
            for object in resolved {
                if !excluded.contains(&object) && !objects.contains(&object) {
                    objects.push(object);
                }
            }
        }
        Self { objects }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_stays_locked_until_every_holder_releases() {
        let mut locks = LockRegistry::new();
        let object = ObjectId::new();
        let a = EntityId(1);
        let b = EntityId(2);

        assert_eq!(locks.request_locked(object, true, a), Some(true));
        assert_eq!(locks.request_locked(object, true, b), None);
        assert_eq!(locks.request_locked(object, false, a), None);
        assert!(locks.is_locked(object));
        assert_eq!(locks.request_locked(object, false, b), Some(false));
        assert!(!locks.is_locked(object));
    }

    #[test]
    fn release_without_reservation_is_ignored() {
        let mut locks = LockRegistry::new();
        let object = ObjectId::new();
        assert_eq!(locks.request_locked(object, false, EntityId(3)), None);
        locks.request_locked(object, true, EntityId(1));
        assert_eq!(locks.request_locked(object, false, EntityId(3)), None);
        assert_eq!(locks.holders(object), &[EntityId(1)]);
    }

    #[test]
    fn release_all_reports_only_objects_that_became_free() {
        let mut locks = LockRegistry::new();
        let shared = ObjectId::new();
        let own = ObjectId::new();
        locks.request_locked(shared, true, EntityId(1));
        locks.request_locked(shared, true, EntityId(2));
        locks.request_locked(own, true, EntityId(1));

        assert_eq!(locks.release_all(EntityId(1)), vec![own]);
        assert!(locks.is_locked(shared));
        assert!(locks.release_all(EntityId(1)).is_empty());
    }
}
